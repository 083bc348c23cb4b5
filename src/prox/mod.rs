//! Proximal operators for the penalized decomposition solvers.
//!
//! Every operator computes `argmin_z ½‖z − x‖² + λ·P(z)` for its penalty
//! `P`. The separable penalties (lasso, SCAD, MCP, group lasso) have closed
//! forms applied coordinate-wise or block-wise; the ordered fused lasso is
//! solved exactly by a path algorithm ([`fused`]) and the graph-fused lasso
//! by an ADMM/AMA splitting ([`fusion`]).
//!
//! The family is a tagged variant dispatched through a single trait method,
//! so selecting a penalty costs no heap allocation and no virtual call.

pub mod fused;
pub mod fusion;
pub(crate) mod heap;

use enum_dispatch::enum_dispatch;
use faer::{Col, ColRef, Mat};

use crate::linalg::vector_ops::{positive_part, shrink_positive, soft_threshold};
use crate::{DecompositionError, E, I};

pub use fused::OrderedFusedLasso;
pub use fusion::GraphFusedLasso;

/// A proximal map `x ↦ argmin_z ½‖z − x‖² + λ·P(z)`.
///
/// Operators take `&mut self` because the graph-fusion solvers retain their
/// splitting state between calls; the separable operators are pure.
#[enum_dispatch]
pub trait ProximalOperator {
    /// Applies the operator at penalty level `lambda ≥ 0`.
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E>;
}

/// The proximal-operator family.
#[enum_dispatch(ProximalOperator)]
#[derive(Debug, Clone)]
pub enum ProxOp {
    NullProx,
    Lasso,
    NonNegativeLasso,
    Scad,
    NonNegativeScad,
    Mcp,
    NonNegativeMcp,
    GroupLasso,
    NonNegativeGroupLasso,
    OrderedFusedLasso,
    GraphFusedLasso,
}

/// No penalty: the identity map.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProx;

impl ProximalOperator for NullProx {
    fn threshold(&mut self, x: ColRef<'_, E>, _lambda: E) -> Col<E> {
        x.to_owned()
    }
}

/// Coordinate-wise soft thresholding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lasso;

impl ProximalOperator for Lasso {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        Col::from_fn(x.nrows(), |i| soft_threshold(x[i], lambda))
    }
}

/// Soft thresholding restricted to the non-negative orthant.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonNegativeLasso;

impl ProximalOperator for NonNegativeLasso {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        Col::from_fn(x.nrows(), |i| shrink_positive(x[i], lambda))
    }
}

/// Smoothly clipped absolute deviation.
///
/// The closed form follows Fan and Li, *Variable Selection via Nonconcave
/// Penalized Likelihood and its Oracle Properties*, formula (2.8): soft
/// thresholding below 2λ, a linear interpolation up to γλ, identity above.
#[derive(Debug, Clone, Copy)]
pub struct Scad {
    gamma: E,
}

impl Scad {
    pub const DEFAULT_GAMMA: E = 3.7;
    pub const GAMMA_MIN: E = 2.;

    pub fn new(gamma: E) -> Result<Self, DecompositionError> {
        Self::check(gamma)?;
        Ok(Self { gamma })
    }

    pub(crate) fn check(gamma: E) -> Result<(), DecompositionError> {
        if gamma >= Self::GAMMA_MIN {
            Ok(())
        } else {
            Err(DecompositionError::GammaOutOfRange {
                kind: "SCAD",
                gamma,
                min: Self::GAMMA_MIN,
            })
        }
    }
}

impl ProximalOperator for Scad {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        let gl = self.gamma * lambda;
        Col::from_fn(x.nrows(), |i| {
            let ax = x[i].abs();
            if ax > gl {
                x[i]
            } else if ax > 2. * lambda {
                x[i].signum() * ((self.gamma - 1.) * ax - gl) / (self.gamma - 2.)
            } else {
                soft_threshold(x[i], lambda)
            }
        })
    }
}

/// SCAD on the non-negative orthant: project, then apply the plain rule.
#[derive(Debug, Clone, Copy)]
pub struct NonNegativeScad {
    inner: Scad,
}

impl NonNegativeScad {
    pub fn new(gamma: E) -> Result<Self, DecompositionError> {
        Ok(Self {
            inner: Scad::new(gamma)?,
        })
    }
}

impl ProximalOperator for NonNegativeScad {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        let projected = positive_part(x);
        self.inner.threshold(projected.as_ref(), lambda)
    }
}

/// Minimax concave penalty.
///
/// Firm thresholding: `(γ/(γ−1))·S(x, λ)` below γλ, identity above.
#[derive(Debug, Clone, Copy)]
pub struct Mcp {
    gamma: E,
}

impl Mcp {
    pub const DEFAULT_GAMMA: E = 4.;
    pub const GAMMA_MIN: E = 1.;

    pub fn new(gamma: E) -> Result<Self, DecompositionError> {
        Self::check(gamma)?;
        Ok(Self { gamma })
    }

    pub(crate) fn check(gamma: E) -> Result<(), DecompositionError> {
        if gamma >= Self::GAMMA_MIN {
            Ok(())
        } else {
            Err(DecompositionError::GammaOutOfRange {
                kind: "MCP",
                gamma,
                min: Self::GAMMA_MIN,
            })
        }
    }
}

impl ProximalOperator for Mcp {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        let gl = self.gamma * lambda;
        Col::from_fn(x.nrows(), |i| {
            let ax = x[i].abs();
            if ax > gl {
                x[i]
            } else {
                let shrunk = shrink_positive(ax, lambda);
                // at γ = 1 the scale is unbounded but the shrunk value is 0
                if shrunk == 0. {
                    0.
                } else {
                    x[i].signum() * (self.gamma / (self.gamma - 1.)) * shrunk
                }
            }
        })
    }
}

/// MCP on the non-negative orthant.
#[derive(Debug, Clone, Copy)]
pub struct NonNegativeMcp {
    inner: Mcp,
}

impl NonNegativeMcp {
    pub fn new(gamma: E) -> Result<Self, DecompositionError> {
        Ok(Self {
            inner: Mcp::new(gamma)?,
        })
    }
}

impl ProximalOperator for NonNegativeMcp {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        let projected = positive_part(x);
        self.inner.threshold(projected.as_ref(), lambda)
    }
}

/// Block soft thresholding over a fixed grouping of the coordinates.
#[derive(Debug, Clone)]
pub struct GroupLasso {
    /// Zero-based group label of each coordinate.
    labels: Vec<I>,
    n_groups: I,
}

impl GroupLasso {
    /// Takes a 1-based contiguous labelling, as produced by a factor
    /// variable in the host runtime; labels are shifted to 0-based here.
    pub fn new(groups: &[I]) -> Result<Self, DecompositionError> {
        Self::check(groups)?;
        let n_groups = groups.iter().max().copied().unwrap_or(0);
        Ok(Self {
            labels: groups.iter().map(|&g| g - 1).collect(),
            n_groups,
        })
    }

    pub(crate) fn check(groups: &[I]) -> Result<(), DecompositionError> {
        let Some(&max) = groups.iter().max() else {
            return Ok(());
        };
        if groups.contains(&0) {
            return Err(DecompositionError::GroupLabelsNotContiguous);
        }
        let mut seen = vec![false; max];
        for &g in groups {
            seen[g - 1] = true;
        }
        if seen.iter().all(|&s| s) {
            Ok(())
        } else {
            Err(DecompositionError::GroupLabelsNotContiguous)
        }
    }
}

impl ProximalOperator for GroupLasso {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        debug_assert_eq!(x.nrows(), self.labels.len());
        let mut norms = vec![0.; self.n_groups];
        for i in 0..x.nrows() {
            norms[self.labels[i]] += x[i] * x[i];
        }
        let scales: Vec<E> = norms
            .iter()
            .map(|&sq| {
                let norm = sq.sqrt();
                // empty and fully-thresholded groups scale to 0, so 0/0 := 0
                if norm > 0. {
                    shrink_positive(norm, lambda) / norm
                } else {
                    0.
                }
            })
            .collect();
        Col::from_fn(x.nrows(), |i| x[i] * scales[self.labels[i]])
    }
}

/// Group lasso on the non-negative orthant.
#[derive(Debug, Clone)]
pub struct NonNegativeGroupLasso {
    inner: GroupLasso,
}

impl NonNegativeGroupLasso {
    pub fn new(groups: &[I]) -> Result<Self, DecompositionError> {
        Ok(Self {
            inner: GroupLasso::new(groups)?,
        })
    }
}

impl ProximalOperator for NonNegativeGroupLasso {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        let projected = positive_part(x);
        self.inner.threshold(projected.as_ref(), lambda)
    }
}

/// Penalty descriptor: the kind and its construction-time parameters.
///
/// [`Penalty::build`] is the factory that validates the parameters against
/// the iterate dimension and produces the operator.
#[derive(Debug, Clone, Default)]
pub enum Penalty {
    #[default]
    None,
    Lasso {
        nonneg: bool,
    },
    Scad {
        gamma: E,
        nonneg: bool,
    },
    Mcp {
        gamma: E,
        nonneg: bool,
    },
    GroupLasso {
        groups: Vec<I>,
        nonneg: bool,
    },
    OrderedFused,
    GraphFused {
        weights: Mat<E>,
        admm: bool,
        accel: bool,
        prox_eps: E,
    },
}

impl Penalty {
    pub fn lasso() -> Self {
        Penalty::Lasso { nonneg: false }
    }

    /// SCAD with the customary γ = 3.7.
    pub fn scad() -> Self {
        Penalty::Scad {
            gamma: Scad::DEFAULT_GAMMA,
            nonneg: false,
        }
    }

    /// MCP with the customary γ = 4.
    pub fn mcp() -> Self {
        Penalty::Mcp {
            gamma: Mcp::DEFAULT_GAMMA,
            nonneg: false,
        }
    }

    pub fn group_lasso(groups: Vec<I>) -> Self {
        Penalty::GroupLasso {
            groups,
            nonneg: false,
        }
    }

    /// Switches the non-negative variant on or off.
    ///
    /// The fused penalties have no non-negative variant and are rejected.
    /// The null penalty is unchanged; a pure orthant projection is a
    /// non-negative lasso applied at λ = 0.
    pub fn with_nonnegativity(self, on: bool) -> Result<Self, DecompositionError> {
        match self {
            Penalty::None => Ok(Penalty::None),
            Penalty::Lasso { .. } => Ok(Penalty::Lasso { nonneg: on }),
            Penalty::Scad { gamma, .. } => Ok(Penalty::Scad { gamma, nonneg: on }),
            Penalty::Mcp { gamma, .. } => Ok(Penalty::Mcp { gamma, nonneg: on }),
            Penalty::GroupLasso { groups, .. } => Ok(Penalty::GroupLasso { groups, nonneg: on }),
            Penalty::OrderedFused | Penalty::GraphFused { .. } if on => {
                Err(DecompositionError::NonNegativeFusion)
            }
            other => Ok(other),
        }
    }

    /// Validates the kind parameters without reference to a dimension.
    pub(crate) fn validate(&self) -> Result<(), DecompositionError> {
        match self {
            Penalty::None | Penalty::Lasso { .. } | Penalty::OrderedFused => Ok(()),
            Penalty::Scad { gamma, .. } => Scad::check(*gamma),
            Penalty::Mcp { gamma, .. } => Mcp::check(*gamma),
            Penalty::GroupLasso { groups, .. } => GroupLasso::check(groups),
            Penalty::GraphFused {
                weights,
                admm,
                accel,
                prox_eps,
            } => GraphFusedLasso::check(weights.as_ref(), *admm, *accel, *prox_eps),
        }
    }

    /// Builds the operator for an iterate of length `dim`.
    pub fn build(&self, dim: I) -> Result<ProxOp, DecompositionError> {
        Ok(match self {
            Penalty::None => NullProx.into(),
            Penalty::Lasso { nonneg: false } => Lasso.into(),
            Penalty::Lasso { nonneg: true } => NonNegativeLasso.into(),
            Penalty::Scad {
                gamma,
                nonneg: false,
            } => Scad::new(*gamma)?.into(),
            Penalty::Scad {
                gamma,
                nonneg: true,
            } => NonNegativeScad::new(*gamma)?.into(),
            Penalty::Mcp {
                gamma,
                nonneg: false,
            } => Mcp::new(*gamma)?.into(),
            Penalty::Mcp {
                gamma,
                nonneg: true,
            } => NonNegativeMcp::new(*gamma)?.into(),
            Penalty::GroupLasso { groups, nonneg } => {
                if groups.len() != dim {
                    return Err(DecompositionError::GroupLengthMismatch {
                        got: groups.len(),
                        expected: dim,
                    });
                }
                if *nonneg {
                    NonNegativeGroupLasso::new(groups)?.into()
                } else {
                    GroupLasso::new(groups)?.into()
                }
            }
            Penalty::OrderedFused => OrderedFusedLasso.into(),
            Penalty::GraphFused {
                weights,
                admm,
                accel,
                prox_eps,
            } => {
                if weights.nrows() != dim {
                    return Err(DecompositionError::WeightDimensionMismatch {
                        got: weights.nrows(),
                        expected: dim,
                    });
                }
                GraphFusedLasso::new(weights.as_ref(), *admm, *accel, *prox_eps)?.into()
            }
        })
    }
}

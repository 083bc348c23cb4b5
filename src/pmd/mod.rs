//! Penalized rank-one matrix decomposition.
//!
//! Extracts sparse, structured, functional principal components of a data
//! matrix `X ∈ ℝ^{n×p}` by solving the rank-one biconvex program
//!
//! ```text
//!   max  uᵀ X v − λ_u P_u(u) − λ_v P_v(v)
//!   s.t. uᵀ S_u u ≤ 1,  vᵀ S_v v ≤ 1,
//! ```
//!
//! where `S_u = I + n·α_u·Ω_u` and `S_v = I + p·α_v·Ω_v` fold smoothness
//! penalties into the normalization constraints. The solver alternates
//! proximal-gradient inner loops on `u` and `v` from a singular-pair
//! initialization, optionally with Nesterov momentum, until the joint
//! relative change passes the outer tolerance. Convergence is to a
//! stationary point of the biconvex objective, not a certified global
//! optimum. The top-k decomposition repeats the rank-one solve with
//! deflation of `X` in between.
//!
//! The formulation follows Allen, *Sparse and Functional Principal
//! Components Analysis*.

pub(crate) mod momentum;

use faer::{Col, ColRef, Mat, MatRef, unzip, zip};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::linalg::power::{spectral_radius, top_singular_pair};
use crate::linalg::vector_ops::{dot, relative_change};
use crate::pmd::momentum::Nesterov;
use crate::prox::{Penalty, ProxOp, ProximalOperator};
use crate::{DecompositionError, E, EIGENVALUE_REGULARIZATION, I, Status};

/// Optimizer variants for the inner updates.
///
/// The accelerated variants share one momentum schedule and differ only in
/// where normalization is inserted: [`Accelerated`](Optimizer::Accelerated)
/// rescales each side as soon as its inner loop finishes, while
/// [`TwoWayAccelerated`](Optimizer::TwoWayAccelerated) runs both inner
/// loops and rescales the pair jointly afterwards. Both converge to the
/// same stationary set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Optimizer {
    #[default]
    ProximalGradient,
    Accelerated,
    TwoWayAccelerated,
}

/// Tolerances and iteration caps for a rank-one solve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Settings {
    /// Outer relative-change tolerance.
    pub eps: E,
    /// Outer iteration cap.
    pub max_iter: I,
    /// Inner relative-change tolerance.
    pub eps_inner: E,
    /// Inner iteration cap.
    pub max_iter_inner: I,
    pub optimizer: Optimizer,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            eps: 1e-10,
            max_iter: 1000,
            eps_inner: 1e-10,
            max_iter_inner: 1000,
            optimizer: Optimizer::ProximalGradient,
        }
    }
}

/// Penalty, sparsity level and smoothing for one side of the decomposition.
#[derive(Debug, Clone, Default)]
pub struct SideSpec {
    pub penalty: Penalty,
    /// Sparsity level λ ≥ 0.
    pub lambda: E,
    /// Smoothing strength α ≥ 0.
    pub alpha: E,
    /// Smoothing operator Ω, symmetric positive semi-definite.
    pub omega: Option<Mat<E>>,
}

impl SideSpec {
    pub fn new(penalty: Penalty, lambda: E) -> Self {
        Self {
            penalty,
            lambda,
            alpha: 0.,
            omega: None,
        }
    }

    /// No sparsity and no smoothing on this side.
    pub fn unpenalized() -> Self {
        Self::default()
    }

    /// Adds the smoothing operator Ω with strength α.
    pub fn with_smoothing(mut self, alpha: E, omega: Mat<E>) -> Self {
        self.alpha = alpha;
        self.omega = Some(omega);
        self
    }

    fn validate(&self) -> Result<(), DecompositionError> {
        if !(self.lambda >= 0.) {
            return Err(DecompositionError::NegativeLambda { value: self.lambda });
        }
        if !(self.alpha >= 0.) {
            return Err(DecompositionError::NegativeAlpha { value: self.alpha });
        }
        if self.alpha > 0. && self.omega.is_none() {
            return Err(DecompositionError::SmoothingWithoutMatrix { alpha: self.alpha });
        }
        self.penalty.validate()
    }

    /// Builds the runtime state for an iterate of length `dim`.
    fn prepare(&self, dim: I) -> Result<SideState, DecompositionError> {
        if let Some(omega) = &self.omega {
            if omega.nrows() != dim || omega.ncols() != dim {
                return Err(DecompositionError::SmoothingShapeMismatch {
                    expected: dim,
                    nrows: omega.nrows(),
                    ncols: omega.ncols(),
                });
            }
        }
        let smoothing = match (&self.omega, self.alpha > 0.) {
            (Some(omega), true) => {
                let scale = dim as E * self.alpha;
                Some(Mat::from_fn(dim, dim, |i, j| {
                    let eye = if i == j { 1. } else { 0. };
                    eye + scale * omega[(i, j)]
                }))
            }
            _ => None,
        };
        // ρ(I) = 1 on the fast path, no power iteration needed
        let lipschitz = match &smoothing {
            Some(s) => spectral_radius(s.as_ref()) + EIGENVALUE_REGULARIZATION,
            None => 1. + EIGENVALUE_REGULARIZATION,
        };
        Ok(SideState {
            smoothing,
            lipschitz,
            lambda: self.lambda,
            prox: self.penalty.build(dim)?,
        })
    }
}

/// Per-side state owned by a single solve.
struct SideState {
    /// `S = I + k·α·Ω`; `None` means `S = I`.
    smoothing: Option<Mat<E>>,
    /// Gradient step bound `L = ρ(S) + ε_reg`.
    lipschitz: E,
    lambda: E,
    prox: ProxOp,
}

impl SideState {
    /// One inner proximal-gradient loop. `drive` is the fixed linear term
    /// of this side's subproblem: `X·v` for the u-side, `Xᵀ·u` for the
    /// v-side.
    fn proximal_loop(
        &mut self,
        w: &mut Col<E>,
        drive: ColRef<'_, E>,
        use_momentum: bool,
        eps_inner: E,
        max_iter: I,
    ) -> Status {
        let n = w.nrows();
        let mut schedule = Nesterov::new();
        // previous proximal output; with momentum, `w` holds the
        // extrapolated point the gradient is evaluated at
        let mut anchor = w.clone();
        for _ in 0..max_iter {
            let pull = match &self.smoothing {
                Some(s) => s * w.as_ref(),
                None => w.clone(),
            };
            let inv = 1. / self.lipschitz;
            let mut point = Col::<E>::zeros(n);
            zip!(&mut point, &*w, drive, &pull).for_each(|unzip!(point, w, drive, pull)| {
                *point = *w + inv * (*drive - *pull)
            });

            let next = self.prox.threshold(point.as_ref(), self.lambda / self.lipschitz);

            let change = relative_change(next.as_ref(), anchor.as_ref());
            if use_momentum {
                let coef = schedule.coefficient();
                let mut combined = Col::<E>::zeros(n);
                zip!(&mut combined, &next, &anchor).for_each(|unzip!(combined, next, anchor)| {
                    *combined = *next + coef * (*next - *anchor)
                });
                anchor = next;
                *w = combined;
            } else {
                anchor = next.clone();
                *w = next;
            }

            if change < eps_inner {
                *w = anchor.clone();
                return Status::Optimal;
            }
        }
        // expose the proximal output, not the extrapolated point
        *w = anchor.clone();
        warn!("inner proximal-gradient loop stopped at the {max_iter}-iteration cap");
        Status::IterationLimit
    }

    /// Rescales onto the ellipsoid `wᵀ S w = 1`; a degenerate iterate
    /// becomes the zero vector.
    fn normalize(&self, w: &mut Col<E>) {
        let m = match &self.smoothing {
            Some(s) => {
                let sw = s * w.as_ref();
                dot(w.as_ref(), sw.as_ref()).sqrt()
            }
            None => w.norm_l2(),
        };
        if m > 0. {
            *w = (1. / m) * &*w;
        } else {
            *w = Col::zeros(w.nrows());
        }
    }
}

/// One extracted component: `u` and `v` are unit vectors under `S_u`, `S_v`
/// (or zero), and `d = uᵀ X v`.
#[derive(Debug, Clone)]
pub struct RankOneFactor {
    pub u: Col<E>,
    pub v: Col<E>,
    pub d: E,
    pub status: Status,
}

/// A configured decomposition problem.
///
/// Construction validates penalty and smoothing parameters; data-dependent
/// checks happen on entry to [`solve`](Decomposition::solve). Iteration
/// caps are reported through the returned [`Status`] and the log, never as
/// errors.
#[derive(Debug, Clone)]
pub struct Decomposition {
    u: SideSpec,
    v: SideSpec,
    settings: Settings,
}

impl Decomposition {
    pub fn new(u: SideSpec, v: SideSpec, settings: Settings) -> Result<Self, DecompositionError> {
        u.validate()?;
        v.validate()?;
        Ok(Self { u, v, settings })
    }

    /// Runs one rank-one solve against `x`.
    pub fn solve(&mut self, x: MatRef<'_, E>) -> Result<RankOneFactor, DecompositionError> {
        for j in 0..x.ncols() {
            for i in 0..x.nrows() {
                if !x[(i, j)].is_finite() {
                    return Err(DecompositionError::NonFiniteInput);
                }
            }
        }
        let mut side_u = self.u.prepare(x.nrows())?;
        let mut side_v = self.v.prepare(x.ncols())?;

        let (mut u, mut v, sigma) = top_singular_pair(x);
        debug!("initialized from the top singular pair, sigma = {sigma:.6e}");

        let Settings {
            eps,
            max_iter,
            eps_inner,
            max_iter_inner,
            optimizer,
        } = self.settings;
        let use_momentum = optimizer != Optimizer::ProximalGradient;
        let joint_normalization = optimizer == Optimizer::TwoWayAccelerated;

        let mut iter = 0;
        let status = loop {
            iter += 1;
            let u_prev = u.clone();
            let v_prev = v.clone();

            let drive_u = x * v.as_ref();
            side_u.proximal_loop(&mut u, drive_u.as_ref(), use_momentum, eps_inner, max_iter_inner);
            if !joint_normalization {
                side_u.normalize(&mut u);
            }

            let drive_v = x.transpose() * u.as_ref();
            side_v.proximal_loop(&mut v, drive_v.as_ref(), use_momentum, eps_inner, max_iter_inner);
            if joint_normalization {
                side_u.normalize(&mut u);
            }
            side_v.normalize(&mut v);

            let change = relative_change(u.as_ref(), u_prev.as_ref())
                + relative_change(v.as_ref(), v_prev.as_ref());
            if change < eps {
                break Status::Optimal;
            }
            if iter >= max_iter {
                warn!("rank-one solve stopped at the {max_iter}-iteration cap");
                break Status::IterationLimit;
            }
        };
        debug!("rank-one solve finished after {iter} outer iterations, status {status:?}");

        let xv = x * v.as_ref();
        let d = dot(u.as_ref(), xv.as_ref());
        Ok(RankOneFactor { u, v, d, status })
    }

    /// Extracts the top `k` components, deflating `x` in place between
    /// rank-one solves.
    pub fn decompose(
        &mut self,
        x: &mut Mat<E>,
        k: I,
    ) -> Result<Vec<RankOneFactor>, DecompositionError> {
        let mut factors = Vec::with_capacity(k);
        for extracted in 0..k {
            let factor = self.solve(x.as_ref())?;
            if extracted + 1 < k {
                deflate(x, factor.u.as_ref(), factor.v.as_ref(), factor.d);
            }
            factors.push(factor);
        }
        Ok(factors)
    }
}

/// In-place rank-one downdate `X ← X − d·u·vᵀ`.
pub fn deflate(x: &mut Mat<E>, u: ColRef<'_, E>, v: ColRef<'_, E>, d: E) {
    for j in 0..x.ncols() {
        for i in 0..x.nrows() {
            x[(i, j)] -= d * u[i] * v[j];
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rstest_reuse::{apply, template};

    use super::*;
    use crate::prox::Penalty;

    #[template]
    #[rstest]
    fn optimizer_cases(
        #[values(
            Optimizer::ProximalGradient,
            Optimizer::Accelerated,
            Optimizer::TwoWayAccelerated
        )]
        optimizer: Optimizer,
    ) {
    }

    /// Second-difference smoother on a chain: tridiagonal, PSD.
    fn chain_laplacian(n: I) -> Mat<E> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                if i == 0 || i == n - 1 { 1. } else { 2. }
            } else if i.abs_diff(j) == 1 {
                -1.
            } else {
                0.
            }
        })
    }

    fn noise_matrix(n: I, p: I, seed: u64) -> Mat<E> {
        // small LCG, enough for deterministic test fixtures
        let mut state = seed;
        Mat::from_fn(n, p, |_, _| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as E) / ((1u64 << 31) as E) - 1.
        })
    }

    #[test]
    fn test_validation_rejects_bad_side_parameters() {
        let negative_lambda = SideSpec::new(Penalty::lasso(), -1.);
        assert_eq!(
            Decomposition::new(negative_lambda, SideSpec::unpenalized(), Settings::default())
                .unwrap_err(),
            DecompositionError::NegativeLambda { value: -1. }
        );

        let mut negative_alpha = SideSpec::unpenalized();
        negative_alpha.alpha = -0.5;
        negative_alpha.omega = Some(Mat::<E>::zeros(3, 3));
        assert_eq!(
            Decomposition::new(SideSpec::unpenalized(), negative_alpha, Settings::default())
                .unwrap_err(),
            DecompositionError::NegativeAlpha { value: -0.5 }
        );

        let mut missing_omega = SideSpec::unpenalized();
        missing_omega.alpha = 0.5;
        assert_eq!(
            Decomposition::new(missing_omega, SideSpec::unpenalized(), Settings::default())
                .unwrap_err(),
            DecompositionError::SmoothingWithoutMatrix { alpha: 0.5 }
        );

        let bad_gamma = SideSpec::new(
            Penalty::Scad {
                gamma: 1.,
                nonneg: false,
            },
            0.1,
        );
        assert!(
            Decomposition::new(bad_gamma, SideSpec::unpenalized(), Settings::default()).is_err()
        );
    }

    #[test]
    fn test_solve_rejects_bad_inputs() {
        let mut problem = Decomposition::new(
            SideSpec::unpenalized().with_smoothing(0.5, chain_laplacian(4)),
            SideSpec::unpenalized(),
            Settings::default(),
        )
        .unwrap();

        // Ω is 4x4 but X has 5 rows
        let x = noise_matrix(5, 3, 7);
        assert_eq!(
            problem.solve(x.as_ref()).unwrap_err(),
            DecompositionError::SmoothingShapeMismatch {
                expected: 5,
                nrows: 4,
                ncols: 4
            }
        );

        let mut with_nan = noise_matrix(4, 3, 7);
        with_nan[(2, 1)] = E::NAN;
        assert_eq!(
            problem.solve(with_nan.as_ref()).unwrap_err(),
            DecompositionError::NonFiniteInput
        );
    }

    #[apply(optimizer_cases)]
    fn test_normalization_invariant(optimizer: Optimizer) {
        let n = 6;
        let p = 5;
        let x = noise_matrix(n, p, 11);
        let omega = chain_laplacian(n);
        let alpha = 0.5;

        let settings = Settings {
            optimizer,
            ..Settings::default()
        };
        let mut problem = Decomposition::new(
            SideSpec::new(Penalty::lasso(), 0.1).with_smoothing(alpha, omega.clone()),
            SideSpec::new(Penalty::lasso(), 0.1),
            settings,
        )
        .unwrap();
        let factor = problem.solve(x.as_ref()).unwrap();

        // uᵀ S_u u ∈ {0, 1}
        let s = Mat::from_fn(n, n, |i, j| {
            let eye = if i == j { 1. } else { 0. };
            eye + n as E * alpha * omega[(i, j)]
        });
        let su = &s * factor.u.as_ref();
        let quad = dot(factor.u.as_ref(), su.as_ref());
        assert!(
            quad.abs() < 1e-12 || (quad - 1.).abs() < 1e-6,
            "uᵀS_u u = {quad}"
        );
        let vnorm = factor.v.norm_l2();
        assert!(vnorm.abs() < 1e-12 || (vnorm - 1.).abs() < 1e-6);
    }

    #[test]
    fn test_inner_objective_is_monotone() {
        let n = 8;
        let drive = Col::from_fn(n, |i| ((i * 7 + 3) % 5) as E - 2.);
        let lambda = 0.4;
        let spec = SideSpec::new(Penalty::lasso(), lambda);

        let objective = |w: &Col<E>| {
            let mut value = 0.;
            for i in 0..n {
                value += 0.5 * w[i] * w[i] - w[i] * drive[i] + lambda * w[i].abs();
            }
            value
        };

        let start = Col::from_fn(n, |i| if i % 2 == 0 { 0.5 } else { -0.5 });
        let mut previous = objective(&start);
        for steps in 1..=8 {
            let mut side = spec.prepare(n).unwrap();
            let mut w = start.clone();
            // eps_inner = 0 forces exactly `steps` iterations
            side.proximal_loop(&mut w, drive.as_ref(), false, 0., steps);
            let value = objective(&w);
            assert!(
                value <= previous + 1e-12,
                "objective rose from {previous} to {value} at step {steps}"
            );
            previous = value;
        }
    }

    #[test]
    fn test_deflate_removes_rank_one_matrix() {
        let u = Col::from_fn(4, |i| [0.5, -0.5, 0.5, -0.5][i]);
        let v = Col::from_fn(3, |i| [0.6, 0.8, 0.][i]);
        let d = 2.5;
        let mut x = Mat::from_fn(4, 3, |i, j| d * u[i] * v[j]);

        deflate(&mut x, u.as_ref(), v.as_ref(), d);
        for j in 0..3 {
            for i in 0..4 {
                assert!(x[(i, j)].abs() < 1e-14);
            }
        }
    }

    #[apply(optimizer_cases)]
    fn test_optimizers_agree_on_easy_problem(optimizer: Optimizer) {
        let a = Col::from_fn(5, |i| [0.2, -0.4, 0.6, 0.5, -0.4][i]);
        let b = Col::from_fn(4, |i| [0.5, 0.5, -0.5, 0.5][i]);
        let mut x = Mat::from_fn(5, 4, |i, j| 3. * a[i] * b[j]);
        let noise = noise_matrix(5, 4, 23);
        for j in 0..4 {
            for i in 0..5 {
                x[(i, j)] += 0.01 * noise[(i, j)];
            }
        }

        let mut plain = Decomposition::new(
            SideSpec::new(Penalty::lasso(), 0.01),
            SideSpec::new(Penalty::lasso(), 0.01),
            Settings::default(),
        )
        .unwrap();
        let baseline = plain.solve(x.as_ref()).unwrap();

        let mut problem = Decomposition::new(
            SideSpec::new(Penalty::lasso(), 0.01),
            SideSpec::new(Penalty::lasso(), 0.01),
            Settings {
                optimizer,
                ..Settings::default()
            },
        )
        .unwrap();
        let factor = problem.solve(x.as_ref()).unwrap();

        assert!((factor.d - baseline.d).abs() < 1e-4 * baseline.d.abs().max(1.));
    }
}

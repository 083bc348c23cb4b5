//! Proximal operator of the graph-fused lasso penalty.
//!
//! Solves `argmin_b ½‖b − x‖² + λ·Σ_{i<j} W_ij |b_i − b_j|` over an
//! arbitrary weighted graph. Two splittings are available:
//!
//! - **ADMM**, following Algorithm 5 of Hu, Chi and Allen, *ADMM
//!   Algorithmic Regularization Paths for Sparse Statistical Machine
//!   Learning*: auxiliaries `z_ij = b_i − b_j` with scaled duals `u_ij`.
//! - **AMA**, the dual projected-gradient scheme of Chi and Lange,
//!   *Splitting Methods for Convex Clustering*, optionally with Nesterov
//!   momentum on the multiplier matrix.
//!
//! Both warm-start from the splitting state retained by the operator across
//! calls; the state lives exactly as long as the enclosing rank-one solve
//! that owns the operator.

use faer::{Col, ColRef, Mat, MatRef};
use log::warn;

use crate::linalg::vector_ops::relative_change;
use crate::pmd::momentum::Nesterov;
use crate::prox::ProximalOperator;
use crate::{DecompositionError, E, I};

/// Iteration cap shared by the ADMM and AMA loops.
pub(crate) const MAX_FUSION_ITER: I = 10_000;

/// Splitting state retained between invocations within one enclosing solve.
#[derive(Debug, Clone, Default)]
pub(crate) struct FusionCache {
    /// ADMM auxiliaries `z`.
    splits: Option<Mat<E>>,
    /// ADMM scaled duals `u`, or the AMA multiplier matrix.
    multipliers: Option<Mat<E>>,
}

/// Proximal operator of the graph-fused lasso penalty.
#[derive(Debug, Clone)]
pub struct GraphFusedLasso {
    /// Strict upper triangle of the edge weights.
    weights: Mat<E>,
    admm: bool,
    accel: bool,
    prox_eps: E,
    /// AMA dual step `1 / min(n, max edge degree)`, degrees counted over
    /// positive-weight edges; 0 when the graph has no such edge.
    step: E,
    cache: FusionCache,
}

impl GraphFusedLasso {
    pub fn new(
        weights: MatRef<'_, E>,
        admm: bool,
        accel: bool,
        prox_eps: E,
    ) -> Result<Self, DecompositionError> {
        Self::check(weights, admm, accel, prox_eps)?;
        let n = weights.nrows();
        let upper = Mat::from_fn(n, n, |i, j| if j > i { weights[(i, j)] } else { 0. });
        let step = ama_step(upper.as_ref());
        Ok(Self {
            weights: upper,
            admm,
            accel,
            prox_eps,
            step,
            cache: FusionCache::default(),
        })
    }

    /// Construction-time validation, shared with the penalty factory.
    pub(crate) fn check(
        weights: MatRef<'_, E>,
        admm: bool,
        accel: bool,
        prox_eps: E,
    ) -> Result<(), DecompositionError> {
        if weights.nrows() != weights.ncols() {
            return Err(DecompositionError::WeightNotSquare {
                nrows: weights.nrows(),
                ncols: weights.ncols(),
            });
        }
        if weights.nrows() <= 2 {
            return Err(DecompositionError::FusionTooSmall);
        }
        for i in 0..weights.nrows() {
            for j in (i + 1)..weights.ncols() {
                if !(weights[(i, j)] >= 0.) {
                    return Err(DecompositionError::NegativeWeight);
                }
            }
        }
        if !(prox_eps > 0.) {
            return Err(DecompositionError::NonPositiveProxTolerance { value: prox_eps });
        }
        if admm && accel {
            return Err(DecompositionError::AcceleratedAdmm);
        }
        Ok(())
    }

}

impl ProximalOperator for GraphFusedLasso {
    fn threshold(&mut self, x: ColRef<'_, E>, lambda: E) -> Col<E> {
        debug_assert_eq!(x.nrows(), self.weights.nrows());
        if self.step == 0. {
            // no positive-weight edge: the penalty is empty
            return x.to_owned();
        }
        if self.admm {
            admm_fusion(x, self.weights.as_ref(), lambda, self.prox_eps, &mut self.cache).0
        } else {
            ama_fusion(
                x,
                self.weights.as_ref(),
                lambda,
                self.prox_eps,
                self.step,
                self.accel,
                &mut self.cache,
            )
            .0
        }
    }
}

/// Dual step size `1 / min(n, max edge degree)` over positive-weight edges.
fn ama_step(upper: MatRef<'_, E>) -> E {
    let n = upper.nrows();
    let mut degree = vec![0usize; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if upper[(i, j)] > 0. {
                degree[i] += 1;
                degree[j] += 1;
            }
        }
    }
    let mut max_edge_degree = 0;
    for i in 0..n {
        for j in (i + 1)..n {
            if upper[(i, j)] > 0. {
                max_edge_degree = max_edge_degree.max(degree[i] + degree[j]);
            }
        }
    }
    if max_edge_degree == 0 {
        0.
    } else {
        1. / (n.min(max_edge_degree) as E)
    }
}

/// ADMM splitting. Returns the primal iterate and the iteration count.
pub(crate) fn admm_fusion(
    x: ColRef<'_, E>,
    weights: MatRef<'_, E>,
    lambda: E,
    eps: E,
    cache: &mut FusionCache,
) -> (Col<E>, I) {
    let n = x.nrows();
    let mut mean = 0.;
    for i in 0..n {
        mean += x[i];
    }
    mean /= n as E;

    let mut z = cache
        .splits
        .take()
        .filter(|m| m.nrows() == n)
        .unwrap_or_else(|| Mat::<E>::zeros(n, n));
    let mut u = cache
        .multipliers
        .take()
        .filter(|m| m.nrows() == n)
        .unwrap_or_else(|| Mat::<E>::zeros(n, n));
    let mut b = Col::<E>::zeros(n);

    let mut iterations = 0;
    loop {
        iterations += 1;
        let b_prev = b.clone();

        // b-update from the row and column sums of z + u: O(n) per entry
        let mut row = vec![0.; n];
        let mut col = vec![0.; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let s = z[(i, j)] + u[(i, j)];
                row[i] += s;
                col[j] += s;
            }
        }
        for i in 0..n {
            b[i] = (x[i] + n as E * mean + row[i] - col[i]) / (n as E + 1.);
        }

        // z- and u-updates per ordered pair; every pair splits, the weight
        // only controls the shrinkage
        for i in 0..n {
            for j in (i + 1)..n {
                let gap = b[i] - b[j];
                let t = gap - u[(i, j)];
                let bound = lambda * weights[(i, j)];
                z[(i, j)] = if t == 0. {
                    0.
                } else {
                    (1. - bound / t.abs()).max(0.) * t
                };
                u[(i, j)] += z[(i, j)] - gap;
            }
        }

        let change = relative_change(b.as_ref(), b_prev.as_ref());
        if change <= eps {
            break;
        }
        if iterations >= MAX_FUSION_ITER {
            warn!("graph fusion prox (ADMM) stopped at the {MAX_FUSION_ITER}-iteration cap");
            break;
        }
    }

    cache.splits = Some(z);
    cache.multipliers = Some(u);
    (b, iterations)
}

/// AMA dual projected gradient. Returns the primal iterate and the
/// iteration count.
pub(crate) fn ama_fusion(
    x: ColRef<'_, E>,
    weights: MatRef<'_, E>,
    lambda: E,
    eps: E,
    step: E,
    accel: bool,
    cache: &mut FusionCache,
) -> (Col<E>, I) {
    let n = x.nrows();
    let mut multipliers = cache
        .multipliers
        .take()
        .filter(|m| m.nrows() == n)
        .unwrap_or_else(|| Mat::<E>::zeros(n, n));
    let mut previous = multipliers.clone();
    let mut working = multipliers.clone();
    let mut schedule = Nesterov::new();
    let mut u = Col::<E>::zeros(n);

    let mut iterations = 0;
    loop {
        iterations += 1;

        // projected dual gradient step from the working point
        for i in 0..n {
            for j in (i + 1)..n {
                let bound = lambda * weights[(i, j)];
                let stepped = working[(i, j)] - step * (u[i] - u[j]);
                multipliers[(i, j)] = stepped.max(-bound).min(bound);
            }
        }

        if accel {
            let coef = schedule.coefficient();
            for i in 0..n {
                for j in (i + 1)..n {
                    let current = multipliers[(i, j)];
                    working[(i, j)] = current + coef * (current - previous[(i, j)]);
                    previous[(i, j)] = current;
                }
            }
        } else {
            working = multipliers.clone();
        }

        // primal update from the working multipliers
        let u_prev = u.clone();
        let mut row = vec![0.; n];
        let mut col = vec![0.; n];
        for i in 0..n {
            for j in (i + 1)..n {
                let m = working[(i, j)];
                row[i] += m;
                col[j] += m;
            }
        }
        for i in 0..n {
            u[i] = x[i] + row[i] - col[i];
        }

        let change = relative_change(u.as_ref(), u_prev.as_ref());
        if change <= eps {
            break;
        }
        if iterations >= MAX_FUSION_ITER {
            warn!("graph fusion prox (AMA) stopped at the {MAX_FUSION_ITER}-iteration cap");
            break;
        }
    }

    cache.multipliers = Some(multipliers);
    (u, iterations)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::prox::fused::OrderedFusedLasso;

    fn col(values: &[E]) -> Col<E> {
        Col::from_fn(values.len(), |i| values[i])
    }

    fn complete_weights(n: I) -> Mat<E> {
        Mat::from_fn(n, n, |i, j| if i != j { 1. } else { 0. })
    }

    fn chain_weights(n: I) -> Mat<E> {
        Mat::from_fn(n, n, |i, j| if j == i + 1 { 1. } else { 0. })
    }

    #[rstest]
    fn test_complete_graph_fuses_to_mean(#[values(true, false)] admm: bool) {
        let x = col(&[0., 0., 10., 10.]);
        let mut prox =
            GraphFusedLasso::new(complete_weights(4).as_ref(), admm, false, 1e-10).unwrap();
        let out = prox.threshold(x.as_ref(), 20.);
        for i in 0..4 {
            assert!((out[i] - 5.).abs() < 1e-6, "out[{i}] = {}", out[i]);
        }
    }

    #[test]
    fn test_admm_and_ama_agree() {
        let x = col(&[1., 3., 2., 4.]);
        let weights = complete_weights(4);

        let mut admm = GraphFusedLasso::new(weights.as_ref(), true, false, 1e-8).unwrap();
        let mut ama = GraphFusedLasso::new(weights.as_ref(), false, false, 1e-8).unwrap();

        let out_admm = admm.threshold(x.as_ref(), 0.5);
        let out_ama = ama.threshold(x.as_ref(), 0.5);
        for i in 0..4 {
            assert!(
                (out_admm[i] - out_ama[i]).abs() <= 1e-4,
                "coordinate {i}: {} vs {}",
                out_admm[i],
                out_ama[i]
            );
        }
    }

    #[rstest]
    fn test_chain_graph_matches_ordered_solver(#[values(true, false)] admm: bool) {
        let x = col(&[0.3, -1.2, 2.4, 2.5, -0.7]);
        let lambda = 0.7;
        let exact = OrderedFusedLasso::solve(x.as_ref(), lambda);

        let mut prox = GraphFusedLasso::new(chain_weights(5).as_ref(), admm, false, 1e-10).unwrap();
        let out = prox.threshold(x.as_ref(), lambda);
        for i in 0..5 {
            assert!(
                (out[i] - exact[i]).abs() <= 1e-4,
                "coordinate {i}: {} vs {}",
                out[i],
                exact[i]
            );
        }
    }

    #[test]
    fn test_accelerated_ama_matches_plain() {
        let x = col(&[2., -1., 0.5, 1.5]);
        let weights = complete_weights(4);

        let mut plain = GraphFusedLasso::new(weights.as_ref(), false, false, 1e-10).unwrap();
        let mut fast = GraphFusedLasso::new(weights.as_ref(), false, true, 1e-10).unwrap();

        let out_plain = plain.threshold(x.as_ref(), 0.3);
        let out_fast = fast.threshold(x.as_ref(), 0.3);
        for i in 0..4 {
            assert!((out_plain[i] - out_fast[i]).abs() <= 1e-4);
        }
    }

    #[test]
    fn test_warm_start_accelerates_second_call() {
        let x = col(&[1., 3., 2., 4., 0.]);
        let weights = complete_weights(5);
        let mut cache = FusionCache::default();

        let (_, cold) = admm_fusion(x.as_ref(), weights.as_ref(), 0.4, 1e-10, &mut cache);
        let (_, warm) = admm_fusion(x.as_ref(), weights.as_ref(), 0.4, 1e-10, &mut cache);
        assert!(
            warm < cold,
            "warm start took {warm} iterations, cold start {cold}"
        );
    }

    #[test]
    fn test_no_positive_edges_is_identity() {
        let x = col(&[1., -2., 3.]);
        let weights = Mat::<E>::zeros(3, 3);
        let mut prox = GraphFusedLasso::new(weights.as_ref(), true, false, 1e-8).unwrap();
        let out = prox.threshold(x.as_ref(), 5.);
        for i in 0..3 {
            assert_eq!(out[i], x[i]);
        }
    }

    #[test]
    fn test_construction_validation() {
        let rect = Mat::<E>::zeros(3, 4);
        assert_eq!(
            GraphFusedLasso::new(rect.as_ref(), true, false, 1e-8).unwrap_err(),
            DecompositionError::WeightNotSquare { nrows: 3, ncols: 4 }
        );

        let small = Mat::<E>::zeros(2, 2);
        assert_eq!(
            GraphFusedLasso::new(small.as_ref(), true, false, 1e-8).unwrap_err(),
            DecompositionError::FusionTooSmall
        );

        let negative = Mat::from_fn(3, 3, |i, j| if j > i { -1. } else { 0. });
        assert_eq!(
            GraphFusedLasso::new(negative.as_ref(), true, false, 1e-8).unwrap_err(),
            DecompositionError::NegativeWeight
        );

        let ok = complete_weights(3);
        assert_eq!(
            GraphFusedLasso::new(ok.as_ref(), true, false, 0.).unwrap_err(),
            DecompositionError::NonPositiveProxTolerance { value: 0. }
        );
        assert_eq!(
            GraphFusedLasso::new(ok.as_ref(), true, true, 1e-8).unwrap_err(),
            DecompositionError::AcceleratedAdmm
        );
    }
}

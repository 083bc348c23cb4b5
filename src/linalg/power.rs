//! Power-iteration primitives for the decomposition solvers.
//!
//! The outer solver needs two spectral quantities: the spectral radius of a
//! symmetric positive semi-definite smoothing operator (to bound the
//! gradient step size) and the top singular pair of the data matrix (to
//! initialize the iterates). Both are obtained by power iteration on dense
//! `faer` matrices; the matrices involved are small enough that no shifted
//! or blocked variant is needed.

use faer::{Col, MatRef};

use crate::{E, I};

/// Relative tolerance on successive spectral estimates.
const POWER_EPS: E = 1e-12;
/// Iteration cap for the power iterations.
const POWER_MAX_ITER: I = 1000;

/// Deterministic unit-norm starting vector. Entries must vary with the
/// index: a uniform vector is orthogonal to the dominant eigenvector of
/// some structured operators.
fn starting_vector(n: I) -> Col<E> {
    let q = Col::from_fn(n, |i| 1. + (i as E) / (n as E));
    let norm = q.norm_l2();
    (1. / norm) * &q
}

/// Spectral radius of a symmetric positive semi-definite matrix.
///
/// Power iteration converges to the largest eigenvalue for PSD input; ties
/// across the dominant eigenspace do not affect the value.
pub fn spectral_radius(s: MatRef<'_, E>) -> E {
    let n = s.nrows();
    if n == 0 {
        return 0.;
    }

    let mut q = starting_vector(n);
    let mut value = E::from(0.);
    for _ in 0..POWER_MAX_ITER {
        let z = s * q.as_ref();
        let norm = z.norm_l2();
        if norm == 0. {
            // the start vector is annihilated; treat the operator as zero
            return 0.;
        }
        q = (1. / norm) * &z;

        if (norm - value).abs() <= POWER_EPS * norm.max(1.) {
            return norm;
        }
        value = norm;
    }
    value
}

/// Top singular triplet `(u, v, sigma)` of a dense matrix.
///
/// Alternating power iteration: `u ∝ X v`, `v ∝ Xᵀ u`. Returns zero vectors
/// and `sigma = 0` when the iteration collapses (e.g. `X = 0`).
pub fn top_singular_pair(x: MatRef<'_, E>) -> (Col<E>, Col<E>, E) {
    let (n, p) = (x.nrows(), x.ncols());
    if n == 0 || p == 0 {
        return (Col::zeros(n), Col::zeros(p), 0.);
    }

    let mut v = starting_vector(p);
    let mut u = Col::<E>::zeros(n);
    let mut sigma = E::from(0.);
    for _ in 0..POWER_MAX_ITER {
        let xv = x * v.as_ref();
        let norm_u = xv.norm_l2();
        if norm_u == 0. {
            return (Col::zeros(n), Col::zeros(p), 0.);
        }
        u = (1. / norm_u) * &xv;

        let xtu = x.transpose() * u.as_ref();
        let norm_v = xtu.norm_l2();
        if norm_v == 0. {
            return (Col::zeros(n), Col::zeros(p), 0.);
        }
        v = (1. / norm_v) * &xtu;

        // ‖Xᵀu‖ is the current singular-value estimate
        if (norm_v - sigma).abs() <= POWER_EPS * norm_v.max(1.) {
            return (u, v, norm_v);
        }
        sigma = norm_v;
    }
    (u, v, sigma)
}

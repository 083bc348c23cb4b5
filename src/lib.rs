use derive_more::{Display, Error};

pub type E = f64;
pub type I = usize;

pub mod linalg;
pub mod pmd;
pub mod prox;

#[cfg(test)]
pub mod tests;

/// Nugget added to the spectral radius of a smoothing operator when forming
/// gradient step sizes. Difficult smoothing matrices can carry artificially
/// small eigenvalues; the nugget keeps the step size bounded away from the
/// ill-conditioned regime.
pub const EIGENVALUE_REGULARIZATION: E = 0.01;

/// Status codes for the decomposition solvers.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Status {
    #[default]
    /// The solver is still running.
    InProgress,
    /// The iterate satisfied the convergence tolerance.
    Optimal,
    /// The solver stopped at the iteration cap; the iterate is best-effort.
    IterationLimit,
}

/// Errors raised while configuring or running a penalized decomposition.
///
/// Configuration errors are raised when a problem or penalty is constructed;
/// input errors are raised on entry to a solve. Iteration caps are not
/// errors: the solvers log a warning and return the current iterate.
#[derive(Debug, Display, Error, PartialEq)]
pub enum DecompositionError {
    #[display("gamma = {gamma} is below the {kind} minimum of {min}")]
    GammaOutOfRange { kind: &'static str, gamma: E, min: E },

    #[display("lambda must be non-negative, got {value}")]
    NegativeLambda { value: E },

    #[display("smoothing strength alpha must be non-negative, got {value}")]
    NegativeAlpha { value: E },

    #[display("smoothing requested with alpha = {alpha} but no smoothing matrix was supplied")]
    SmoothingWithoutMatrix { alpha: E },

    #[display("smoothing matrix must be {expected}x{expected}, got {nrows}x{ncols}")]
    SmoothingShapeMismatch { expected: I, nrows: I, ncols: I },

    #[display("grouping vector has length {got}, expected {expected}")]
    GroupLengthMismatch { got: I, expected: I },

    #[display("group labels must form a contiguous range 1..=G")]
    GroupLabelsNotContiguous,

    #[display("fusion weight matrix must be square, got {nrows}x{ncols}")]
    WeightNotSquare { nrows: I, ncols: I },

    #[display("fusion weight matrix has dimension {got}, expected {expected}")]
    WeightDimensionMismatch { got: I, expected: I },

    #[display("fusion edge weights must be non-negative")]
    NegativeWeight,

    #[display("graph fusion needs more than two coordinates; use the ordered fused lasso")]
    FusionTooSmall,

    #[display("prox tolerance must be positive, got {value}")]
    NonPositiveProxTolerance { value: E },

    #[display("non-negative variants are not available for fused penalties")]
    NonNegativeFusion,

    #[display("the accelerated ADMM fusion solver is not available")]
    AcceleratedAdmm,

    #[display("data matrix contains non-finite entries")]
    NonFiniteInput,
}

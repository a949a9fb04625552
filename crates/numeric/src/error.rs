//! Error type for fixed-point arithmetic and the quadratic solver.

use thiserror::Error;

/// Errors raised by exact arithmetic.
///
/// Every variant is fatal to the engine call that triggered it: the caller
/// rolls back to the entry state and surfaces the error to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumericError {
    /// Denominator was zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The quadratic discriminant was negative; no real root exists.
    #[error("negative discriminant in quadratic")]
    NegativeDiscriminant,

    /// The leading coefficient of the quadratic was not positive.
    #[error("non-positive leading coefficient in quadratic")]
    NonPositiveLeadingCoefficient,

    /// The requested root was not strictly positive.
    #[error("quadratic has no positive root")]
    NonPositiveRoot,

    /// An intermediate value did not fit the widened integer width.
    #[error("fixed-point overflow")]
    Overflow,

    /// A fixed-point literal could not be parsed.
    #[error("invalid fixed-point literal: {input}")]
    InvalidLiteral {
        /// The rejected input.
        input: String,
    },
}

//! Error taxonomy for the engine.
//!
//! Recoverable per-order problems never surface as `Err`: the offending
//! order becomes an `ORDER_REJECTED` event carrying a [`RejectReason`] and
//! the rest of the batch proceeds. Everything in [`EngineError`] is fatal to
//! the current call; the engine rolls the state back to its entry value
//! before returning.

use omx_numeric::{Amount, NumericError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fatal errors surfaced to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Exact arithmetic failed (negative discriminant, division by zero,
    /// overflow, or a penalty that could not bound the price).
    #[error("numeric error: {0}")]
    Numeric(#[from] NumericError),

    /// A state invariant failed at a mutation boundary.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// A resolution precondition failed.
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// A parameter value is outside its validated range.
    #[error("invalid parameter `{field}`: {message}")]
    Params {
        /// Name of the offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// The state blob could not be decoded.
    #[error("malformed state blob: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Creates a parameter validation error.
    pub fn params(field: &'static str, message: impl Into<String>) -> Self {
        Self::Params {
            field,
            message: message.into(),
        }
    }

    /// Creates an invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Returns true if the error indicates corrupted state rather than bad
    /// input, i.e. the host should treat it as an incident.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Numeric(_) | Self::Invariant(_))
    }
}

/// Preconditions of `trigger_resolution` that can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Intermediate rounds require `mr_enabled`.
    #[error("intermediate resolution requires mr_enabled")]
    IntermediateDisabled,

    /// The outcome index is outside `0..n_outcomes`.
    #[error("unknown outcome {outcome}")]
    UnknownOutcome {
        /// The rejected index.
        outcome: usize,
    },

    /// The outcome was eliminated in an earlier round.
    #[error("outcome {outcome} is already inactive")]
    AlreadyInactive {
        /// The rejected index.
        outcome: usize,
    },

    /// An intermediate round must leave at least one active outcome.
    #[error("elimination would leave no active outcome")]
    NoActiveRemaining,

    /// The cumulative eliminations would exceed N-1.
    #[error("eliminations exceed schedule: {attempted} total vs budget {budget}")]
    ScheduleExceeded {
        /// Eliminations after this round.
        attempted: u32,
        /// N-1.
        budget: u32,
    },

    /// NO-side payout would exceed the binary's pool.
    #[error("NO payout {payout} exceeds pool {pool} on outcome {outcome}")]
    PayoutExceedsPool {
        /// The eliminated outcome.
        outcome: usize,
        /// Total face value owed.
        payout: Amount,
        /// Effective pool L at the time of the round.
        pool: Amount,
    },

    /// YES-side payout at final resolution would exceed the winner's pool.
    #[error("YES payout {payout} exceeds pool {pool} on winning outcome {outcome}")]
    WinnerPayoutExceedsPool {
        /// The winning outcome.
        outcome: usize,
        /// Total face value owed.
        payout: Amount,
        /// Effective pool L.
        pool: Amount,
    },
}

/// Reason codes attached to `ORDER_REJECTED` events.
///
/// These are the recoverable `InputError`/`SlippageRejection` kinds: the
/// order is dropped, the batch continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The outcome was eliminated in a prior resolution round.
    InactiveOutcome,
    /// The outcome index is outside `0..n_outcomes`.
    UnknownOutcome,
    /// Order size must be strictly positive.
    NonPositiveSize,
    /// LIMIT orders must carry a limit price.
    MissingLimitPrice,
    /// The limit price is outside `[p_min, p_max]`.
    LimitPriceOutOfRange,
    /// The limit price is not a multiple of the tick size.
    LimitPriceOffTick,
    /// Realized slippage exceeded the order's `max_slippage`.
    SlippageExceeded,
}

impl RejectReason {
    /// Stable reason string used in event payloads and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InactiveOutcome => "inactive_outcome",
            Self::UnknownOutcome => "unknown_outcome",
            Self::NonPositiveSize => "non_positive_size",
            Self::MissingLimitPrice => "missing_limit_price",
            Self::LimitPriceOutOfRange => "limit_price_out_of_range",
            Self::LimitPriceOffTick => "limit_price_off_tick",
            Self::SlippageExceeded => "slippage_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_error_display() {
        let err = EngineError::params("gamma", "must be in (0, 0.001]");
        assert!(err.to_string().contains("gamma"));
        assert!(err.to_string().contains("(0, 0.001]"));
    }

    #[test]
    fn test_numeric_errors_are_internal() {
        let err = EngineError::from(NumericError::DivisionByZero);
        assert!(err.is_internal());
        assert!(EngineError::invariant("L must be positive").is_internal());
    }

    #[test]
    fn test_resolution_errors_are_not_internal() {
        let err = EngineError::from(ResolutionError::IntermediateDisabled);
        assert!(!err.is_internal());
    }

    #[test]
    fn test_reject_reason_serde_is_snake_case() {
        let json = serde_json::to_string(&RejectReason::SlippageExceeded).unwrap();
        assert_eq!(json, "\"slippage_exceeded\"");
    }

    #[test]
    fn test_reject_reason_str_matches_serde() {
        for reason in [
            RejectReason::InactiveOutcome,
            RejectReason::UnknownOutcome,
            RejectReason::NonPositiveSize,
            RejectReason::MissingLimitPrice,
            RejectReason::LimitPriceOutOfRange,
            RejectReason::LimitPriceOffTick,
            RejectReason::SlippageExceeded,
        ] {
            let json = serde_json::to_string(&reason).unwrap();
            assert_eq!(json, format!("\"{}\"", reason.as_str()));
        }
    }
}

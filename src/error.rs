//! Error taxonomy for the automation engine
//!
//! The scheduler cares about classification more than about payloads:
//! transient failures retry at the next iteration, recognized conflicts
//! are idempotent skips, validation failures abandon one item, and setup
//! failures abort before the loop starts.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Network or node failure against the ledger or the oracle.
    /// Retried at the next scheduler iteration.
    #[error("transient I/O failure: {0}")]
    Transient(String),

    /// The ledger reported the recognized "already matched/settled"
    /// abort code. Expected under concurrent activity, never fatal.
    #[error("already matched or settled (abort code {code})")]
    AlreadyHandled { code: u64 },

    /// No quotation could be obtained for the named tokens. Callers must
    /// abandon the current operation rather than substitute a price.
    #[error("missing price data for tokens: {tokens:?}")]
    MissingPriceData { tokens: Vec<String> },

    /// The specific bid pair or match cannot proceed; other items in the
    /// same phase continue.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Precondition failure before the loop starts; nothing runs.
    #[error("fatal setup error: {0}")]
    Setup(String),
}

impl EngineError {
    pub fn transient(err: impl std::fmt::Display) -> Self {
        EngineError::Transient(err.to_string())
    }

    /// Retryable at the next iteration without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    /// Logged as skipped, never counted as a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, EngineError::AlreadyHandled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(EngineError::transient("timeout").is_retryable());
        assert!(EngineError::AlreadyHandled { code: 7 }.is_skip());
        assert!(!EngineError::Validation("bad".into()).is_retryable());
        assert!(!EngineError::Setup("no capability".into()).is_skip());
    }
}

/// Errors that can occur while evaluating rules.
///
/// Scope matters here: `SourceUnavailable` aborts the whole tick (retried on
/// the next one), everything else is confined to the single rule that
/// produced it.
///
/// # Examples
///
/// ```rust
/// use tripwire_engine::error::EngineError;
///
/// let err = EngineError::InvalidCondition("unknown operator: ~=".to_string());
/// assert!(err.to_string().contains("~="));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The rule set could not be enumerated. The current tick is skipped.
    #[error("Engine: rule source unavailable: {0}")]
    SourceUnavailable(String),

    /// The metric store did not answer within its deadline.
    #[error("Engine: metric query timed out: {0}")]
    QueryTimeout(String),

    /// The metric store answered with an error.
    #[error("Engine: metric query failed: {0}")]
    Query(String),

    /// The rule's condition cannot be compiled (unknown operator or
    /// aggregation, non-finite threshold, zero cooldown). Such a rule never
    /// fires and the error repeats every tick until the rule is corrected
    /// externally.
    #[error("Engine: invalid condition: {0}")]
    InvalidCondition(String),

    /// The alert could not be durably recorded. Dispatch is suppressed for
    /// this fire.
    #[error("Engine: alert persistence failed: {0}")]
    Persistence(String),

    /// The cooldown backend failed the check-and-set call.
    #[error("Engine: cooldown store error: {0}")]
    Cooldown(String),
}

/// Convenience `Result` alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

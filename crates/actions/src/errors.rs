//! Error types for rule actions

use rulegate_core_types::{Classify, ContextError, ErrorCode, RuleAction};
use thiserror::Error;

/// Errors returned by the action hooks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The matched rule denies the query.
    #[error("disallowed due to rule: {description} (rule: {rule}, action: {action})")]
    Disallowed {
        rule: String,
        description: String,
        action: RuleAction,
        retryable: bool,
    },

    /// The concurrency gate has no room left in its queue.
    #[error("concurrency control protection: too many queued transactions ({queued} >= {limit})")]
    QueueFull { queued: usize, limit: usize },

    /// The caller's context ended while waiting for a slot.
    #[error(transparent)]
    Context(#[from] ContextError),

    /// Rejected configuration blob.
    #[error("invalid action params: {0}")]
    InvalidParams(#[from] ParamsError),
}

impl ActionError {
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl Classify for ActionError {
    fn code(&self) -> ErrorCode {
        match self {
            ActionError::Disallowed {
                retryable: true, ..
            } => ErrorCode::FailedPrecondition,
            ActionError::Disallowed { .. } => ErrorCode::InvalidArgument,
            ActionError::QueueFull { .. } => ErrorCode::ResourceExhausted,
            ActionError::Context(err) => err.code(),
            ActionError::InvalidParams(_) => ErrorCode::InvalidArgument,
        }
    }
}

/// Rejections produced while validating concurrency-control params.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParamsError {
    #[error("malformed params: {0}")]
    Malformed(String),

    #[error("max_queue_size must not be negative, got {0}")]
    NegativeQueueSize(i64),

    #[error("max_concurrency must be -1 or greater, got {0}")]
    ConcurrencyBelowMinimum(i64),

    #[error("max_queue_size must be 0 when max_concurrency is -1, got {0}")]
    UnboundedWithQueue(i64),

    #[error("max_queue_size must be 0 when max_concurrency is 0, got {0}")]
    DisabledWithQueue(i64),

    #[error("max_queue_size ({queue}) must be at least max_concurrency ({concurrency})")]
    QueueBelowConcurrency { queue: i64, concurrency: i64 },
}

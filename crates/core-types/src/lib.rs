use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Classification attached to every error that crosses the action boundary.
///
/// The query executor maps these onto its transport-level codes; only
/// `FailedPrecondition` is treated as transient by retrying callers.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    InvalidArgument,
    FailedPrecondition,
    ResourceExhausted,
    DeadlineExceeded,
    Canceled,
    Unknown,
}

impl ErrorCode {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCode::FailedPrecondition)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::Canceled => "CANCELED",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know their own classification.
pub trait Classify {
    fn code(&self) -> ErrorCode;
}

/// Why a context stopped being live.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl Classify for ContextError {
    fn code(&self) -> ErrorCode {
        match self {
            ContextError::Canceled => ErrorCode::Canceled,
            ContextError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("unknown rule action: {0}")]
pub struct UnknownRuleAction(pub String);

/// What a rule does with the queries it matches.
#[cfg_attr(
    feature = "serde-full",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RuleAction {
    Continue,
    Fail,
    FailRetry,
    ConcurrencyControl,
}

impl RuleAction {
    pub const ALL: [RuleAction; 4] = [
        RuleAction::Continue,
        RuleAction::Fail,
        RuleAction::FailRetry,
        RuleAction::ConcurrencyControl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RuleAction::Continue => "CONTINUE",
            RuleAction::Fail => "FAIL",
            RuleAction::FailRetry => "FAIL_RETRY",
            RuleAction::ConcurrencyControl => "CONCURRENCY_CONTROL",
        }
    }
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleAction {
    type Err = UnknownRuleAction;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
        RuleAction::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| UnknownRuleAction(raw.to_string()))
    }
}

impl TryFrom<String> for RuleAction {
    type Error = UnknownRuleAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleAction> for String {
    fn from(value: RuleAction) -> Self {
        value.as_str().to_string()
    }
}

/// A loaded query rule. The action layer only reads it.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub action: RuleAction,
}

impl Rule {
    pub fn new(description: impl Into<String>, name: impl Into<String>, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule={} action={}", self.name, self.action)
    }
}

/// Result rows produced by the executor, or short-circuited by an action.
#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryResult {
    pub rows_affected: u64,
    pub row_count: u64,
}

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ContextId(pub String);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission slots a context currently holds, keyed by the granting gate.
#[derive(Debug, Default)]
pub struct AdmissionMark {
    held: Mutex<Vec<(u64, usize)>>,
}

impl AdmissionMark {
    pub fn mark(&self, gate: u64) {
        let mut held = self.held.lock();
        match held.iter_mut().find(|(id, _)| *id == gate) {
            Some((_, count)) => *count += 1,
            None => held.push((gate, 1)),
        }
    }

    /// Gives back one slot held from `gate`. Returns false when that gate
    /// granted nothing to this context.
    pub fn take(&self, gate: u64) -> bool {
        let mut held = self.held.lock();
        let Some(pos) = held.iter().position(|(id, _)| *id == gate) else {
            return false;
        };
        held[pos].1 -= 1;
        if held[pos].1 == 0 {
            held.swap_remove(pos);
        }
        true
    }

    /// Slots held from `gate`.
    pub fn held_by(&self, gate: u64) -> usize {
        self.held
            .lock()
            .iter()
            .find(|(id, _)| *id == gate)
            .map_or(0, |(_, count)| *count)
    }

    /// Slots held across all gates.
    pub fn held(&self) -> usize {
        self.held.lock().iter().map(|(_, count)| count).sum()
    }
}

/// Per-query execution context handed to the action hooks.
#[derive(Debug)]
pub struct ExecutionContext {
    id: ContextId,
    query: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    admission: AdmissionMark,
}

impl ExecutionContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            id: ContextId::new(),
            query: query.into(),
            cancel: CancellationToken::new(),
            deadline: None,
            admission: AdmissionMark::default(),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Keeps the earlier of the current and the new deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> &ContextId {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn admission(&self) -> &AdmissionMark {
        &self.admission
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Non-blocking check; `None` while the context is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            return Some(ContextError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the token is cancelled or the deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => ContextError::Canceled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                ContextError::Canceled
            }
        }
    }
}

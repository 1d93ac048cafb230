use rulegate_actions::ActionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleCenterError {
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid rule set: {0}")]
    Invalid(String),
    #[error("unknown rule: {0}")]
    UnknownRule(String),
    #[error("duplicate rule: {0}")]
    DuplicateRule(String),
    #[error("rule {rule}: {source}")]
    Action {
        rule: String,
        #[source]
        source: ActionError,
    },
}

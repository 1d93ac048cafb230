use std::sync::Arc;

use rulegate_core_types::{Rule, RuleAction};
use tracing::debug;

use crate::action::ActionRef;
use crate::builtin::{ContinueAction, FailAction, FailRetryAction};
use crate::concurrency::ConcurrencyControlAction;
use crate::errors::ActionError;

/// Builds the action named by `rule.action` with default tunables.
pub fn create_action(rule: Arc<Rule>) -> ActionRef {
    match rule.action {
        RuleAction::Continue => Arc::new(ContinueAction),
        RuleAction::Fail => Arc::new(FailAction::new(rule)),
        RuleAction::FailRetry => Arc::new(FailRetryAction::new(rule)),
        RuleAction::ConcurrencyControl => Arc::new(ConcurrencyControlAction::new(rule)),
    }
}

/// Like [`create_action`], then applies `params` if given. Nothing is returned
/// when the params are rejected.
pub fn build_action(rule: Arc<Rule>, params: Option<&str>) -> Result<ActionRef, ActionError> {
    let name = rule.name.clone();
    let action = create_action(rule);
    if let Some(raw) = params {
        action.set_params(raw)?;
    }
    debug!(rule = %name, action = %action.kind(), "action built");
    Ok(action)
}

//! Stateless actions.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use rulegate_core_types::{ExecutionContext, QueryResult, Rule, RuleAction};

use crate::action::{Action, ActionExecutionResponse};
use crate::errors::ActionError;

/// Lets every query through.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContinueAction;

#[async_trait]
impl Action for ContinueAction {
    async fn before_execution(
        &self,
        _ctx: &ExecutionContext,
    ) -> Result<Option<QueryResult>, ActionError> {
        Ok(None)
    }

    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        _result: Option<&QueryResult>,
        _error: Option<&(dyn Error + Send + Sync)>,
    ) -> ActionExecutionResponse {
        ActionExecutionResponse
    }

    fn set_params(&self, _raw: &str) -> Result<(), ActionError> {
        Ok(())
    }

    fn rule(&self) -> Option<Arc<Rule>> {
        None
    }

    fn kind(&self) -> RuleAction {
        RuleAction::Continue
    }
}

fn disallowed(rule: &Rule, action: RuleAction, retryable: bool) -> ActionError {
    ActionError::Disallowed {
        rule: rule.name.clone(),
        description: rule.description.clone(),
        action,
        retryable,
    }
}

/// Denies every query with a permanent error.
#[derive(Clone, Debug)]
pub struct FailAction {
    rule: Arc<Rule>,
}

impl FailAction {
    pub fn new(rule: Arc<Rule>) -> Self {
        Self { rule }
    }
}

#[async_trait]
impl Action for FailAction {
    async fn before_execution(
        &self,
        _ctx: &ExecutionContext,
    ) -> Result<Option<QueryResult>, ActionError> {
        Err(disallowed(&self.rule, RuleAction::Fail, false))
    }

    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        _result: Option<&QueryResult>,
        _error: Option<&(dyn Error + Send + Sync)>,
    ) -> ActionExecutionResponse {
        ActionExecutionResponse
    }

    fn set_params(&self, _raw: &str) -> Result<(), ActionError> {
        Ok(())
    }

    fn rule(&self) -> Option<Arc<Rule>> {
        Some(Arc::clone(&self.rule))
    }

    fn kind(&self) -> RuleAction {
        RuleAction::Fail
    }
}

/// Denies every query with an error retrying callers treat as transient.
#[derive(Clone, Debug)]
pub struct FailRetryAction {
    rule: Arc<Rule>,
}

impl FailRetryAction {
    pub fn new(rule: Arc<Rule>) -> Self {
        Self { rule }
    }
}

#[async_trait]
impl Action for FailRetryAction {
    async fn before_execution(
        &self,
        _ctx: &ExecutionContext,
    ) -> Result<Option<QueryResult>, ActionError> {
        Err(disallowed(&self.rule, RuleAction::FailRetry, true))
    }

    fn after_execution(
        &self,
        _ctx: &ExecutionContext,
        _result: Option<&QueryResult>,
        _error: Option<&(dyn Error + Send + Sync)>,
    ) -> ActionExecutionResponse {
        ActionExecutionResponse
    }

    fn set_params(&self, _raw: &str) -> Result<(), ActionError> {
        Ok(())
    }

    fn rule(&self) -> Option<Arc<Rule>> {
        Some(Arc::clone(&self.rule))
    }

    fn kind(&self) -> RuleAction {
        RuleAction::FailRetry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulegate_core_types::{Classify, ErrorCode};

    fn rule(action: RuleAction) -> Arc<Rule> {
        Arc::new(Rule::new("ruleDescription", "test_rule", action))
    }

    #[tokio::test]
    async fn continue_action_is_inert() {
        let action = ContinueAction;
        let ctx = ExecutionContext::new("select 1");
        assert_eq!(action.before_execution(&ctx).await, Ok(None));
        assert_eq!(
            action.after_execution(&ctx, None, None),
            ActionExecutionResponse
        );
        assert!(action.set_params("").is_ok());
        assert!(action.set_params("{not json").is_ok());
        assert!(action.rule().is_none());
    }

    #[tokio::test]
    async fn fail_action_denies_permanently() {
        let action = FailAction::new(rule(RuleAction::Fail));
        let ctx = ExecutionContext::new("select 1");
        for _ in 0..2 {
            let err = action.before_execution(&ctx).await.unwrap_err();
            assert!(err.to_string().contains("disallowed due to rule"));
            assert!(err.to_string().contains("test_rule"));
            assert!(err.to_string().contains("FAIL"));
            assert_eq!(err.code(), ErrorCode::InvalidArgument);
            assert!(!err.is_retryable());
        }
        assert_eq!(
            action.after_execution(&ctx, None, None),
            ActionExecutionResponse
        );
        assert!(action.set_params("").is_ok());
        assert_eq!(action.rule().unwrap().name, "test_rule");
    }

    #[tokio::test]
    async fn fail_retry_action_is_tagged_failed_precondition() {
        let action = FailRetryAction::new(rule(RuleAction::FailRetry));
        let ctx = ExecutionContext::new("select 1");
        let err = action.before_execution(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("disallowed due to rule"));
        assert_eq!(err.code(), ErrorCode::FailedPrecondition);
        assert!(err.is_retryable());
        assert_eq!(
            action.after_execution(&ctx, None, None),
            ActionExecutionResponse
        );
        assert!(action.set_params("").is_ok());
        assert!(action.rule().is_some());
    }
}

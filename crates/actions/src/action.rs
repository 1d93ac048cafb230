use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use rulegate_core_types::{ExecutionContext, QueryResult, Rule, RuleAction};

use crate::concurrency::ConcurrencyStats;
use crate::errors::ActionError;

/// Value returned from the post-execution hook. Carries nothing yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActionExecutionResponse;

/// Behavior attached to a query rule, invoked around query execution.
#[async_trait]
pub trait Action: Send + Sync + Debug {
    /// Called right before the query runs. An error means the query must not
    /// run; `Ok(Some(result))` short-circuits execution with that result.
    async fn before_execution(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Option<QueryResult>, ActionError>;

    /// Called after every `before_execution`, whether or not the query ran.
    fn after_execution(
        &self,
        ctx: &ExecutionContext,
        result: Option<&QueryResult>,
        error: Option<&(dyn Error + Send + Sync)>,
    ) -> ActionExecutionResponse;

    /// Replaces the action's tunables from a raw config blob. Nothing is
    /// applied when validation fails.
    fn set_params(&self, raw: &str) -> Result<(), ActionError>;

    fn rule(&self) -> Option<Arc<Rule>>;

    fn kind(&self) -> RuleAction;

    /// Gate counters, for actions that admit by capacity.
    fn gate_stats(&self) -> Option<ConcurrencyStats> {
        None
    }
}

pub type ActionRef = Arc<dyn Action>;

//! # Per-rule concurrency gate
//!
//! Admits up to `max_concurrency` executions at once. Callers that find every
//! slot taken wait in a FIFO ticket queue, as long as the number of admitted
//! plus waiting callers stays below `max_queue_size`; beyond that they are
//! rejected right away.
//!
//! ```text
//! NOT_ADMITTED ──► ADMITTED ──► RELEASED
//!      │              ▲
//!      ├─► WAITING ───┘   (slot handed over by a release)
//!      │      └─► ABORTED (context cancelled or deadline passed)
//!      └─► REJECTED       (queue full)
//! ```
//!
//! ## Invariants
//! - Counters and limits change only under the gate lock.
//! - A release hands its slot straight to the oldest waiter, so a free slot
//!   and a non-empty queue never coexist once the lock is dropped.
//! - A waiter that goes away after being handed a slot gives it back.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use rulegate_core_types::{ContextError, ExecutionContext, QueryResult, Rule, RuleAction};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::action::{Action, ActionExecutionResponse};
use crate::errors::{ActionError, ParamsError};
use crate::params::ConcurrencyParams;

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct GateState {
    admitted: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

#[derive(Default)]
struct GateCounters {
    admitted_immediately: AtomicU64,
    admitted_after_wait: AtomicU64,
    rejected_queue_full: AtomicU64,
    aborted: AtomicU64,
    released: AtomicU64,
}

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

struct Gate {
    id: u64,
    state: Mutex<GateState>,
    limits: ArcSwap<ConcurrencyParams>,
    counters: GateCounters,
}

impl Gate {
    fn new(params: ConcurrencyParams) -> Self {
        Self {
            id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(GateState::default()),
            limits: ArcSwap::from_pointee(params),
            counters: GateCounters::default(),
        }
    }

    /// Hands free slots to waiters in ticket order. Caller holds the lock.
    fn promote(&self, state: &mut GateState, limits: &ConcurrencyParams) -> usize {
        let mut granted = 0;
        while limits.slots().map_or(true, |slots| state.admitted < slots) {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            state.admitted += 1;
            granted += 1;
            trace!(ticket = waiter.ticket, admitted = state.admitted, "slot handed to waiter");
            // A closed receiver belongs to a waiter being dropped; its guard returns the slot.
            let _ = waiter.grant.send(());
        }
        granted
    }

    fn release(&self) {
        let mut state = self.state.lock();
        self.free_slot(&mut state);
        increment(&self.counters.released);
        trace!(admitted = state.admitted, waiting = state.waiters.len(), "slot released");
    }

    fn free_slot(&self, state: &mut GateState) {
        state.admitted = state.admitted.saturating_sub(1);
        let limits = self.limits.load_full();
        self.promote(state, &limits);
    }

    /// Withdraws a waiter. If its ticket is gone the slot was already handed
    /// over, so it is passed on without counting as a release.
    fn withdraw(&self, ticket: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.waiters.iter().position(|w| w.ticket == ticket) {
            state.waiters.remove(pos);
            trace!(ticket, waiting = state.waiters.len(), "waiter withdrawn");
            return;
        }
        self.free_slot(&mut state);
        trace!(ticket, admitted = state.admitted, "granted slot handed back");
    }
}

/// Withdraws the waiter when the waiting future ends without taking its slot.
struct WaitGuard<'a> {
    gate: &'a Gate,
    ticket: u64,
    armed: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.gate.withdraw(self.ticket);
        }
    }
}

/// Point-in-time view of a gate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConcurrencyStats {
    pub max_concurrency: i64,
    pub max_queue_size: i64,
    pub admitted: usize,
    pub waiting: usize,
    pub admitted_immediately: u64,
    pub admitted_after_wait: u64,
    pub rejected_queue_full: u64,
    pub aborted: u64,
    pub released: u64,
}

/// Admission controller bound to one rule.
pub struct ConcurrencyControlAction {
    rule: Arc<Rule>,
    gate: Gate,
}

impl ConcurrencyControlAction {
    /// Starts disabled (`max_concurrency = 0`, `max_queue_size = 0`).
    pub fn new(rule: Arc<Rule>) -> Self {
        Self {
            rule,
            gate: Gate::new(ConcurrencyParams::default()),
        }
    }

    pub fn with_params(rule: Arc<Rule>, params: ConcurrencyParams) -> Result<Self, ParamsError> {
        params.validate()?;
        Ok(Self {
            rule,
            gate: Gate::new(params),
        })
    }

    pub fn params(&self) -> ConcurrencyParams {
        **self.gate.limits.load()
    }

    pub fn max_concurrency(&self) -> i64 {
        self.params().max_concurrency
    }

    pub fn max_queue_size(&self) -> i64 {
        self.params().max_queue_size
    }

    /// Swaps in new limits. In-flight admissions and waiters are kept; waiters
    /// are admitted right away if the new limits leave room.
    pub fn reconfigure(&self, params: ConcurrencyParams) -> Result<(), ParamsError> {
        params.validate()?;
        let mut state = self.gate.state.lock();
        self.gate.limits.store(Arc::new(params));
        let promoted = self.gate.promote(&mut state, &params);
        debug!(
            rule = %self.rule.name,
            max_concurrency = params.max_concurrency,
            max_queue_size = params.max_queue_size,
            admitted = state.admitted,
            waiting = state.waiters.len(),
            promoted,
            "concurrency control reconfigured"
        );
        Ok(())
    }

    pub fn stats(&self) -> ConcurrencyStats {
        let state = self.gate.state.lock();
        let params = self.params();
        let counters = &self.gate.counters;
        ConcurrencyStats {
            max_concurrency: params.max_concurrency,
            max_queue_size: params.max_queue_size,
            admitted: state.admitted,
            waiting: state.waiters.len(),
            admitted_immediately: counters.admitted_immediately.load(Ordering::Relaxed),
            admitted_after_wait: counters.admitted_after_wait.load(Ordering::Relaxed),
            rejected_queue_full: counters.rejected_queue_full.load(Ordering::Relaxed),
            aborted: counters.aborted.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
        }
    }

    /// Admits immediately, queues, or rejects. Returns the queue ticket and the
    /// grant receiver when the caller has to wait.
    fn try_admit(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Option<(u64, oneshot::Receiver<()>)>, ActionError> {
        let mut state = self.gate.state.lock();
        let limits = self.gate.limits.load_full();
        let Some(slots) = limits.slots() else {
            return Ok(None);
        };

        if state.admitted < slots {
            state.admitted += 1;
            ctx.admission().mark(self.gate.id);
            increment(&self.gate.counters.admitted_immediately);
            trace!(rule = %self.rule.name, admitted = state.admitted, "admitted");
            return Ok(None);
        }

        let queued = state.admitted + state.waiters.len();
        let limit = limits.queue_limit();
        if queued >= limit {
            increment(&self.gate.counters.rejected_queue_full);
            return Err(ActionError::QueueFull { queued, limit });
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let (grant, granted) = oneshot::channel();
        state.waiters.push_back(Waiter { ticket, grant });
        trace!(rule = %self.rule.name, ticket, waiting = state.waiters.len(), "queued");
        Ok(Some((ticket, granted)))
    }
}

impl fmt::Debug for ConcurrencyControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("ConcurrencyControlAction")
            .field("rule", &self.rule.name)
            .field("max_concurrency", &stats.max_concurrency)
            .field("max_queue_size", &stats.max_queue_size)
            .field("admitted", &stats.admitted)
            .field("waiting", &stats.waiting)
            .finish()
    }
}

#[async_trait]
impl Action for ConcurrencyControlAction {
    async fn before_execution(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Option<QueryResult>, ActionError> {
        let Some((ticket, mut granted)) = self.try_admit(ctx)? else {
            return Ok(None);
        };

        let mut guard = WaitGuard {
            gate: &self.gate,
            ticket,
            armed: true,
        };

        tokio::select! {
            biased;
            grant = &mut granted => {
                guard.armed = false;
                match grant {
                    Ok(()) => {
                        ctx.admission().mark(self.gate.id);
                        increment(&self.gate.counters.admitted_after_wait);
                        Ok(None)
                    }
                    // The sender only goes away together with the gate.
                    Err(_) => Err(ContextError::Canceled.into()),
                }
            }
            reason = ctx.done() => {
                drop(guard);
                increment(&self.gate.counters.aborted);
                trace!(rule = %self.rule.name, ticket, %reason, "waiter aborted");
                Err(reason.into())
            }
        }
    }

    fn after_execution(
        &self,
        ctx: &ExecutionContext,
        _result: Option<&QueryResult>,
        _error: Option<&(dyn Error + Send + Sync)>,
    ) -> ActionExecutionResponse {
        if ctx.admission().take(self.gate.id) {
            self.gate.release();
        }
        ActionExecutionResponse
    }

    fn set_params(&self, raw: &str) -> Result<(), ActionError> {
        let params = ConcurrencyParams::parse(raw)?;
        self.reconfigure(params)?;
        Ok(())
    }

    fn rule(&self) -> Option<Arc<Rule>> {
        Some(Arc::clone(&self.rule))
    }

    fn kind(&self) -> RuleAction {
        RuleAction::ConcurrencyControl
    }

    fn gate_stats(&self) -> Option<ConcurrencyStats> {
        Some(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rulegate_core_types::{Classify, ErrorCode};
    use tokio::task::JoinHandle;
    use tokio::time::{sleep, timeout};
    use tokio_util::sync::CancellationToken;

    fn action(max_queue_size: i64, max_concurrency: i64) -> Arc<ConcurrencyControlAction> {
        let rule = Arc::new(Rule::new(
            "ruleDescription",
            "test_rule",
            RuleAction::ConcurrencyControl,
        ));
        let params = ConcurrencyParams::new(max_queue_size, max_concurrency).unwrap();
        Arc::new(ConcurrencyControlAction::with_params(rule, params).unwrap())
    }

    fn ctx(timeout: Duration) -> ExecutionContext {
        ExecutionContext::new("select * from t1 where a = :a").with_timeout(timeout)
    }

    type Caller = JoinHandle<(Result<Option<QueryResult>, ActionError>, ExecutionContext)>;

    fn spawn_caller(action: &Arc<ConcurrencyControlAction>, deadline: Duration) -> Caller {
        let action = Arc::clone(action);
        tokio::spawn(async move {
            let ctx = ctx(deadline);
            let result = action.before_execution(&ctx).await;
            (result, ctx)
        })
    }

    async fn wait_for_waiting(action: &ConcurrencyControlAction, waiting: usize) {
        timeout(Duration::from_secs(2), async {
            while action.stats().waiting != waiting {
                sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("waiting count not reached");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn queue_full_and_deadline_scenario() {
        let action = action(2, 1);

        let first = ctx(Duration::from_secs(5));
        assert_eq!(action.before_execution(&first).await, Ok(None));

        let waiter = spawn_caller(&action, Duration::from_millis(300));
        wait_for_waiting(&action, 1).await;

        let third = ctx(Duration::from_secs(5));
        let err = action.before_execution(&third).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "concurrency control protection: too many queued transactions (2 >= 2)"
        );
        assert_eq!(err.code(), ErrorCode::ResourceExhausted);

        let (result, _) = waiter.await.unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "context deadline exceeded");
        assert_eq!(err.code(), ErrorCode::DeadlineExceeded);
        assert_eq!(action.stats().waiting, 0);

        // The rejected and aborted contexts never held a slot.
        action.after_execution(&third, None, None);
        assert_eq!(action.stats().admitted, 1);

        assert_eq!(
            action.after_execution(&first, None, None),
            ActionExecutionResponse
        );
        let fresh = ctx(Duration::from_secs(5));
        assert_eq!(action.before_execution(&fresh).await, Ok(None));
        action.after_execution(&fresh, None, None);

        let stats = action.stats();
        assert_eq!(stats.admitted, 0);
        assert_eq!(stats.admitted_immediately, 2);
        assert_eq!(stats.rejected_queue_full, 1);
        assert_eq!(stats.aborted, 1);
        assert_eq!(stats.released, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn expired_context_still_takes_a_free_slot() {
        let action = action(2, 1);
        let expired = ctx(Duration::ZERO);
        assert_eq!(action.before_execution(&expired).await, Ok(None));

        let late = ctx(Duration::ZERO);
        let err = action.before_execution(&late).await.unwrap_err();
        assert_eq!(err, ActionError::Context(ContextError::DeadlineExceeded));
        assert_eq!(action.stats().waiting, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_wakes_exactly_one_waiter_in_order() {
        let action = action(4, 1);
        let holder = ctx(Duration::from_secs(5));
        action.before_execution(&holder).await.unwrap();

        let first = spawn_caller(&action, Duration::from_secs(5));
        wait_for_waiting(&action, 1).await;
        let second = spawn_caller(&action, Duration::from_secs(5));
        wait_for_waiting(&action, 2).await;

        action.after_execution(&holder, None, None);
        let (result, first_ctx) = timeout(Duration::from_secs(1), first)
            .await
            .expect("first waiter admitted")
            .unwrap();
        assert_eq!(result, Ok(None));
        assert_eq!(first_ctx.admission().held(), 1);

        let stats = action.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.waiting, 1);
        assert!(!second.is_finished());

        action.after_execution(&first_ctx, None, None);
        let (result, second_ctx) = timeout(Duration::from_secs(1), second)
            .await
            .expect("second waiter admitted")
            .unwrap();
        assert_eq!(result, Ok(None));
        action.after_execution(&second_ctx, None, None);

        let stats = action.stats();
        assert_eq!((stats.admitted, stats.waiting), (0, 0));
        assert_eq!(stats.admitted_after_wait, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_slots_or_queue() {
        let action = action(5, 2);
        let a = ctx(Duration::from_secs(5));
        let b = ctx(Duration::from_secs(5));
        action.before_execution(&a).await.unwrap();
        action.before_execution(&b).await.unwrap();

        let waiters: Vec<_> = (0..3)
            .map(|_| spawn_caller(&action, Duration::from_secs(5)))
            .collect();
        wait_for_waiting(&action, 3).await;

        let overflow = ctx(Duration::from_secs(5));
        assert_eq!(
            action.before_execution(&overflow).await,
            Err(ActionError::QueueFull {
                queued: 5,
                limit: 5
            })
        );

        action.after_execution(&a, None, None);
        action.after_execution(&b, None, None);
        let mut contexts = Vec::new();
        for waiter in waiters {
            let stats = action.stats();
            assert!(stats.admitted <= 2);
            assert!(stats.waiting <= 3);
            match timeout(Duration::from_millis(200), waiter).await {
                Ok(joined) => {
                    let (result, ctx) = joined.unwrap();
                    assert_eq!(result, Ok(None));
                    contexts.push(ctx);
                }
                Err(_) => panic!("waiter was not admitted"),
            }
            if contexts.len() == 2 {
                let done = contexts.remove(0);
                action.after_execution(&done, None, None);
            }
        }
        for ctx in contexts {
            action.after_execution(&ctx, None, None);
        }
        let stats = action.stats();
        assert_eq!((stats.admitted, stats.waiting), (0, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_waiter_does_not_leak() {
        let action = action(3, 1);
        let holder = ctx(Duration::from_secs(5));
        action.before_execution(&holder).await.unwrap();

        let abandoned = ctx(Duration::from_secs(5));
        let outcome = timeout(Duration::from_millis(50), action.before_execution(&abandoned)).await;
        assert!(outcome.is_err());
        assert_eq!(action.stats().waiting, 0);

        action.after_execution(&holder, None, None);
        assert_eq!(action.stats().admitted, 0);
        // Abandoned context was never admitted.
        action.after_execution(&abandoned, None, None);
        assert_eq!(action.stats().admitted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_is_reported_as_canceled() {
        let action = action(2, 1);
        let holder = ctx(Duration::from_secs(5));
        action.before_execution(&holder).await.unwrap();

        let token = CancellationToken::new();
        let waiting_ctx = ExecutionContext::new("select 1").with_cancellation(token.clone());
        let canceller = tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            token.cancel();
        });
        let err = action.before_execution(&waiting_ctx).await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.to_string(), "context canceled");
        assert_eq!(err.code(), ErrorCode::Canceled);
        assert_eq!(action.stats().waiting, 0);
    }

    #[tokio::test]
    async fn after_execution_is_safe_on_unadmitted_and_repeated_calls() {
        let action = action(2, 1);
        let stranger = ctx(Duration::from_secs(1));
        action.after_execution(&stranger, None, None);
        assert_eq!(action.stats().admitted, 0);

        let holder = ctx(Duration::from_secs(1));
        action.before_execution(&holder).await.unwrap();
        action.after_execution(&holder, None, None);
        action.after_execution(&holder, None, None);
        let stats = action.stats();
        assert_eq!(stats.admitted, 0);
        assert_eq!(stats.released, 1);
    }

    #[tokio::test]
    async fn disabled_encodings_bypass_the_gate() {
        for (queue, concurrency) in [(0, 0), (0, -1)] {
            let action = action(queue, concurrency);
            let mut contexts = Vec::new();
            for _ in 0..16 {
                let ctx = ctx(Duration::ZERO);
                assert_eq!(action.before_execution(&ctx).await, Ok(None));
                assert_eq!(ctx.admission().held(), 0);
                contexts.push(ctx);
            }
            for ctx in &contexts {
                action.after_execution(ctx, None, None);
            }
            let stats = action.stats();
            assert_eq!((stats.admitted, stats.released), (0, 0));
        }
    }

    #[test]
    fn set_params_round_trips_and_rejects_atomically() {
        let rule = Arc::new(Rule::new("d", "r", RuleAction::ConcurrencyControl));
        let action = ConcurrencyControlAction::new(rule);
        assert_eq!(action.params(), ConcurrencyParams::default());

        action
            .set_params(r#"{"max_queue_size": 2, "max_concurrency": 1}"#)
            .unwrap();
        assert_eq!(action.max_queue_size(), 2);
        assert_eq!(action.max_concurrency(), 1);

        for bad in [
            r#"{"max_queue_size": 2.5, "max_concurrency": 1}"#,
            r#"{"max_queue_size": 2, "max_concurrency": "1"}"#,
            r#"{"max_queue_size": -1, "max_concurrency": 1}"#,
            r#"{"max_queue_size": 2, "max_concurrency": -2}"#,
            r#"{"max_queue_size": 2, "max_concurrency": 3}"#,
            r#"{"max_queue_size": 2, "max_concurrency": 0}"#,
            r#"{"max_queue_size": 1, "max_concurrency": -1}"#,
        ] {
            let err = action.set_params(bad).unwrap_err();
            assert!(matches!(err, ActionError::InvalidParams(_)), "{bad}");
            assert_eq!(err.code(), ErrorCode::InvalidArgument);
            assert_eq!((action.max_queue_size(), action.max_concurrency()), (2, 1));
        }

        action
            .set_params(r#"{"max_queue_size": 0, "max_concurrency": 0}"#)
            .unwrap();
        assert_eq!((action.max_queue_size(), action.max_concurrency()), (0, 0));
        action
            .set_params(r#"{"max_queue_size": 0, "max_concurrency": -1}"#)
            .unwrap();
        assert_eq!((action.max_queue_size(), action.max_concurrency()), (0, -1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn raising_concurrency_admits_waiters() {
        let action = action(3, 1);
        let holder = ctx(Duration::from_secs(5));
        action.before_execution(&holder).await.unwrap();
        let waiter = spawn_caller(&action, Duration::from_secs(5));
        wait_for_waiting(&action, 1).await;

        action
            .set_params(r#"{"max_queue_size": 3, "max_concurrency": 2}"#)
            .unwrap();
        let (result, waiter_ctx) = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("promoted")
            .unwrap();
        assert_eq!(result, Ok(None));
        assert_eq!(action.stats().admitted, 2);

        action.after_execution(&holder, None, None);
        action.after_execution(&waiter_ctx, None, None);
        assert_eq!(action.stats().admitted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disabling_releases_every_waiter() {
        let action = action(3, 1);
        let holder = ctx(Duration::from_secs(5));
        action.before_execution(&holder).await.unwrap();
        let waiters: Vec<_> = (0..2)
            .map(|_| spawn_caller(&action, Duration::from_secs(5)))
            .collect();
        wait_for_waiting(&action, 2).await;

        action
            .set_params(r#"{"max_queue_size": 0, "max_concurrency": -1}"#)
            .unwrap();
        let mut contexts = vec![holder];
        for waiter in waiters {
            let (result, ctx) = timeout(Duration::from_secs(1), waiter)
                .await
                .expect("released")
                .unwrap();
            assert_eq!(result, Ok(None));
            contexts.push(ctx);
        }
        assert_eq!(action.stats().admitted, 3);
        for ctx in &contexts {
            action.after_execution(ctx, None, None);
        }
        assert_eq!(action.stats().admitted, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lowering_concurrency_keeps_in_flight_counts() {
        let action = action(4, 2);
        let a = ctx(Duration::from_secs(5));
        let b = ctx(Duration::from_secs(5));
        action.before_execution(&a).await.unwrap();
        action.before_execution(&b).await.unwrap();

        action
            .set_params(r#"{"max_queue_size": 3, "max_concurrency": 1}"#)
            .unwrap();
        assert_eq!(action.stats().admitted, 2);

        let waiter = spawn_caller(&action, Duration::from_secs(5));
        wait_for_waiting(&action, 1).await;

        action.after_execution(&a, None, None);
        let stats = action.stats();
        assert_eq!((stats.admitted, stats.waiting), (1, 1));

        action.after_execution(&b, None, None);
        let (result, waiter_ctx) = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("admitted after both releases")
            .unwrap();
        assert_eq!(result, Ok(None));
        action.after_execution(&waiter_ctx, None, None);
        assert_eq!(action.stats().admitted, 0);
    }

    #[tokio::test]
    async fn release_on_another_gate_is_ignored() {
        let gate_a = action(1, 1);
        let gate_b = action(1, 1);
        let on_a = ctx(Duration::from_secs(5));
        let on_b = ctx(Duration::from_secs(5));
        assert_eq!(gate_a.before_execution(&on_a).await, Ok(None));
        assert_eq!(gate_b.before_execution(&on_b).await, Ok(None));

        gate_b.after_execution(&on_a, None, None);
        assert_eq!(gate_b.stats().admitted, 1);
        assert_eq!(on_a.admission().held(), 1);

        let third = ctx(Duration::from_secs(5));
        assert!(matches!(
            gate_b.before_execution(&third).await,
            Err(ActionError::QueueFull { .. })
        ));

        gate_a.after_execution(&on_a, None, None);
        gate_b.after_execution(&on_b, None, None);
        assert_eq!(gate_a.stats().admitted, 0);
        assert_eq!(gate_b.stats().admitted, 0);
        assert_eq!(on_a.admission().held(), 0);
    }

    #[tokio::test]
    async fn handed_back_slot_keeps_counters_balanced() {
        let action = action(2, 1);
        let holder = ctx(Duration::from_secs(5));
        action.before_execution(&holder).await.unwrap();

        let waiter_ctx = ctx(Duration::from_secs(5));
        let (ticket, granted) = action
            .try_admit(&waiter_ctx)
            .unwrap()
            .expect("caller queued");
        action.after_execution(&holder, None, None);
        assert_eq!(action.stats().admitted, 1);

        // The waiter goes away after its slot was granted but before it ran.
        drop(granted);
        drop(WaitGuard {
            gate: &action.gate,
            ticket,
            armed: true,
        });

        let stats = action.stats();
        assert_eq!((stats.admitted, stats.waiting), (0, 0));
        assert_eq!(stats.released, 1);
        assert_eq!(
            stats.admitted_immediately + stats.admitted_after_wait,
            stats.released + stats.admitted as u64
        );

        let fresh = ctx(Duration::from_secs(5));
        assert_eq!(action.before_execution(&fresh).await, Ok(None));
        action.after_execution(&fresh, None, None);
    }
}

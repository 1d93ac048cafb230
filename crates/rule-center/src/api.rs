use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rulegate_actions::{build_action, ActionRef, ConcurrencyParams};
use rulegate_core_types::{Rule, RuleAction};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::errors::RuleCenterError;
use crate::loader::validate_names;
use crate::model::{RuleSetSpec, RuleSource, RuleSpec};

/// Live registry of rule actions.
#[async_trait]
pub trait RuleCenter: Send + Sync {
    fn action(&self, rule: &str) -> Option<ActionRef>;
    fn rules(&self) -> Vec<Arc<Rule>>;
    fn revision(&self) -> u64;
    /// Reconfigures the live action of `rule` in place.
    async fn apply_params(&self, rule: &str, raw: &str) -> Result<(), RuleCenterError>;
    /// Swaps in a new rule set. Nothing changes if any rule is rejected.
    async fn replace(&self, rule_set: RuleSetSpec) -> Result<(), RuleCenterError>;
    fn subscribe(&self) -> watch::Receiver<u64>;
}

#[derive(Clone, Debug)]
struct RuleEntry {
    rule: Arc<Rule>,
    action: ActionRef,
}

struct CenterState {
    spec: RuleSetSpec,
    rev_counter: u64,
}

pub struct InMemoryRuleCenter {
    entries: DashMap<String, RuleEntry>,
    state: Mutex<CenterState>,
    watch_tx: watch::Sender<u64>,
}

impl InMemoryRuleCenter {
    pub fn new(rule_set: RuleSetSpec) -> Result<Self, RuleCenterError> {
        validate_names(&rule_set)?;
        let entries = DashMap::new();
        for spec in &rule_set.rules {
            entries.insert(spec.name.clone(), build_entry(spec)?);
        }
        let rev_counter = rule_set.rev;
        let (watch_tx, _watch_rx) = watch::channel(rev_counter);
        Ok(Self {
            entries,
            state: Mutex::new(CenterState {
                spec: rule_set,
                rev_counter,
            }),
            watch_tx,
        })
    }

    pub async fn snapshot(&self) -> RuleSetSpec {
        self.state.lock().await.spec.clone()
    }

    fn publish(&self, state: &mut CenterState) {
        state.rev_counter = state.rev_counter.saturating_add(1);
        state.spec.rev = state.rev_counter;
        let listeners = self.watch_tx.receiver_count();
        self.watch_tx.send_replace(state.rev_counter);
        debug!(rev = state.rev_counter, listeners, "rule set revision published");
    }
}

fn build_entry(spec: &RuleSpec) -> Result<RuleEntry, RuleCenterError> {
    let rule = Arc::new(spec.rule());
    let raw = spec.raw_params();
    let action = build_action(Arc::clone(&rule), raw.as_deref()).map_err(|source| {
        RuleCenterError::Action {
            rule: spec.name.clone(),
            source,
        }
    })?;
    Ok(RuleEntry { rule, action })
}

/// Checks params without touching any live action.
fn check_params(spec: &RuleSpec) -> Result<(), RuleCenterError> {
    if spec.action != RuleAction::ConcurrencyControl {
        return Ok(());
    }
    if let Some(raw) = spec.raw_params() {
        ConcurrencyParams::parse(&raw).map_err(|err| RuleCenterError::Action {
            rule: spec.name.clone(),
            source: err.into(),
        })?;
    }
    Ok(())
}

#[async_trait]
impl RuleCenter for InMemoryRuleCenter {
    fn action(&self, rule: &str) -> Option<ActionRef> {
        self.entries.get(rule).map(|entry| Arc::clone(&entry.action))
    }

    fn rules(&self) -> Vec<Arc<Rule>> {
        let mut rules: Vec<_> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(&entry.rule))
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        rules
    }

    fn revision(&self) -> u64 {
        *self.watch_tx.borrow()
    }

    async fn apply_params(&self, rule: &str, raw: &str) -> Result<(), RuleCenterError> {
        let mut state = self.state.lock().await;
        let action = self
            .action(rule)
            .ok_or_else(|| RuleCenterError::UnknownRule(rule.to_string()))?;
        action
            .set_params(raw)
            .map_err(|source| RuleCenterError::Action {
                rule: rule.to_string(),
                source,
            })?;

        let params: serde_json::Value =
            serde_json::from_str(raw).unwrap_or_else(|_| raw.into());
        if let Some(spec) = state.spec.rules.iter_mut().find(|spec| spec.name == rule) {
            spec.params = Some(params);
        }
        state.spec.set_provenance(rule, RuleSource::Runtime);
        self.publish(&mut state);
        debug!(rule, rev = state.rev_counter, "rule params applied");
        Ok(())
    }

    async fn replace(&self, rule_set: RuleSetSpec) -> Result<(), RuleCenterError> {
        validate_names(&rule_set)?;
        for spec in &rule_set.rules {
            check_params(spec)?;
        }

        let mut state = self.state.lock().await;
        let mut next = Vec::with_capacity(rule_set.rules.len());
        for spec in &rule_set.rules {
            let reusable = self
                .entries
                .get(&spec.name)
                .filter(|entry| *entry.rule == spec.rule())
                .map(|entry| entry.clone());
            match reusable {
                Some(entry) => {
                    if let Some(raw) = spec.raw_params() {
                        // Already validated above.
                        if let Err(err) = entry.action.set_params(&raw) {
                            warn!(rule = %spec.name, %err, "params rejected after validation");
                        }
                    }
                    next.push((spec.name.clone(), entry));
                }
                None => next.push((spec.name.clone(), build_entry(spec)?)),
            }
        }

        self.entries
            .retain(|name, _| rule_set.rules.iter().any(|spec| &spec.name == name));
        for (name, entry) in next {
            self.entries.insert(name, entry);
        }

        let mut spec = rule_set;
        let previous = std::mem::take(&mut state.spec.provenance);
        for (name, provenance) in previous {
            if spec.rule(&name).is_some() && !spec.provenance.contains_key(&name) {
                spec.provenance.insert(name, provenance);
            }
        }
        state.spec = spec;
        self.publish(&mut state);
        debug!(
            rules = self.entries.len(),
            rev = state.rev_counter,
            "rule set replaced"
        );
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.watch_tx.subscribe()
    }
}

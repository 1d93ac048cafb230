use std::collections::HashMap;

use rulegate_core_types::{Rule, RuleAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RuleSetSpec {
    #[serde(default)]
    pub rev: u64,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
    #[serde(default, skip_deserializing)]
    pub provenance: HashMap<String, RuleProvenance>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub action: RuleAction,
    /// Either a params object or a raw JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, action: RuleAction) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            action,
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn rule(&self) -> Rule {
        Rule::new(self.description.clone(), self.name.clone(), self.action)
    }

    /// Params in the raw form `Action::set_params` takes.
    pub fn raw_params(&self) -> Option<String> {
        match &self.params {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleProvenance {
    pub rule: String,
    pub source: RuleSource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuleSource {
    File,
    Env,
    Runtime,
}

impl RuleSetSpec {
    pub fn set_provenance(&mut self, rule: &str, source: RuleSource) {
        self.provenance.insert(
            rule.to_string(),
            RuleProvenance {
                rule: rule.to_string(),
                source,
            },
        );
    }

    pub fn rule(&self, name: &str) -> Option<&RuleSpec> {
        self.rules.iter().find(|spec| spec.name == name)
    }

    pub fn rule_mut_ignore_case(&mut self, name: &str) -> Option<&mut RuleSpec> {
        self.rules
            .iter_mut()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
    }
}

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::RuleCenterError;
use crate::model::{RuleSetSpec, RuleSource};

const ENV_PARAMS_PREFIX: &str = "RULEGATE_RULE_PARAMS__";

#[derive(Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
        }
    }
}

pub fn load_rule_set(path: Option<&Path>) -> Result<RuleSetSpec, RuleCenterError> {
    let mut options = LoadOptions::default();
    if let Some(p) = path {
        options.paths.push(p.to_path_buf());
    }
    options.include_env = true;
    load_rule_set_with_options(&options)
}

/// Later files replace same-named rules from earlier ones; env overlays apply last.
pub fn load_rule_set_with_options(options: &LoadOptions) -> Result<RuleSetSpec, RuleCenterError> {
    let mut rule_set = RuleSetSpec::default();

    for path in &options.paths {
        if !path.exists() {
            return Err(RuleCenterError::Io(format!(
                "rules file not found: {}",
                path.display()
            )));
        }
        let overlay = rule_set_from_file(path)?;
        merge_rule_set(&mut rule_set, overlay);
        debug!(path = %path.display(), rules = rule_set.rules.len(), "loaded rules file");
    }

    if options.include_env {
        apply_env_params(&mut rule_set)?;
    }

    Ok(rule_set)
}

fn rule_set_from_file(path: &Path) -> Result<RuleSetSpec, RuleCenterError> {
    let content = fs::read_to_string(path).map_err(|err| RuleCenterError::Io(format!("{}", err)))?;
    let mut rule_set: RuleSetSpec = serde_yaml::from_str(&content)
        .map_err(|err| RuleCenterError::Invalid(format!("{}: {}", path.display(), err)))?;
    validate_names(&rule_set)?;
    let names: Vec<String> = rule_set.rules.iter().map(|spec| spec.name.clone()).collect();
    for name in names {
        rule_set.set_provenance(&name, RuleSource::File);
    }
    Ok(rule_set)
}

fn merge_rule_set(base: &mut RuleSetSpec, overlay: RuleSetSpec) {
    base.rev = base.rev.max(overlay.rev);
    for spec in overlay.rules {
        match base.rules.iter_mut().find(|existing| existing.name == spec.name) {
            Some(existing) => *existing = spec,
            None => base.rules.push(spec),
        }
    }
    base.provenance.extend(overlay.provenance);
}

pub(crate) fn validate_names(rule_set: &RuleSetSpec) -> Result<(), RuleCenterError> {
    let mut seen = HashSet::new();
    for spec in &rule_set.rules {
        let name = spec.name.trim();
        if name.is_empty() {
            return Err(RuleCenterError::Invalid("rule name must not be empty".into()));
        }
        if !seen.insert(name.to_string()) {
            return Err(RuleCenterError::DuplicateRule(name.to_string()));
        }
    }
    Ok(())
}

fn apply_env_params(rule_set: &mut RuleSetSpec) -> Result<(), RuleCenterError> {
    for (key, raw) in env::vars() {
        let Some(stripped) = key.strip_prefix(ENV_PARAMS_PREFIX) else {
            continue;
        };
        if stripped.is_empty() {
            continue;
        }
        let spec = rule_set
            .rule_mut_ignore_case(stripped)
            .ok_or_else(|| RuleCenterError::UnknownRule(stripped.to_string()))?;
        spec.params = Some(parse_env_value(&raw));
        let name = spec.name.clone();
        rule_set.set_provenance(&name, RuleSource::Env);
        debug!(rule = %name, "params overridden from environment");
    }
    Ok(())
}

fn parse_env_value(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rulegate_rule_center::{load_rule_set, InMemoryRuleCenter};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const RULES_ENV: &str = "RULEGATE_RULES";
pub const DEFAULT_RULES_PATH: &str = "config/rules.yaml";

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Priority: `--rules` > `$RULEGATE_RULES` > ./config/rules.yaml
pub fn resolve_rules_path(flag: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = flag {
        return path.clone();
    }
    match env::var(RULES_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_RULES_PATH),
    }
}

pub struct LoadedRules {
    pub center: InMemoryRuleCenter,
    pub path: PathBuf,
}

pub fn load_rules(flag: Option<&PathBuf>) -> Result<LoadedRules> {
    let path = resolve_rules_path(flag);
    let rule_set = load_rule_set(Some(&path))
        .with_context(|| format!("Failed to load rules from {}", path.display()))?;
    let center = InMemoryRuleCenter::new(rule_set)
        .with_context(|| format!("Invalid rule set in {}", path.display()))?;
    info!(path = %path.display(), "Loaded rule set");
    Ok(LoadedRules { center, path })
}

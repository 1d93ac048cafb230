use anyhow::Result;
use rulegate_core_types::RuleAction;
use rulegate_rule_center::{InMemoryRuleCenter, RuleCenter, RuleSource};
use serde::Serialize;

use crate::cli::output::{emit, OutputFormat};
use crate::cli::runtime::LoadedRules;

#[derive(Clone, Debug, Serialize)]
pub struct RulesReport {
    pub path: String,
    pub rev: u64,
    pub rules: Vec<RuleRow>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RuleRow {
    pub name: String,
    pub description: String,
    pub action: RuleAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<RuleSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<i64>,
}

pub async fn describe_rules(center: &InMemoryRuleCenter) -> Vec<RuleRow> {
    let snapshot = center.snapshot().await;
    center
        .rules()
        .into_iter()
        .map(|rule| {
            let stats = center.action(&rule.name).and_then(|action| action.gate_stats());
            RuleRow {
                source: snapshot.provenance.get(&rule.name).map(|p| p.source),
                max_concurrency: stats.as_ref().map(|s| s.max_concurrency),
                max_queue_size: stats.as_ref().map(|s| s.max_queue_size),
                name: rule.name.clone(),
                description: rule.description.clone(),
                action: rule.action,
            }
        })
        .collect()
}

pub async fn cmd_rules(loaded: LoadedRules, output: OutputFormat) -> Result<()> {
    let report = RulesReport {
        path: loaded.path.display().to_string(),
        rev: loaded.center.revision(),
        rules: describe_rules(&loaded.center).await,
    };
    emit(output, &report, print_rules_human)
}

fn print_rules_human(report: &RulesReport) {
    println!("Rules from {} (rev {})", report.path, report.rev);
    if report.rules.is_empty() {
        println!("  (no rules)");
        return;
    }
    for row in &report.rules {
        let limits = match (row.max_concurrency, row.max_queue_size) {
            (Some(concurrency), Some(queue)) => {
                format!(" concurrency={} queue={}", concurrency, queue)
            }
            _ => String::new(),
        };
        let source = row
            .source
            .map(|source| format!(" [{:?}]", source).to_lowercase())
            .unwrap_or_default();
        println!(
            "  {:<24} {:<20}{}{}",
            row.name, row.action, limits, source
        );
        if !row.description.is_empty() {
            println!("      {}", row.description);
        }
    }
}

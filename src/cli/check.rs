use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use rulegate_actions::build_action;
use rulegate_core_types::{Classify, Rule, RuleAction};
use serde::Serialize;

use crate::cli::output::{emit, OutputFormat};

#[derive(Args, Clone, Debug)]
pub struct CheckArgs {
    /// Action kind (CONTINUE, FAIL, FAIL_RETRY, CONCURRENCY_CONTROL)
    #[arg(short, long)]
    pub action: RuleAction,

    /// Params JSON, e.g. '{"max_queue_size": 4, "max_concurrency": 2}'
    #[arg(short, long)]
    pub params: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    pub action: RuleAction,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

/// Builds a detached action of `kind` and applies `params` to it.
pub fn check_params(kind: RuleAction, params: Option<&str>) -> CheckReport {
    let rule = Arc::new(Rule::new("params check", "cli-check", kind));
    match build_action(rule, params) {
        Ok(action) => {
            let stats = action.gate_stats();
            CheckReport {
                action: kind,
                accepted: true,
                max_concurrency: stats.as_ref().map(|s| s.max_concurrency),
                max_queue_size: stats.as_ref().map(|s| s.max_queue_size),
                error: None,
                code: None,
            }
        }
        Err(err) => CheckReport {
            action: kind,
            accepted: false,
            max_concurrency: None,
            max_queue_size: None,
            code: Some(err.code().as_str()),
            error: Some(err.to_string()),
        },
    }
}

pub async fn cmd_check(args: CheckArgs, output: OutputFormat) -> Result<()> {
    let report = check_params(args.action, args.params.as_deref());
    emit(output, &report, print_check_human)?;
    if !report.accepted {
        bail!("params rejected for {}", report.action);
    }
    Ok(())
}

fn print_check_human(report: &CheckReport) {
    if report.accepted {
        println!("✓ {} accepted", report.action);
        if let (Some(concurrency), Some(queue)) = (report.max_concurrency, report.max_queue_size) {
            println!("  max_concurrency: {}", concurrency);
            println!("  max_queue_size:  {}", queue);
        }
    } else {
        println!(
            "✗ {} rejected [{}]: {}",
            report.action,
            report.code.unwrap_or("UNKNOWN"),
            report.error.as_deref().unwrap_or_default()
        );
    }
}

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Args;
use rulegate_actions::{ActionRef, ConcurrencyStats};
use rulegate_core_types::{Classify, ErrorCode, ExecutionContext, RuleAction};
use rulegate_rule_center::{RuleCenter, RuleCenterError};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::cli::output::{emit, OutputFormat};
use crate::cli::runtime::LoadedRules;

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Rule whose action the callers go through
    #[arg(long)]
    pub rule: String,

    /// Number of concurrent callers
    #[arg(short, long, default_value_t = 8)]
    pub callers: usize,

    /// How long each admitted caller holds its slot
    #[arg(long, default_value = "100ms", value_parser = humantime::parse_duration)]
    pub hold: Duration,

    /// Per-caller deadline, measured from its start
    #[arg(long, value_parser = humantime::parse_duration)]
    pub deadline: Option<Duration>,

    /// Delay between caller starts
    #[arg(long, default_value = "0s", value_parser = humantime::parse_duration)]
    pub stagger: Duration,

    /// Params applied to the live rule before the run
    #[arg(short, long)]
    pub params: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub callers: usize,
    pub hold: Duration,
    pub deadline: Option<Duration>,
    pub stagger: Duration,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            callers: 8,
            hold: Duration::from_millis(100),
            deadline: None,
            stagger: Duration::ZERO,
        }
    }
}

impl From<&SimulateArgs> for SimulationOptions {
    fn from(args: &SimulateArgs) -> Self {
        Self {
            callers: args.callers,
            hold: args.hold,
            deadline: args.deadline,
            stagger: args.stagger,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SimulationReport {
    pub rule: String,
    pub action: Option<RuleAction>,
    pub callers: usize,
    pub admitted: usize,
    pub queue_full: usize,
    pub deadline_exceeded: usize,
    pub canceled: usize,
    pub denied: usize,
    pub retryable_denials: usize,
    pub peak_in_flight: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<ConcurrencyStats>,
}

#[derive(Clone, Copy, Debug)]
enum CallerOutcome {
    Admitted,
    Rejected(ErrorCode),
}

#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives `options.callers` concurrent executions through `action`, each one
/// calling `before_execution`, holding for `options.hold` when admitted, and
/// always finishing with `after_execution`.
pub async fn run_simulation(
    rule: &str,
    action: ActionRef,
    options: &SimulationOptions,
) -> Result<SimulationReport> {
    let started = Instant::now();
    let in_flight = Arc::new(InFlight::default());
    let mut tasks: JoinSet<CallerOutcome> = JoinSet::new();

    for index in 0..options.callers {
        if index > 0 && !options.stagger.is_zero() {
            sleep(options.stagger).await;
        }
        let action = Arc::clone(&action);
        let in_flight = Arc::clone(&in_flight);
        let options = options.clone();
        tasks.spawn(async move { drive_caller(index, action, in_flight, &options).await });
    }

    let mut report = SimulationReport {
        rule: rule.to_string(),
        action: Some(action.kind()),
        callers: options.callers,
        ..SimulationReport::default()
    };
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|err| anyhow!("simulated caller failed: {err}"))?;
        match outcome {
            CallerOutcome::Admitted => report.admitted += 1,
            CallerOutcome::Rejected(ErrorCode::ResourceExhausted) => report.queue_full += 1,
            CallerOutcome::Rejected(ErrorCode::DeadlineExceeded) => {
                report.deadline_exceeded += 1
            }
            CallerOutcome::Rejected(ErrorCode::Canceled) => report.canceled += 1,
            CallerOutcome::Rejected(code) => {
                report.denied += 1;
                if code.is_retryable() {
                    report.retryable_denials += 1;
                }
            }
        }
    }

    report.peak_in_flight = in_flight.peak.load(Ordering::SeqCst);
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report.gate = action.gate_stats();
    Ok(report)
}

async fn drive_caller(
    index: usize,
    action: ActionRef,
    in_flight: Arc<InFlight>,
    options: &SimulationOptions,
) -> CallerOutcome {
    let mut ctx = ExecutionContext::new(format!("simulated query #{index}"));
    if let Some(deadline) = options.deadline {
        ctx = ctx.with_timeout(deadline);
    }

    match action.before_execution(&ctx).await {
        Ok(short_circuit) => {
            in_flight.enter();
            sleep(options.hold).await;
            in_flight.leave();
            let result = short_circuit.unwrap_or_default();
            action.after_execution(&ctx, Some(&result), None);
            CallerOutcome::Admitted
        }
        Err(err) => {
            debug!(caller = index, code = %err.code(), %err, "simulated caller rejected");
            let error: &(dyn Error + Send + Sync) = &err;
            action.after_execution(&ctx, None, Some(error));
            CallerOutcome::Rejected(err.code())
        }
    }
}

pub async fn cmd_simulate(
    args: SimulateArgs,
    loaded: LoadedRules,
    output: OutputFormat,
) -> Result<()> {
    let center = &loaded.center;
    if let Some(raw) = args.params.as_deref() {
        center
            .apply_params(&args.rule, raw)
            .await
            .with_context(|| format!("Failed to apply params to rule {}", args.rule))?;
    }
    let action = center
        .action(&args.rule)
        .ok_or_else(|| RuleCenterError::UnknownRule(args.rule.clone()))?;

    let options = SimulationOptions::from(&args);
    info!(
        rule = %args.rule,
        callers = options.callers,
        hold = %humantime::format_duration(options.hold),
        "starting simulation"
    );
    let report = run_simulation(&args.rule, action, &options).await?;
    emit(output, &report, print_simulation_human)
}

fn print_simulation_human(report: &SimulationReport) {
    let kind = report
        .action
        .map(|action| action.to_string())
        .unwrap_or_default();
    println!(
        "Simulated {} callers through rule '{}' ({}) in {}ms",
        report.callers, report.rule, kind, report.elapsed_ms
    );
    println!("  admitted:          {}", report.admitted);
    println!("  queue full:        {}", report.queue_full);
    println!("  deadline exceeded: {}", report.deadline_exceeded);
    println!("  canceled:          {}", report.canceled);
    println!(
        "  denied:            {} ({} retryable)",
        report.denied, report.retryable_denials
    );
    println!("  peak in flight:    {}", report.peak_in_flight);
    if let Some(gate) = &report.gate {
        println!(
            "  gate: concurrency={} queue={} admitted_now={} waiting_now={}",
            gate.max_concurrency, gate.max_queue_size, gate.admitted, gate.waiting
        );
        println!(
            "        immediate={} after_wait={} rejected={} aborted={} released={}",
            gate.admitted_immediately,
            gate.admitted_after_wait,
            gate.rejected_queue_full,
            gate.aborted,
            gate.released
        );
    }
}

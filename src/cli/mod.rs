pub mod check;
pub mod output;
pub mod rules;
pub mod runtime;
pub mod simulate;

pub use check::{check_params, cmd_check, CheckArgs, CheckReport};
pub use output::OutputFormat;
pub use rules::{cmd_rules, describe_rules, RuleRow, RulesReport};
pub use runtime::{init_logging, load_rules, resolve_rules_path, LoadedRules};
pub use simulate::{cmd_simulate, run_simulation, SimulateArgs, SimulationOptions, SimulationReport};

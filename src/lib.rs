//! RuleGate library
//!
//! Exposes the CLI commands for integration testing

pub mod cli;

pub use rulegate_actions as actions;
pub use rulegate_core_types as core_types;
pub use rulegate_rule_center as rule_center;

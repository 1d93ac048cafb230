pub mod api;
pub mod errors;
pub mod loader;
pub mod model;

pub use api::{InMemoryRuleCenter, RuleCenter};
pub use errors::RuleCenterError;
pub use loader::{load_rule_set, load_rule_set_with_options, LoadOptions};
pub use model::{RuleProvenance, RuleSetSpec, RuleSource, RuleSpec};

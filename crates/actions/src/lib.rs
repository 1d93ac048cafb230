//! Query-rule actions
//!
//! A rule matched against a query carries one action. The executor calls
//! [`Action::before_execution`] right before the query would run and
//! [`Action::after_execution`] unconditionally afterwards. Variants:
//! - [`ContinueAction`]: always lets the query run
//! - [`FailAction`]: always denies, not retryable
//! - [`FailRetryAction`]: always denies, tagged as transient
//! - [`ConcurrencyControlAction`]: bounded concurrency with a bounded waiting queue

pub mod action;
pub mod builtin;
pub mod concurrency;
pub mod errors;
pub mod factory;
pub mod params;

pub use action::{Action, ActionExecutionResponse, ActionRef};
pub use builtin::{ContinueAction, FailAction, FailRetryAction};
pub use concurrency::{ConcurrencyControlAction, ConcurrencyStats};
pub use errors::{ActionError, ParamsError};
pub use factory::{build_action, create_action};
pub use params::ConcurrencyParams;

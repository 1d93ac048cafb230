//! Concurrency-control configuration.
//!
//! The wire form is a JSON object with two integer keys:
//! `{"max_queue_size": 2, "max_concurrency": 1}`. Both keys are required.
//! `max_concurrency` of `0` or `-1` disables the gate; either one must come
//! with a queue size of `0`. Otherwise the queue size bounds the number of
//! admitted plus waiting callers and must be at least the concurrency.

use serde::{Deserialize, Serialize};

use crate::errors::ParamsError;

pub const DISABLED_CONCURRENCY: i64 = 0;
pub const UNBOUNDED_CONCURRENCY: i64 = -1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyParams {
    pub max_queue_size: i64,
    pub max_concurrency: i64,
}

impl ConcurrencyParams {
    pub fn new(max_queue_size: i64, max_concurrency: i64) -> Result<Self, ParamsError> {
        let params = Self {
            max_queue_size,
            max_concurrency,
        };
        params.validate()?;
        Ok(params)
    }

    /// Parses and validates a raw params blob.
    pub fn parse(raw: &str) -> Result<Self, ParamsError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|err| ParamsError::Malformed(err.to_string()))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, ParamsError> {
        if !value.is_object() {
            return Err(ParamsError::Malformed("expected a JSON object".into()));
        }
        let params = ConcurrencyParams::deserialize(value)
            .map_err(|err| ParamsError::Malformed(err.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        let Self {
            max_queue_size: queue,
            max_concurrency: concurrency,
        } = *self;
        if queue < 0 {
            return Err(ParamsError::NegativeQueueSize(queue));
        }
        if concurrency < UNBOUNDED_CONCURRENCY {
            return Err(ParamsError::ConcurrencyBelowMinimum(concurrency));
        }
        if concurrency == UNBOUNDED_CONCURRENCY && queue != 0 {
            return Err(ParamsError::UnboundedWithQueue(queue));
        }
        if concurrency == DISABLED_CONCURRENCY && queue != 0 {
            return Err(ParamsError::DisabledWithQueue(queue));
        }
        if concurrency > 0 && queue < concurrency {
            return Err(ParamsError::QueueBelowConcurrency { queue, concurrency });
        }
        Ok(())
    }

    /// True for both disabled encodings (`0` and `-1`).
    pub fn is_disabled(&self) -> bool {
        self.max_concurrency <= DISABLED_CONCURRENCY
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_concurrency == UNBOUNDED_CONCURRENCY
    }

    /// Slot budget; `None` when the gate is disabled.
    pub fn slots(&self) -> Option<usize> {
        usize::try_from(self.max_concurrency)
            .ok()
            .filter(|slots| *slots > 0)
    }

    pub fn queue_limit(&self) -> usize {
        usize::try_from(self.max_queue_size).unwrap_or(0)
    }
}

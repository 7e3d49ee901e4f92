//! Construction-time configuration for sources, stages and sinks.
//!
//! Durations are (de)serialized as integer milliseconds, e.g.
//! `{"batch_size": 100, "wait_after_empty": 2000}`.

use crate::error::{PipelineError, Result};
use crate::gate::AdmissionOrder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of a [`PollingSource`](crate::source::PollingSource)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Items requested per fetch. Also the capacity of the source's buffer.
    pub batch_size: usize,
    pub skip_on_error: bool,
    /// Backoff after a fetch returned no items
    #[serde(with = "millis")]
    pub wait_after_empty: Duration,
    /// Backoff after a fetch returned fewer items than requested
    #[serde(with = "millis")]
    pub wait_after_low: Duration,
    /// Backoff after a failed fetch
    #[serde(with = "millis")]
    pub wait_after_error: Duration,
    /// Treat a short batch as exhaustion and end the stream
    pub auto_stop_on_short_batch: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            skip_on_error: true,
            wait_after_empty: Duration::from_millis(5000),
            wait_after_low: Duration::from_millis(1000),
            wait_after_error: Duration::from_millis(10000),
            auto_stop_on_short_batch: false,
        }
    }
}

impl SourceConfig {
    /// Set the number of items requested per fetch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Report failures as skip events instead of failing the run
    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }

    /// Set the backoff after an empty fetch
    pub fn with_wait_after_empty(mut self, wait: Duration) -> Self {
        self.wait_after_empty = wait;
        self
    }

    /// Set the backoff after a short fetch
    pub fn with_wait_after_low(mut self, wait: Duration) -> Self {
        self.wait_after_low = wait;
        self
    }

    /// Set the backoff after a failed fetch
    pub fn with_wait_after_error(mut self, wait: Duration) -> Self {
        self.wait_after_error = wait;
        self
    }

    /// End the stream on the first short batch
    pub fn with_auto_stop(mut self, auto_stop: bool) -> Self {
        self.auto_stop_on_short_batch = auto_stop;
        self
    }

    /// Reject a zero batch size
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Configuration shared by [`BoundedStage`](crate::stage::BoundedStage) and
/// [`BoundedSink`](crate::sink::BoundedSink)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum number of concurrently outstanding calls
    pub concurrency_limit: usize,
    pub skip_on_error: bool,
    /// Bound for a single transform or consume call
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Order in which admissions parked at the limit are resumed
    pub admission_order: AdmissionOrder,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 10,
            skip_on_error: true,
            timeout: Duration::from_millis(60000),
            admission_order: AdmissionOrder::Fifo,
        }
    }
}

impl WorkerConfig {
    /// Set the maximum number of concurrently outstanding calls
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Report failures as skip events instead of failing the run
    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }

    /// Set the bound for a single call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the order in which parked admissions resume
    pub fn with_admission_order(mut self, order: AdmissionOrder) -> Self {
        self.admission_order = order;
        self
    }

    /// Reject a zero concurrency limit or timeout
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(PipelineError::Config(
                "concurrency_limit must be at least 1".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(PipelineError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

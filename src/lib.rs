//! A continuous, backpressured pipeline for polling external stores.
//!
//! A [`PollingSource`] repeatedly fetches batches of items, zero or more
//! [`BoundedStage`]s transform them with bounded parallelism, and a
//! [`BoundedSink`] consumes them with bounded parallelism. The pipeline never
//! ends on its own: stop the source and everything downstream drains behind it.
//!
//! # Features
//!
//! - Admission gate capping in-flight calls per component, driving pull demand
//! - Adaptive source backoff after empty, short or failed fetches
//! - Per-call timeouts with a distinct timeout error kind
//! - Skip-on-error or fail-fast policy per component
//! - Graceful shutdown: buffered items are delivered, in-flight calls drain
//! - Per-component metrics and optional event channels
//!
//! # Example
//!
//! ```no_run
//! use continuous_pipeline::{
//!     BoundedSink, BoxError, Pipeline, PollingSource, SourceConfig, WorkerConfig,
//! };
//!
//! # async fn example() -> continuous_pipeline::Result<()> {
//! let source = PollingSource::new(SourceConfig::default(), |count: usize| async move {
//!     Ok::<_, BoxError>((0..count as u64).collect::<Vec<_>>())
//! })?;
//! let handle = source.handle();
//!
//! let sink = BoundedSink::new(WorkerConfig::default(), move |row: u64| {
//!     let handle = handle.clone();
//!     async move {
//!         if row == 999 {
//!             handle.stop(false);
//!         }
//!         Ok::<_, BoxError>(())
//!     }
//! })?;
//!
//! Pipeline::from_source(source).sink(sink).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod backpressure;
pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod stage;
mod worker;

// Re-exports for convenience
pub use backpressure::Demand;
pub use buffer::{BufferGauge, BufferReceiver, BufferSender};
pub use config::{SourceConfig, WorkerConfig};
pub use error::{BoxError, ErrorKind, Operation, PipelineError, Result};
pub use event::{Event, EventKind, EventReceiver, EventSender, FailedItem};
pub use gate::{AdmissionGate, AdmissionOrder, GateStatus};
pub use metrics::{ComponentMetrics, LatencySummary, LatencyWindow, MetricsSnapshot};
pub use pipeline::{Pipeline, PipelineBuilder, RunningPipeline};
pub use sink::{BoundedSink, Consume};
pub use source::{Fetch, PollingSource, RunState, SourceHandle};
pub use stage::{BoundedStage, Fanout, Transform};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

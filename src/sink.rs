use crate::buffer::BufferReceiver;
use crate::config::WorkerConfig;
use crate::error::{BoxError, Operation, Result};
use crate::event::EventSender;
use crate::metrics::ComponentMetrics;
use crate::worker::{self, Completion, Retain, Worker};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Writes items to an external store
#[async_trait]
pub trait Consume<T>: Send + Sync + 'static {
    async fn consume(&self, item: T) -> std::result::Result<(), BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> Consume<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn consume(&self, item: T) -> std::result::Result<(), BoxError> {
        (self)(item).await.map_err(Into::into)
    }
}

struct Discard;

#[async_trait]
impl Completion<()> for Discard {
    async fn complete(&mut self, _result: ()) -> bool {
        true
    }
}

/// Terminal component that consumes items with bounded parallelism.
///
/// Items are pulled from upstream only while fewer than
/// `concurrency_limit` consume calls are outstanding. When upstream ends the
/// sink finishes once every outstanding call has settled.
pub struct BoundedSink<T> {
    worker: Worker,
    consume: Arc<dyn Consume<T>>,
    retain: Option<Retain<T>>,
}

impl<T: Send + 'static> BoundedSink<T> {
    /// Create a sink named "sink"
    pub fn new(config: WorkerConfig, consume: impl Consume<T>) -> Result<Self> {
        Self::named("sink", config, consume)
    }

    /// Create a sink with a name used in events, logs and metrics
    pub fn named(name: &str, config: WorkerConfig, consume: impl Consume<T>) -> Result<Self> {
        Ok(Self {
            worker: Worker::new(name, Operation::Consume, config)?,
            consume: Arc::new(consume),
            retain: None,
        })
    }

    /// Keep a clone of every admitted item so that a skipped failure reports
    /// the offending item in [`EventKind::Skipped`](crate::event::EventKind::Skipped)
    pub fn with_failed_items(mut self) -> Self
    where
        T: Clone + Sync,
    {
        self.retain = Some(worker::retain_clone::<T> as Retain<T>);
        self
    }

    /// Send this sink's events to `tx`
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.worker.emitter_mut().attach(tx);
        self
    }

    /// Get a handle to this sink's metrics
    pub fn metrics(&self) -> ComponentMetrics {
        self.worker.metrics()
    }

    /// Get the sink configuration
    pub fn config(&self) -> &WorkerConfig {
        self.worker.config()
    }

    /// Get the sink name
    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Consume everything `input` delivers until it ends and all calls have
    /// drained. Fails on the first error unless `skip_on_error` is set.
    pub async fn run(self, input: BufferReceiver<T>) -> Result<()> {
        let consume = self.consume;
        self.worker
            .run(
                input,
                move |item| {
                    let consume = Arc::clone(&consume);
                    async move { consume.consume(item).await }.boxed()
                },
                self.retain,
                Discard,
            )
            .await
    }
}

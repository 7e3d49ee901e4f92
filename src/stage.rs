use crate::buffer::{BufferReceiver, BufferSender};
use crate::config::WorkerConfig;
use crate::error::{BoxError, Operation, Result};
use crate::event::EventSender;
use crate::metrics::ComponentMetrics;
use crate::worker::{self, Completion, Retain, Worker};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Result of transforming one item: a single item, or any number of items
/// (including none, which filters the input out)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fanout<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Fanout<T> {
    /// Forward exactly one item
    pub fn one(item: T) -> Self {
        Fanout::One(item)
    }

    /// Forward every item in order
    pub fn many(items: Vec<T>) -> Self {
        Fanout::Many(items)
    }

    /// Drop the input item
    pub fn none() -> Self {
        Fanout::Many(Vec::new())
    }

    /// Number of items to forward
    pub fn len(&self) -> usize {
        match self {
            Fanout::One(_) => 1,
            Fanout::Many(items) => items.len(),
        }
    }

    /// Whether the input item is filtered out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert into the items to forward, in order
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Fanout::One(item) => vec![item],
            Fanout::Many(items) => items,
        }
    }
}

impl<T> From<Vec<T>> for Fanout<T> {
    fn from(items: Vec<T>) -> Self {
        Fanout::Many(items)
    }
}

impl<T> From<Option<T>> for Fanout<T> {
    fn from(item: Option<T>) -> Self {
        match item {
            Some(item) => Fanout::One(item),
            None => Fanout::none(),
        }
    }
}

/// Transforms one item into zero, one or many items
#[async_trait]
pub trait Transform<I, O>: Send + Sync + 'static {
    async fn transform(&self, item: I) -> std::result::Result<Fanout<O>, BoxError>;
}

#[async_trait]
impl<I, O, F, Fut, E> Transform<I, O> for F
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Fanout<O>, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn transform(&self, item: I) -> std::result::Result<Fanout<O>, BoxError> {
        (self)(item).await.map_err(Into::into)
    }
}

struct Forward<O> {
    output: BufferSender<O>,
}

#[async_trait]
impl<O: Send + 'static> Completion<Fanout<O>> for Forward<O> {
    async fn complete(&mut self, result: Fanout<O>) -> bool {
        match result {
            Fanout::One(item) => self.output.send(item).await.is_ok(),
            Fanout::Many(items) => {
                for item in items {
                    if self.output.send(item).await.is_err() {
                        return false;
                    }
                }
                true
            }
        }
    }
}

/// Intermediate component that transforms items with bounded parallelism and
/// forwards the results downstream in completion order.
///
/// Shares the sink's admission and drain discipline; in addition, a full
/// output buffer holds back completions and therefore further admissions.
pub struct BoundedStage<I, O> {
    worker: Worker,
    transform: Arc<dyn Transform<I, O>>,
    retain: Option<Retain<I>>,
}

impl<I: Send + 'static, O: Send + 'static> BoundedStage<I, O> {
    /// Create a stage named "stage"
    pub fn new(config: WorkerConfig, transform: impl Transform<I, O>) -> Result<Self> {
        Self::named("stage", config, transform)
    }

    /// Create a stage with a name used in events, logs and metrics
    pub fn named(name: &str, config: WorkerConfig, transform: impl Transform<I, O>) -> Result<Self> {
        Ok(Self {
            worker: Worker::new(name, Operation::Transform, config)?,
            transform: Arc::new(transform),
            retain: None,
        })
    }

    /// Keep a clone of every admitted input so that a skipped failure reports
    /// the offending item in [`EventKind::Skipped`](crate::event::EventKind::Skipped)
    pub fn with_failed_items(mut self) -> Self
    where
        I: Clone + Sync,
    {
        self.retain = Some(worker::retain_clone::<I> as Retain<I>);
        self
    }

    /// Send this stage's events to `tx`
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.worker.emitter_mut().attach(tx);
        self
    }

    /// Get a handle to this stage's metrics
    pub fn metrics(&self) -> ComponentMetrics {
        self.worker.metrics()
    }

    /// Get the stage configuration
    pub fn config(&self) -> &WorkerConfig {
        self.worker.config()
    }

    /// Get the stage name
    pub fn name(&self) -> &str {
        self.worker.name()
    }

    /// Transform everything `input` delivers into `output` until input ends
    /// and all calls have drained. Dropping `output` on return ends the
    /// downstream stream.
    pub async fn run(self, input: BufferReceiver<I>, output: BufferSender<O>) -> Result<()> {
        let transform = self.transform;
        self.worker
            .run(
                input,
                move |item| {
                    let transform = Arc::clone(&transform);
                    async move { transform.transform(item).await }.boxed()
                },
                self.retain,
                Forward { output },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer;
    use crate::error::PipelineError;
    use crate::event::{self, EventKind};
    use std::time::Duration;

    async fn run_stage<I, O>(stage: BoundedStage<I, O>, inputs: Vec<I>) -> Result<Vec<O>>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let (in_tx, in_rx) = buffer::channel(inputs.len().max(1));
        for item in inputs {
            in_tx.send(item).await.unwrap();
        }
        drop(in_tx);

        let (out_tx, mut out_rx) = buffer::channel(16);
        let collector = tokio::spawn(async move {
            let mut outputs = Vec::new();
            while let Some(item) = out_rx.recv().await {
                outputs.push(item);
            }
            outputs
        });
        stage.run(in_rx, out_tx).await?;
        Ok(collector.await.unwrap())
    }

    #[test]
    fn test_fanout() {
        assert_eq!(Fanout::one(1).len(), 1);
        assert!(Fanout::<u8>::none().is_empty());
        assert_eq!(Fanout::from(vec![1, 2]).into_vec(), vec![1, 2]);
        assert_eq!(Fanout::from(Some(3)), Fanout::One(3));
        assert!(Fanout::<u8>::from(None).is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let stage = BoundedStage::new(WorkerConfig::default(), |word: &'static str| async move {
            Ok::<_, BoxError>(Fanout::many(vec![format!("{word}-a"), format!("{word}-b")]))
        })
        .unwrap();

        let outputs = run_stage(stage, vec!["x"]).await.unwrap();
        assert_eq!(outputs, vec!["x-a".to_string(), "x-b".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_fanout_filters() {
        let stage = BoundedStage::new(WorkerConfig::default(), |n: u32| async move {
            let kept = if n % 2 == 0 { Fanout::one(n) } else { Fanout::none() };
            Ok::<_, BoxError>(kept)
        })
        .unwrap();

        let mut outputs = run_stage(stage, (0..10).collect()).await.unwrap();
        outputs.sort_unstable();
        assert_eq!(outputs, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_transform() {
        let stage = BoundedStage::new(
            WorkerConfig::default().with_concurrency_limit(10),
            |n: u64| async move {
                tokio::time::sleep(Duration::from_millis(10 + n % 11)).await;
                Ok::<_, BoxError>(Fanout::one(n))
            },
        )
        .unwrap();
        let metrics = stage.metrics();

        let outputs = run_stage(stage, (0..200).collect()).await.unwrap();
        assert_eq!(outputs.len(), 200);
        assert_eq!(metrics.peak_inflight(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_closes_stage() {
        let stage = BoundedStage::new(
            WorkerConfig::default()
                .with_skip_on_error(false)
                .with_timeout(Duration::from_millis(1000)),
            |n: u32| async move {
                tokio::time::sleep(Duration::from_secs(99)).await;
                Ok::<_, BoxError>(Fanout::one(n))
            },
        )
        .unwrap();

        let err = run_stage(stage, vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_skipped_transform_reports_input() {
        let (events_tx, mut events) = event::channel();
        let stage = BoundedStage::new(WorkerConfig::default(), |n: u32| async move {
            if n == 4 {
                Err(BoxError::from("odd one out"))
            } else {
                Ok(Fanout::one(n * 10))
            }
        })
        .unwrap()
        .with_failed_items()
        .with_events(events_tx);

        let mut outputs = run_stage(stage, (0..6).collect()).await.unwrap();
        outputs.sort_unstable();
        assert_eq!(outputs, vec![0, 10, 20, 30, 50]);

        let skipped: Vec<u32> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event.kind {
                EventKind::Skipped { item, .. } => item,
                _ => None,
            })
            .filter_map(|item| item.downcast_ref::<u32>().copied())
            .collect();
        assert_eq!(skipped, vec![4]);
    }

    #[tokio::test]
    async fn test_transform_error_kind() {
        let stage = BoundedStage::new(
            WorkerConfig::default().with_skip_on_error(false),
            |_: u32| async { Err::<Fanout<u32>, _>(std::io::Error::other("foo")) },
        )
        .unwrap();

        let err = run_stage(stage, vec![1]).await.unwrap_err();
        assert_eq!(err.to_string(), "transform failed: foo");
    }
}

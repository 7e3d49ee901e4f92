use crate::buffer::{self, BufferReceiver};
use crate::error::{PipelineError, Result};
use crate::metrics::ComponentMetrics;
use crate::sink::BoundedSink;
use crate::source::{PollingSource, SourceHandle};
use crate::stage::BoundedStage;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::{JoinHandle, JoinSet};

type ComponentTask = BoxFuture<'static, Result<()>>;

/// A wired component waiting to be spawned
struct Component {
    name: String,
    metrics: ComponentMetrics,
    task: ComponentTask,
}

/// Builder that wires a source through any number of stages into a sink.
///
/// Each call creates the bounded buffer feeding the next component: the
/// source's buffer holds one batch, a stage's buffer holds as many items as
/// the stage may have in flight.
pub struct PipelineBuilder<T> {
    components: Vec<Component>,
    upstream: BufferReceiver<T>,
    source: SourceHandle,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    /// Append a stage
    pub fn stage<O: Send + 'static>(mut self, stage: BoundedStage<T, O>) -> PipelineBuilder<O> {
        let (tx, rx) = buffer::channel(stage.config().concurrency_limit);
        self.components.push(Component {
            name: stage.name().to_string(),
            metrics: stage.metrics(),
            task: stage.run(self.upstream, tx).boxed(),
        });
        PipelineBuilder {
            components: self.components,
            upstream: rx,
            source: self.source,
        }
    }

    /// Terminate the pipeline with a sink
    pub fn sink(mut self, sink: BoundedSink<T>) -> Pipeline {
        self.components.push(Component {
            name: sink.name().to_string(),
            metrics: sink.metrics(),
            task: sink.run(self.upstream).boxed(),
        });
        Pipeline {
            components: self.components,
            source: self.source,
        }
    }
}

/// A fully wired pipeline: source, stages and sink
pub struct Pipeline {
    components: Vec<Component>,
    source: SourceHandle,
}

impl Pipeline {
    /// Start building a pipeline from its source
    pub fn from_source<T: Send + 'static>(source: PollingSource<T>) -> PipelineBuilder<T> {
        let (tx, rx) = buffer::channel(source.config().batch_size);
        let handle = source.handle();
        let component = Component {
            name: source.name().to_string(),
            metrics: source.metrics(),
            task: source.run(tx).boxed(),
        };
        PipelineBuilder {
            components: vec![component],
            upstream: rx,
            source: handle,
        }
    }

    /// Handle for stopping the pipeline's source
    pub fn source(&self) -> SourceHandle {
        self.source.clone()
    }

    /// Component names in pipeline order
    pub fn component_names(&self) -> Vec<&str> {
        self.components.iter().map(|c| c.name.as_str()).collect()
    }

    /// Get metrics for a component by its position in the pipeline
    pub fn component_metrics(&self, index: usize) -> Option<&ComponentMetrics> {
        self.components.get(index).map(|c| &c.metrics)
    }

    /// Get a summary of all metrics
    pub fn metrics_summary(&self) -> String {
        summarize(
            self.components
                .iter()
                .map(|c| (c.name.clone(), c.metrics.clone()))
                .collect::<Vec<_>>()
                .as_slice(),
        )
    }

    /// Run every component until the source stopped and everything drained.
    ///
    /// The first component error aborts all other components and is returned.
    pub async fn run(self) -> Result<()> {
        let mut set = JoinSet::new();
        for component in self.components {
            let name = component.name;
            let task = component.task;
            set.spawn(async move { (name, task.await) });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => tracing::debug!(component = %name, "component finished"),
                Ok((name, Err(error))) => {
                    tracing::error!(component = %name, %error, "component failed, aborting pipeline");
                    self.source.stop(true);
                    set.abort_all();
                    return Err(error);
                }
                Err(join_error) => {
                    self.source.stop(true);
                    set.abort_all();
                    return Err(PipelineError::from(join_error));
                }
            }
        }
        Ok(())
    }

    /// Run the pipeline in the background
    pub fn spawn(self) -> RunningPipeline {
        let source = self.source.clone();
        let metrics = self
            .components
            .iter()
            .map(|c| (c.name.clone(), c.metrics.clone()))
            .collect();
        RunningPipeline {
            handle: tokio::spawn(self.run()),
            source,
            metrics,
        }
    }
}

/// A running pipeline that can be controlled and monitored
pub struct RunningPipeline {
    handle: JoinHandle<Result<()>>,
    source: SourceHandle,
    metrics: Vec<(String, ComponentMetrics)>,
}

impl RunningPipeline {
    /// Ask the source to stop; the rest of the pipeline drains behind it
    pub fn stop(&self, immediate: bool) {
        self.source.stop(immediate);
    }

    /// Get a cloneable handle to the pipeline's source
    pub fn source(&self) -> SourceHandle {
        self.source.clone()
    }

    /// Get metrics for a component by its position in the pipeline
    pub fn component_metrics(&self, index: usize) -> Option<&ComponentMetrics> {
        self.metrics.get(index).map(|(_, m)| m)
    }

    /// Whether every component task has returned
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the pipeline to complete
    pub async fn wait(self) -> Result<()> {
        self.handle.await?
    }

    /// Gracefully stop the source and wait for everything to drain
    pub async fn shutdown(self) -> Result<()> {
        self.stop(false);
        self.wait().await
    }

    /// Cancel every component without draining
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Get metrics summary
    pub fn metrics_summary(&self) -> String {
        summarize(&self.metrics)
    }
}

fn summarize(metrics: &[(String, ComponentMetrics)]) -> String {
    let mut summary = String::from("Pipeline Metrics Summary:\n");
    for (i, (name, metrics)) in metrics.iter().enumerate() {
        summary.push_str(&format!(
            "  {} {}: {}\n",
            i,
            name,
            metrics.snapshot().format()
        ));
    }
    summary
}

use crate::buffer::{BufferGauge, BufferSender};
use crate::config::SourceConfig;
use crate::error::{BoxError, PipelineError, Result};
use crate::event::{Emitter, EventKind, EventSender};
use crate::metrics::ComponentMetrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Pulls batches of items from an external store
#[async_trait]
pub trait Fetch<T>: Send + Sync + 'static {
    /// Return up to `count` items. Fewer (or none) signals the store is
    /// running low.
    async fn fetch(&self, count: usize) -> std::result::Result<Vec<T>, BoxError>;
}

#[async_trait]
impl<T, F, Fut, E> Fetch<T> for F
where
    T: Send + 'static,
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Vec<T>, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    async fn fetch(&self, count: usize) -> std::result::Result<Vec<T>, BoxError> {
        (self)(count).await.map_err(Into::into)
    }
}

/// Lifecycle of a [`PollingSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// Stop requested; the stream ends at the next fetch cycle
    Stopping,
    /// Terminal, no further fetches
    Stopped,
}

/// Items the source has produced that downstream has not taken yet
#[derive(Debug, Default)]
struct Backlog {
    gauge: Option<BufferGauge>,
    /// Fetched items not yet handed to the buffer
    unpushed: usize,
}

impl Backlog {
    fn len(&self) -> usize {
        self.gauge.as_ref().map_or(0, BufferGauge::len) + self.unpushed
    }
}

#[derive(Debug)]
struct SourceShared {
    state: watch::Sender<RunState>,
    /// Held while a stop request picks between stopping now and stopping
    /// later, and while the source claims a fetched batch
    backlog: Mutex<Backlog>,
    component: Arc<str>,
}

/// Cloneable handle for stopping a running [`PollingSource`] from any task
#[derive(Debug, Clone)]
pub struct SourceHandle {
    shared: Arc<SourceShared>,
}

impl SourceHandle {
    /// Request the source to stop.
    ///
    /// With `immediate`, or when nothing is buffered, the source stops now and
    /// abandons any fetch or backoff in progress. Otherwise it stops at its
    /// next fetch cycle, once downstream made room in the buffer. Items that
    /// are already buffered are delivered either way. Repeated calls are
    /// harmless.
    pub fn stop(&self, immediate: bool) {
        let (buffered, changed) = {
            let backlog = self.shared.backlog.lock();
            let buffered = backlog.len();
            let changed = self.shared.state.send_if_modified(|state| match *state {
                RunState::Stopped => false,
                _ if immediate || buffered == 0 => {
                    *state = RunState::Stopped;
                    true
                }
                RunState::Running => {
                    *state = RunState::Stopping;
                    true
                }
                RunState::Stopping => false,
            });
            (buffered, changed)
        };

        if changed {
            tracing::info!(
                component = %self.shared.component,
                immediate,
                buffered,
                state = ?self.state(),
                "stop requested"
            );
        }
    }

    /// Get the current run-state
    pub fn state(&self) -> RunState {
        *self.shared.state.borrow()
    }

    /// Whether the source has reached its terminal state
    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }
}

/// A source that continuously polls a [`Fetch`] implementation for batches
/// and applies adaptive backoff when the store runs dry or fails.
///
/// It never ends by itself unless `auto_stop_on_short_batch` is set; use a
/// [`SourceHandle`] to stop it.
pub struct PollingSource<T> {
    config: SourceConfig,
    fetch: Box<dyn Fetch<T>>,
    shared: Arc<SourceShared>,
    emitter: Emitter,
    metrics: ComponentMetrics,
}

impl<T: Send + 'static> PollingSource<T> {
    /// Create a source named `source`. Fails if `config` is invalid.
    pub fn new(config: SourceConfig, fetch: impl Fetch<T>) -> Result<Self> {
        Self::named("source", config, fetch)
    }

    /// Create a source that reports metrics and events as `name`
    pub fn named(name: &str, config: SourceConfig, fetch: impl Fetch<T>) -> Result<Self> {
        config.validate()?;
        let component: Arc<str> = Arc::from(name);
        let (state, _) = watch::channel(RunState::Running);
        Ok(Self {
            config,
            fetch: Box::new(fetch),
            shared: Arc::new(SourceShared {
                state,
                backlog: Mutex::new(Backlog::default()),
                component: Arc::clone(&component),
            }),
            emitter: Emitter::new(component),
            metrics: ComponentMetrics::new(),
        })
    }

    /// Send this source's events to `tx`
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.emitter.attach(tx);
        self
    }

    /// Get a handle for stopping this source while it runs
    pub fn handle(&self) -> SourceHandle {
        SourceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Shared metrics, still readable after `run` consumed the source
    pub fn metrics(&self) -> ComponentMetrics {
        self.metrics.clone()
    }

    /// Get the configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Component name used in logs and events
    pub fn name(&self) -> &str {
        self.emitter.component()
    }

    /// Drive fetch cycles into `output` until stopped.
    ///
    /// Returns once the stream ended; dropping `output` signals end-of-stream
    /// downstream. Fails only on a fetch error without `skip_on_error`.
    pub async fn run(self, output: BufferSender<T>) -> Result<()> {
        self.shared.backlog.lock().gauge = Some(output.gauge());
        let mut state = self.shared.state.subscribe();
        let requested = self.config.batch_size;

        'poll: loop {
            // The buffer having room is the downstream's request for more
            tokio::select! {
                ready = output.ready() => {
                    if ready.is_err() {
                        tracing::debug!(component = self.name(), "downstream gone, stopping");
                        self.shared.state.send_replace(RunState::Stopped);
                        return Ok(());
                    }
                }
                _ = stopped(&mut state) => {}
            }

            let current = *state.borrow_and_update();
            match current {
                RunState::Stopped => break 'poll,
                RunState::Stopping => {
                    self.shared.state.send_replace(RunState::Stopped);
                    break 'poll;
                }
                RunState::Running => {}
            }

            self.metrics.record_operation();
            let started = Instant::now();
            let fetched = tokio::select! {
                result = self.fetch.fetch(requested) => result,
                _ = stopped(&mut state) => break 'poll,
            };

            match fetched {
                Ok(items) => {
                    let received = items.len();
                    // Claim the batch: from here on it counts as buffered and
                    // only an immediate stop abandons what did not fit the
                    // buffer yet. A stop that got in first saw no backlog, so
                    // the batch is abandoned like a fetch still in flight.
                    {
                        let mut backlog = self.shared.backlog.lock();
                        if *self.shared.state.borrow() == RunState::Stopped {
                            break 'poll;
                        }
                        backlog.unpushed = received;
                    }

                    let elapsed = started.elapsed();
                    let total = self.metrics.record_processed(received as u64);
                    self.metrics.record_latency(elapsed);
                    self.emitter.emit(EventKind::Fetched {
                        items: received,
                        requested,
                        total,
                        elapsed,
                    });

                    for item in items {
                        tokio::select! {
                            sent = output.send(item) => {
                                if sent.is_err() {
                                    tracing::debug!(component = self.name(), "downstream gone, stopping");
                                    self.shared.backlog.lock().unpushed = 0;
                                    self.shared.state.send_replace(RunState::Stopped);
                                    return Ok(());
                                }
                                let mut backlog = self.shared.backlog.lock();
                                backlog.unpushed = backlog.unpushed.saturating_sub(1);
                            }
                            _ = stopped(&mut state) => {
                                self.shared.backlog.lock().unpushed = 0;
                                break 'poll;
                            }
                        }
                    }

                    if received < requested && self.config.auto_stop_on_short_batch {
                        tracing::info!(
                            component = self.name(),
                            received,
                            requested,
                            "short batch, source exhausted"
                        );
                        self.shared.state.send_replace(RunState::Stopped);
                        break 'poll;
                    }

                    if received == 0 {
                        backoff(&mut state, self.config.wait_after_empty).await;
                    } else if received < requested {
                        backoff(&mut state, self.config.wait_after_low).await;
                    }
                }
                Err(error) => {
                    let error = PipelineError::Fetch(error);
                    if !self.config.skip_on_error {
                        tracing::error!(component = self.name(), %error, "fetch failed");
                        self.shared.state.send_replace(RunState::Stopped);
                        return Err(error);
                    }
                    self.metrics.record_skipped();
                    self.emitter.emit(EventKind::Skipped {
                        error: Arc::new(error),
                        position: None,
                        item: None,
                    });
                    backoff(&mut state, self.config.wait_after_error).await;
                }
            }
        }

        self.emitter.emit(EventKind::Finished {
            total: self.metrics.total_processed(),
        });
        Ok(())
    }
}

/// Resolves once the source reached `Stopped`
async fn stopped(state: &mut watch::Receiver<RunState>) {
    let _ = state.wait_for(|s| *s == RunState::Stopped).await;
}

/// Sleep for `wait`, cut short by any stop request
async fn backoff(state: &mut watch::Receiver<RunState>, wait: Duration) {
    if wait.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => {}
        _ = state.wait_for(|s| *s != RunState::Running) => {}
    }
}

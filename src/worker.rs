//! Admission, timeout and drain discipline shared by stages and sinks.

use crate::backpressure::Demand;
use crate::buffer::BufferReceiver;
use crate::config::WorkerConfig;
use crate::error::{BoxError, Operation, PipelineError, Result};
use crate::event::{Emitter, EventKind, FailedItem};
use crate::gate::AdmissionGate;
use crate::metrics::ComponentMetrics;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// What a component does with a successful call result
#[async_trait]
pub(crate) trait Completion<R>: Send {
    /// Returns `false` once there is nobody downstream anymore
    async fn complete(&mut self, result: R) -> bool;
}

/// Copies an item before it is moved into a call, so a skip can report it
pub(crate) type Retain<I> = fn(&I) -> FailedItem;

/// Retain failed items by cloning them
pub(crate) fn retain_clone<I: Clone + Send + Sync + 'static>(item: &I) -> FailedItem {
    FailedItem::new(item.clone())
}

/// Outcome of one spawned call, timeout already applied
struct Settled<R> {
    position: u64,
    elapsed: Duration,
    item: Option<FailedItem>,
    outcome: Result<R>,
}

/// Frees one gate slot when dropped, whichever way the completion is handled
struct Slot<'a>(&'a AdmissionGate);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

pub(crate) struct Worker {
    config: WorkerConfig,
    operation: Operation,
    emitter: Emitter,
    metrics: ComponentMetrics,
}

impl Worker {
    pub(crate) fn new(name: &str, operation: Operation, config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            operation,
            emitter: Emitter::new(name),
            metrics: ComponentMetrics::new(),
        })
    }

    pub(crate) fn emitter_mut(&mut self) -> &mut Emitter {
        &mut self.emitter
    }

    pub(crate) fn name(&self) -> &str {
        self.emitter.component()
    }

    pub(crate) fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> ComponentMetrics {
        self.metrics.clone()
    }

    /// Pull items from `input` while the gate grants demand, run `invoke` on
    /// each as a separately scheduled call, and hand results to `completion`.
    /// With `retain`, each item is copied first so a skipped failure can
    /// report it.
    ///
    /// Returns after upstream ended and every admitted call settled, or on the
    /// first error when errors are not skipped. Calls still outstanding at
    /// that point are cancelled.
    pub(crate) async fn run<I, R, F, C>(
        &self,
        mut input: BufferReceiver<I>,
        invoke: F,
        retain: Option<Retain<I>>,
        mut completion: C,
    ) -> Result<()>
    where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(I) -> BoxFuture<'static, std::result::Result<R, BoxError>>,
        C: Completion<R>,
    {
        let gate = AdmissionGate::with_order(
            self.config.concurrency_limit,
            self.config.admission_order,
        );
        let demand = Demand::new();
        let mut inflight: JoinSet<Settled<R>> = JoinSet::new();
        let mut upstream_done = false;

        loop {
            tokio::select! {
                biased;

                Some(joined) = inflight.join_next() => {
                    let _slot = Slot(&gate);
                    let settled = joined?;
                    match settled.outcome {
                        Ok(result) => {
                            let inflight_now = gate.inflight();
                            let total = self.metrics.record_processed(1);
                            self.metrics.observe_inflight(inflight_now);
                            self.metrics.record_latency(settled.elapsed);
                            self.emitter.emit(EventKind::Completed {
                                inflight: inflight_now,
                                total,
                                elapsed: settled.elapsed,
                            });
                            if !completion.complete(result).await {
                                tracing::debug!(component = self.name(), "downstream gone, stopping");
                                return Ok(());
                            }
                        }
                        Err(error) if self.config.skip_on_error => {
                            self.metrics.record_skipped();
                            self.emitter.emit(EventKind::Skipped {
                                error: Arc::new(error),
                                position: Some(settled.position),
                                item: settled.item,
                            });
                        }
                        Err(error) => {
                            tracing::error!(
                                component = self.name(),
                                position = settled.position,
                                %error,
                                "{} failed, closing",
                                self.operation
                            );
                            return Err(error);
                        }
                    }
                }

                item = input.recv(), if !upstream_done && demand.is_ready() => {
                    let Some(item) = item else {
                        upstream_done = true;
                        tracing::debug!(
                            component = self.name(),
                            inflight = gate.inflight(),
                            "upstream ended, draining"
                        );
                        continue;
                    };
                    demand.try_take();
                    gate.admit(demand.granter());
                    let position = self.metrics.record_operation();
                    let kept = retain.map(|retain| retain(&item));
                    self.spawn(&mut inflight, position, kept, invoke(item));
                }

                _ = gate.drained(), if upstream_done => break,

                else => break,
            }
        }

        self.emitter.emit(EventKind::Finished {
            total: self.metrics.total_processed(),
        });
        Ok(())
    }

    fn spawn<R: Send + 'static>(
        &self,
        inflight: &mut JoinSet<Settled<R>>,
        position: u64,
        item: Option<FailedItem>,
        call: BoxFuture<'static, std::result::Result<R, BoxError>>,
    ) {
        let operation = self.operation;
        let limit = self.config.timeout;
        inflight.spawn(async move {
            let started = Instant::now();
            // On timeout the call is dropped; its slot is freed when this
            // task's outcome is handled, never earlier
            let outcome = match tokio::time::timeout(limit, call).await {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(error)) => Err(PipelineError::from_operation(operation, error)),
                Err(_) => Err(PipelineError::Timeout {
                    operation,
                    after: limit,
                }),
            };
            Settled {
                position,
                elapsed: started.elapsed(),
                item,
                outcome,
            }
        });
    }
}

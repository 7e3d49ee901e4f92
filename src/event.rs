//! Observable notifications emitted by pipeline components.
//!
//! Events are informational only: nothing in the pipeline depends on anyone
//! listening. Every event is logged through `tracing`, and additionally sent
//! to a channel when one was attached to the component.

use crate::error::PipelineError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A notification tagged with the name of the component that emitted it
#[derive(Debug, Clone)]
pub struct Event {
    pub component: Arc<str>,
    pub kind: EventKind,
}

#[derive(Debug, Clone)]
pub enum EventKind {
    /// A source fetch returned
    Fetched {
        items: usize,
        requested: usize,
        total: u64,
        elapsed: Duration,
    },
    /// A transform or consume call succeeded
    Completed {
        inflight: usize,
        total: u64,
        elapsed: Duration,
    },
    /// A failure was tolerated because the component skips on error.
    /// `position` is the admission ordinal of the failed item and `item` the
    /// item itself, when the component retains failed items. Both are `None`
    /// for source fetch errors.
    Skipped {
        error: Arc<PipelineError>,
        position: Option<u64>,
        item: Option<FailedItem>,
    },
    /// The component has ended its stream and drained
    Finished { total: u64 },
}

/// The item a failed transform or consume call was made with.
///
/// Type-erased so that components with different item types can share one
/// event channel; recover it with [`FailedItem::downcast_ref`] or
/// [`FailedItem::downcast`].
#[derive(Clone)]
pub struct FailedItem(Arc<dyn Any + Send + Sync>);

impl FailedItem {
    pub(crate) fn new<T: Any + Send + Sync>(item: T) -> Self {
        Self(Arc::new(item))
    }

    /// Borrow the item if it is a `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Take a shared handle to the item if it is a `T`
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<Arc<T>, Self> {
        self.0.downcast().map_err(Self)
    }
}

impl fmt::Debug for FailedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FailedItem(..)")
    }
}

/// Sender half for component events
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiver half for component events
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Create an event channel that can be shared by several components
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone)]
pub(crate) struct Emitter {
    component: Arc<str>,
    tx: Option<EventSender>,
}

impl Emitter {
    pub(crate) fn new(component: impl Into<Arc<str>>) -> Self {
        Self {
            component: component.into(),
            tx: None,
        }
    }

    pub(crate) fn attach(&mut self, tx: EventSender) {
        self.tx = Some(tx);
    }

    pub(crate) fn component(&self) -> &str {
        &self.component
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        match &kind {
            EventKind::Fetched {
                items,
                requested,
                total,
                elapsed,
            } => tracing::debug!(
                component = %self.component,
                items,
                requested,
                total,
                elapsed_ms = elapsed.as_millis() as u64,
                "batch fetched"
            ),
            EventKind::Completed {
                inflight,
                total,
                elapsed,
            } => tracing::debug!(
                component = %self.component,
                inflight,
                total,
                elapsed_ms = elapsed.as_millis() as u64,
                "item completed"
            ),
            EventKind::Skipped {
                error,
                position,
                item,
            } => tracing::warn!(
                component = %self.component,
                error = %error,
                position = ?position,
                retained = item.is_some(),
                "skipping after error"
            ),
            EventKind::Finished { total } => {
                tracing::info!(component = %self.component, total, "finished")
            }
        }

        if let Some(tx) = &self.tx {
            // A dropped receiver only means nobody is listening anymore
            let _ = tx.send(Event {
                component: Arc::clone(&self.component),
                kind,
            });
        }
    }
}

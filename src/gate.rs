//! Bounded-concurrency admission gate.
//!
//! The gate counts in-flight operations against a limit. It never rejects an
//! admission: callers hand in a resume callback that is invoked immediately
//! while there is headroom, or deferred until a later [`AdmissionGate::release`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::watch;

type Resume = Box<dyn FnOnce() + Send>;

/// Order in which deferred resume callbacks are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionOrder {
    /// Oldest waiter first
    #[default]
    Fifo,
    /// Most recently deferred waiter first
    Lifo,
}

/// Snapshot published to gate subscribers on every admit and release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GateStatus {
    /// Operations admitted and not yet released
    pub inflight: usize,
    /// Number of transitions from one to zero operations in flight so far.
    /// Monotonic, so a drain is never lost even when a later admission
    /// overwrites `inflight` before a subscriber looks.
    pub drains: u64,
}

struct GateState {
    inflight: usize,
    waiters: VecDeque<Resume>,
}

/// Counting semaphore with deferred resume callbacks and a drained signal
pub struct AdmissionGate {
    limit: usize,
    order: AdmissionOrder,
    state: Mutex<GateState>,
    status: watch::Sender<GateStatus>,
}

impl AdmissionGate {
    /// Create a FIFO gate. A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self::with_order(limit, AdmissionOrder::Fifo)
    }

    /// Create a gate that resumes parked admissions in the given order
    pub fn with_order(limit: usize, order: AdmissionOrder) -> Self {
        let (status, _) = watch::channel(GateStatus::default());
        Self {
            limit: limit.max(1),
            order,
            state: Mutex::new(GateState {
                inflight: 0,
                waiters: VecDeque::new(),
            }),
            status,
        }
    }

    /// Admit one operation.
    ///
    /// `resume` runs synchronously if the gate still has headroom after this
    /// admission, otherwise it is parked until a release frees a slot.
    pub fn admit<F>(&self, resume: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            state.inflight += 1;
            let inflight = state.inflight;
            self.status.send_modify(|status| status.inflight = inflight);
            if state.inflight >= self.limit {
                state.waiters.push_back(Box::new(resume));
                return;
            }
        }
        resume();
    }

    /// Release one previously admitted operation.
    ///
    /// Resumes at most one parked waiter. Calling this without a matching
    /// [`admit`](Self::admit) is a logic error; the count saturates at zero.
    pub fn release(&self) {
        let waiter = {
            let mut state = self.state.lock();
            debug_assert!(state.inflight > 0, "release without matching admit");
            let drained = state.inflight == 1;
            state.inflight = state.inflight.saturating_sub(1);
            let inflight = state.inflight;
            self.status.send_modify(|status| {
                status.inflight = inflight;
                if drained {
                    status.drains += 1;
                }
            });
            match self.order {
                AdmissionOrder::Fifo => state.waiters.pop_front(),
                AdmissionOrder::Lifo => state.waiters.pop_back(),
            }
        };
        // Callbacks run outside the lock so they may touch the gate again.
        if let Some(resume) = waiter {
            resume();
        }
    }

    /// Number of operations currently admitted
    pub fn inflight(&self) -> usize {
        self.state.lock().inflight
    }

    /// Number of parked resume callbacks
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Get the configured limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether no operation is currently in flight
    pub fn is_drained(&self) -> bool {
        self.inflight() == 0
    }

    /// Number of times the gate has drained so far
    pub fn drain_count(&self) -> u64 {
        self.status.borrow().drains
    }

    /// Wait until no operation is in flight. Resolves immediately if the gate
    /// is already drained, and may be awaited any number of times.
    pub async fn drained(&self) {
        let mut rx = self.status.subscribe();
        // The sender lives in `self`, so the channel cannot close while borrowed.
        let _ = rx.wait_for(|status| status.inflight == 0).await;
    }

    /// Subscribe to status changes. Compare [`GateStatus::drains`] against
    /// the last value seen to learn how many drains happened in between.
    pub fn subscribe(&self) -> watch::Receiver<GateStatus> {
        self.status.subscribe()
    }
}

impl std::fmt::Debug for AdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AdmissionGate")
            .field("limit", &self.limit)
            .field("order", &self.order)
            .field("inflight", &state.inflight)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

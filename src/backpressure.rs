use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pull-side demand counter shared between a component and its admission gate.
///
/// Each unit of demand allows the component to take one more item from its
/// upstream buffer. The gate's resume callback grants demand, so the
/// component's concurrency limit becomes the upstream's backpressure signal.
#[derive(Debug, Clone)]
pub struct Demand {
    pending: Arc<AtomicUsize>,
}

impl Demand {
    /// Create a demand counter with a single initial grant, so the first item
    /// can be pulled before anything was admitted
    pub fn new() -> Self {
        Self::with_initial(1)
    }

    /// Create a demand counter starting at `initial` grants
    pub fn with_initial(initial: usize) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(initial)),
        }
    }

    /// Allow one more item to be pulled
    pub fn grant(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Consume one unit of demand if any is available
    pub fn try_take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Whether the component may pull another item right now
    pub fn is_ready(&self) -> bool {
        self.pending() > 0
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// A callback that grants one unit of demand, for handing to the gate
    pub fn granter(&self) -> impl FnOnce() + Send + 'static {
        let pending = Arc::clone(&self.pending);
        move || {
            pending.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Default for Demand {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AdmissionGate;

    #[test]
    fn test_initial_grant() {
        let demand = Demand::new();
        assert!(demand.is_ready());
        assert!(demand.try_take());
        assert!(!demand.is_ready());
        assert!(!demand.try_take());
    }

    #[test]
    fn test_granter_shares_counter() {
        let demand = Demand::with_initial(0);
        let grant = demand.granter();
        grant();
        assert_eq!(demand.pending(), 1);
    }

    #[test]
    fn test_gate_drives_demand() {
        let limit = 3;
        let gate = AdmissionGate::new(limit);
        let demand = Demand::new();

        // Pull until the gate stops granting demand
        let mut admitted = 0;
        while demand.try_take() {
            gate.admit(demand.granter());
            admitted += 1;
        }
        assert_eq!(admitted, limit);
        assert_eq!(gate.inflight(), limit);

        gate.release();
        assert!(demand.try_take());
        gate.admit(demand.granter());
        assert!(!demand.is_ready());
        assert_eq!(gate.inflight(), limit);
    }
}

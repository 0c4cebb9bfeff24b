use std::sync::Arc;
use std::thread;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pending-request slots per available CPU.
pub const SLOTS_PER_CPU: usize = 10_000;

/// Bounded pool of execution slots.
///
/// Waiters are served in arrival order and never time out; a request keeps
/// its slot until its execution task finishes.
#[derive(Clone, Debug)]
pub struct Admission {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// Held for as long as a request executes.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl Admission {
    /// Pool with `capacity` slots; at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// `SLOTS_PER_CPU` slots for each available CPU.
    pub fn default_capacity() -> usize {
        let cpus = thread::available_parallelism().map_or(1, usize::from);
        SLOTS_PER_CPU.saturating_mul(cpus)
    }

    /// Waits for a free slot; `None` once the pool is closed.
    pub async fn acquire(&self) -> Option<AdmissionPermit> {
        let permit = Arc::clone(&self.slots).acquire_owned().await.ok()?;
        Some(AdmissionPermit { _permit: permit })
    }

    /// Wakes every waiter with `None` and refuses later acquisitions.
    /// Slots already held stay valid.
    pub fn close(&self) {
        self.slots.close();
    }

    /// Slot count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Default for Admission {
    fn default() -> Self {
        Self::new(Self::default_capacity())
    }
}

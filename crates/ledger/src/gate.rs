//! Bounded concurrency with a completion barrier.
//!
//! A [`Gate`] plays the role of a wait group that also caps how many units of
//! work may run at once. A coordinator calls [`Gate::acquire`] before
//! spawning each unit, moves the returned [`Permit`] into it, and finally
//! calls [`Gate::wait`] to block until every permit has been released.
//!
//! This decouples "how many may run at once" from "how many exist": a batch of
//! `N` items runs with a ceiling of `M <= N` without pre-chunking.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

struct Inner {
    capacity: usize,
    permits: Arc<Semaphore>,
    occupancy: AtomicUsize,
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Counting semaphore paired with a completion barrier.
///
/// Cloning a gate yields another handle to the same counters.
#[derive(Clone)]
pub struct Gate {
    inner: Arc<Inner>,
}

impl Gate {
    /// Creates a gate admitting `capacity` concurrent holders.
    ///
    /// A capacity of `0` means unbounded: the gate admits as many holders as
    /// the underlying semaphore can represent, so acquiring never blocks in
    /// practice.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            Semaphore::MAX_PERMITS
        } else {
            capacity.min(Semaphore::MAX_PERMITS)
        };

        Self {
            inner: Arc::new(Inner {
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                occupancy: AtomicUsize::new(0),
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Waits until a slot is free, then occupies it.
    ///
    /// The returned [`Permit`] frees the slot when released or dropped.
    pub async fn acquire(&self) -> Permit {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .expect("gate semaphore is never closed");

        self.inner.occupancy.fetch_add(1, Ordering::AcqRel);
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        Permit {
            inner: Arc::clone(&self.inner),
            permit: Some(permit),
        }
    }

    /// Waits until every acquired permit has been released.
    ///
    /// Only call this after all acquires for the current round have been
    /// issued; an acquire racing with `wait` may be missed.
    pub async fn wait(&self) {
        loop {
            let mut notified = std::pin::pin!(self.inner.idle.notified());
            // Register before checking so a release in between still wakes us.
            notified.as_mut().enable();

            if self.inner.outstanding.load(Ordering::Acquire) == 0 {
                return;
            }

            notified.await;
        }
    }

    /// Maximum number of concurrent holders.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of permits currently held.
    pub fn occupancy(&self) -> usize {
        self.inner.occupancy.load(Ordering::Acquire)
    }

    /// Number of acquired permits not yet fully released.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }
}

impl core::fmt::Debug for Gate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Gate")
            .field("capacity", &self.capacity())
            .field("occupancy", &self.occupancy())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// An occupied slot of a [`Gate`].
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    inner: Arc<Inner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Permit {
    /// Frees the slot. Equivalent to dropping the permit.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        // Occupancy drops before the semaphore slot is handed to the next
        // acquirer, so it never exceeds capacity.
        self.inner.occupancy.fetch_sub(1, Ordering::AcqRel);
        drop(self.permit.take());

        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use std::sync::atomic::AtomicU32;

    const TASKS: u32 = 10_000;

    async fn run(gate: &Gate, counter: Arc<AtomicU32>, peak: Arc<AtomicUsize>) {
        for _ in 0..TASKS {
            let permit = gate.acquire().await;
            let gate = gate.clone();
            let counter = Arc::clone(&counter);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                peak.fetch_max(gate.occupancy(), Ordering::AcqRel);
                counter.fetch_add(1, Ordering::AcqRel);
                tokio::task::yield_now().await;
                permit.release();
            });
        }
        gate.wait().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn wait_sees_every_task() {
        let gate = Gate::new(10);
        let counter = Arc::new(AtomicU32::new(0));
        run(&gate, Arc::clone(&counter), Arc::new(AtomicUsize::new(0))).await;

        assert_eq!(counter.load(Ordering::Acquire), TASKS);
        assert_eq!(gate.outstanding(), 0);
        assert_eq!(gate.occupancy(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn occupancy_never_exceeds_capacity() {
        let gate = Gate::new(4);
        let counter = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        run(&gate, Arc::clone(&counter), Arc::clone(&peak)).await;

        assert_eq!(counter.load(Ordering::Acquire), TASKS);
        let peak = peak.load(Ordering::Acquire);
        assert!((1..=4).contains(&peak), "peak occupancy {peak}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn zero_capacity_is_unbounded() {
        let gate = Gate::new(0);
        assert_eq!(gate.capacity(), Semaphore::MAX_PERMITS);

        // Hold far more permits than any real capacity without blocking.
        let mut held = Vec::new();
        for _ in 0..TASKS {
            held.push(gate.acquire().await);
        }
        assert_eq!(gate.occupancy(), TASKS as usize);
        drop(held);
        gate.wait().await;
        assert_eq!(gate.occupancy(), 0);
    }

    #[tokio::test]
    async fn acquire_blocks_at_capacity() {
        let gate = Gate::new(1);
        let first = gate.acquire().await;

        let blocked = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(blocked.is_err(), "second acquire should block");

        first.release();
        let second = tokio::time::timeout(Duration::from_secs(1), gate.acquire()).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn wait_blocks_until_release() {
        let gate = Gate::new(2);
        let permit = gate.acquire().await;

        let pending = tokio::time::timeout(Duration::from_millis(20), gate.wait()).await;
        assert!(pending.is_err(), "wait returned with a permit outstanding");

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };
        tokio::task::yield_now().await;
        drop(permit);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait did not return after release")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_on_fresh_gate_returns_immediately() {
        Gate::new(3).wait().await;
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::core::breaker::BreakerGate;
use crate::core::conn::Connection;
use crate::core::dialer::Dialer;

/// Failures while borrowing from the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No connection could be obtained, either because the borrow timed
    /// out or because a dial attempt failed.
    #[error("No connection available in pool")]
    NoConnection,
    /// The pool has been closed and refuses further use.
    #[error("Pool is closed")]
    Closed,
}

/// Fixed-capacity reservoir of Redis connections.
#[async_trait]
pub trait Pool: Send + Sync {
    /// Block until a slot is available. A live slot yields its connection
    /// directly; a vacant slot dials a fresh connection in its place.
    async fn borrow(&self) -> Result<Box<dyn Connection>, PoolError>;

    /// Like `borrow`, but gives up with [`PoolError::NoConnection`] once
    /// `timeout` elapses without a slot becoming available.
    async fn borrow_within(&self, timeout: Duration) -> Result<Box<dyn Connection>, PoolError>;

    /// Return a slot. `Some` re-enqueues a live connection, `None` restores
    /// a vacant marker. Must be called exactly once per successful borrow;
    /// a connection which encountered an error must come back as `None`.
    async fn release(&self, conn: Option<Box<dyn Connection>>);

    /// Drain every slot, closing each live connection encountered. Blocks
    /// until all borrowed connections have been released, then refuses
    /// further use.
    async fn close(&self);
}

// A slot is either a pooled live connection or a vacant marker that
// provokes a dial when borrowed.
enum Slot {
    Live(Box<dyn Connection>),
    Vacant,
}

struct SlotStore {
    live: VecDeque<Box<dyn Connection>>,
    vacant: usize,
}

/// Snapshot of pool occupancy, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub live: usize,
    pub vacant: usize,
}

/// The default [`Pool`]: `capacity` slots, all vacant at construction.
///
/// Invariant: live + vacant + borrowed = capacity at all times outside the
/// atomic borrow/release transitions. The semaphore carries one permit per
/// slot currently inside the pool, so release never blocks and close drains
/// exactly `capacity` permits.
pub struct SlotPool {
    dialer: Arc<dyn Dialer>,
    gate: Arc<dyn BreakerGate>,
    capacity: usize,
    slots: Mutex<SlotStore>,
    available: Semaphore,
    // At most one dial in flight at a time; cooperates with the gate.
    dialing: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl SlotPool {
    pub fn new(dialer: Arc<dyn Dialer>, capacity: usize, gate: Arc<dyn BreakerGate>) -> Self {
        Self {
            dialer,
            gate,
            capacity,
            slots: Mutex::new(SlotStore {
                live: VecDeque::with_capacity(capacity),
                vacant: capacity,
            }),
            available: Semaphore::new(capacity),
            dialing: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Counts of pooled entries. Borrowed connections are the remainder up
    /// to `capacity`.
    pub fn status(&self) -> PoolStatus {
        let slots = self.slots.lock().expect("pool slots poisoned");
        PoolStatus {
            capacity: self.capacity,
            live: slots.live.len(),
            vacant: slots.vacant,
        }
    }

    // Take the entry backing an already-acquired permit, preferring live
    // connections to minimize socket churn under light load.
    fn take_slot(&self) -> Slot {
        let mut slots = self.slots.lock().expect("pool slots poisoned");
        if let Some(conn) = slots.live.pop_front() {
            return Slot::Live(conn);
        }

        debug_assert!(slots.vacant > 0, "permit without a backing slot");
        slots.vacant -= 1;
        Slot::Vacant
    }

    fn put_vacant(&self) {
        let mut slots = self.slots.lock().expect("pool slots poisoned");
        slots.vacant += 1;
        drop(slots);
        self.available.add_permits(1);
    }

    async fn checkout(&self) -> Result<Box<dyn Connection>, PoolError> {
        match self.take_slot() {
            Slot::Live(conn) => Ok(conn),
            Slot::Vacant => self.dial().await,
        }
    }

    async fn dial(&self) -> Result<Box<dyn Connection>, PoolError> {
        let _guard = self.dialing.lock().await;

        match self.gate.dial(self.dialer.as_ref()).await {
            Ok(conn) => {
                debug!("Established a new connection with Redis");
                Ok(conn)
            }
            Err(err) => {
                // We were dialing for a vacant slot; put the marker back so
                // connection errors do not shrink the pool.
                self.put_vacant();
                warn!("Could not connect to Redis ({})", err);
                Err(PoolError::NoConnection)
            }
        }
    }
}

#[async_trait]
impl Pool for SlotPool {
    async fn borrow(&self) -> Result<Box<dyn Connection>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let permit = self.available.acquire().await.map_err(|_| PoolError::Closed)?;
        permit.forget();

        self.checkout().await
    }

    async fn borrow_within(&self, timeout: Duration) -> Result<Box<dyn Connection>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let permit = match tokio::time::timeout(timeout, self.available.acquire()).await {
            Err(_elapsed) => return Err(PoolError::NoConnection),
            Ok(Err(_closed)) => return Err(PoolError::Closed),
            Ok(Ok(permit)) => permit,
        };
        permit.forget();

        self.checkout().await
    }

    async fn release(&self, conn: Option<Box<dyn Connection>>) {
        let mut conn = conn;
        if self.closed.load(Ordering::SeqCst) {
            // Late release during or after drain: this connection will never
            // be handed out again, so close it now and restore a marker.
            if let Some(conn) = conn.as_mut() {
                if let Err(err) = conn.close().await {
                    warn!("Could not close connection ({})", err);
                }
            }
            conn = None;
        }

        let mut slots = self.slots.lock().expect("pool slots poisoned");
        match conn {
            Some(live) => slots.live.push_back(live),
            None => slots.vacant += 1,
        }
        drop(slots);

        self.available.add_permits(1);
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Drain every slot without dialing. Acquiring all permits blocks
        // until outstanding borrows come back.
        for _ in 0..self.capacity {
            let permit = match self.available.acquire().await {
                Ok(permit) => permit,
                Err(_closed) => break,
            };
            permit.forget();

            if let Slot::Live(mut conn) = self.take_slot() {
                if let Err(err) = conn.close().await {
                    warn!("Could not close connection ({})", err);
                }
            }
        }

        self.available.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::breaker::NoopGate;
    use crate::core::dialer::DialError;

    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(&self) -> Result<Box<dyn Connection>, DialError> {
            Err(DialError::Connect("refused".to_string()))
        }
    }

    fn refusing_pool(capacity: usize) -> SlotPool {
        SlotPool::new(Arc::new(RefusingDialer), capacity, Arc::new(NoopGate))
    }

    #[test]
    fn new_pool_is_all_vacant() {
        let pool = refusing_pool(8);
        assert_eq!(
            pool.status(),
            PoolStatus {
                capacity: 8,
                live: 0,
                vacant: 8,
            }
        );
    }

    #[tokio::test]
    async fn dial_failure_restores_the_vacant_marker() {
        let pool = refusing_pool(2);

        for _ in 0..3 {
            let err = pool.borrow().await.unwrap_err();
            assert!(matches!(err, PoolError::NoConnection));
        }

        assert_eq!(pool.status().vacant, 2);
    }

    #[tokio::test]
    async fn borrow_after_close_is_rejected() {
        let pool = refusing_pool(2);
        pool.close().await;
        pool.close().await; // idempotent

        assert!(matches!(pool.borrow().await, Err(PoolError::Closed)));
        assert!(matches!(
            pool.borrow_within(Duration::from_secs(1)).await,
            Err(PoolError::Closed)
        ));
    }
}

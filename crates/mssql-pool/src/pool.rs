//! Pool implementation.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::error::PoolError;

/// Connection factory and health policy.
///
/// The session layer implements this for authenticated TDS sessions; tests
/// implement it with in-memory fakes.
pub trait ManageConnection: Send + Sync + 'static {
    /// The pooled connection type.
    type Connection: Send + 'static;

    /// Establish and authenticate a new connection.
    ///
    /// Runs outside the pool lock; it may block on TCP/TLS/login.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, PoolError>> + Send;

    /// Cheap synchronous check used on release: only connections in a
    /// clean idle state (no pending receive bytes) may be recycled.
    fn is_recyclable(&self, conn: &Self::Connection) -> bool;

    /// Keepalive check used by the maintenance sweep.
    fn ping(&self, conn: &mut Self::Connection) -> impl Future<Output = bool> + Send;
}

struct IdleEntry<C> {
    conn: C,
    since: Instant,
}

struct PoolState<C> {
    idle: Vec<IdleEntry<C>>,
    in_use: usize,
    /// Connections pinned to host-engine transactions. `None` marks a
    /// pinned connection currently checked out by an operation.
    pinned: HashMap<u64, Option<C>>,
}

struct Shared<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<PoolState<M::Connection>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Counters describing the pool at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Idle connections ready for checkout.
    pub idle: usize,
    /// Connections handed out or pinned.
    pub in_use: usize,
    /// Active transaction pins.
    pub pinned: usize,
    /// Configured capacity.
    pub max: usize,
}

/// Connection pool for one attached catalog.
pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Create a pool around a connection manager.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                config,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    in_use: 0,
                    pinned: HashMap::new(),
                }),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Acquire a connection, waiting up to the configured acquire timeout
    /// when the pool is at capacity.
    pub async fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        let shared = &self.shared;
        let timeout = shared.config.acquire_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            if shared.closed.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }

            // Newest idle first: LIFO keeps server-side caches warm.
            enum Step<C> {
                Reuse(C),
                Connect,
                Wait,
            }
            let step = {
                let mut state = shared.state.lock();
                let mut step = Step::Wait;
                loop {
                    if let Some(entry) = state.idle.pop() {
                        let ttl = shared.config.idle_ttl;
                        let stale = !ttl.is_zero() && entry.since.elapsed() >= ttl;
                        // A stale connection is evicted only while the pool
                        // stays at or above its idle floor.
                        if stale && state.in_use + state.idle.len() >= shared.config.min_idle {
                            tracing::trace!("evicting idle connection past TTL");
                            drop(entry);
                            continue;
                        }
                        state.in_use += 1;
                        step = Step::Reuse(entry.conn);
                    } else if state.in_use < shared.config.max_connections {
                        // Reserve a slot; the factory runs outside the lock.
                        state.in_use += 1;
                        step = Step::Connect;
                    }
                    break;
                }
                step
            };

            match step {
                Step::Reuse(conn) => {
                    return Ok(PooledConnection {
                        shared: Arc::clone(shared),
                        conn: Some(conn),
                        release_slot: true,
                    });
                }
                Step::Connect => {
                    tracing::debug!("establishing new pooled connection");
                    match shared.manager.connect().await {
                        Ok(conn) => {
                            return Ok(PooledConnection {
                                shared: Arc::clone(shared),
                                conn: Some(conn),
                                release_slot: true,
                            });
                        }
                        Err(e) => {
                            shared.state.lock().in_use -= 1;
                            shared.notify.notify_one();
                            return Err(e);
                        }
                    }
                }
                Step::Wait => {
                    if timeout.is_zero() {
                        return Err(PoolError::AcquireTimeout(timeout));
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(PoolError::AcquireTimeout(timeout));
                    }
                    if tokio::time::timeout(remaining, shared.notify.notified())
                        .await
                        .is_err()
                    {
                        return Err(PoolError::AcquireTimeout(timeout));
                    }
                }
            }
        }
    }

    /// Pin a connection to a host-engine transaction.
    ///
    /// Until [`Pool::unpin`], the connection is never handed to another
    /// caller; operations inside the transaction check it out with
    /// [`Pool::checkout_pinned`].
    pub fn pin(&self, transaction: u64, mut conn: PooledConnection<M>) {
        let inner = conn.conn.take();
        // The capacity slot stays occupied for the lifetime of the pin.
        conn.release_slot = false;
        if let Some(inner) = inner {
            tracing::debug!(transaction, "pinning connection to transaction");
            self.shared.state.lock().pinned.insert(transaction, Some(inner));
        }
    }

    /// Whether a transaction currently has a pinned connection.
    #[must_use]
    pub fn has_pin(&self, transaction: u64) -> bool {
        self.shared.state.lock().pinned.contains_key(&transaction)
    }

    /// Check out the pinned connection for an operation inside the
    /// transaction (queries, DML, and schema lookups alike).
    pub fn checkout_pinned(&self, transaction: u64) -> Result<PinnedConnection<M>, PoolError> {
        let mut state = self.shared.state.lock();
        let slot = state
            .pinned
            .get_mut(&transaction)
            .ok_or(PoolError::NotPinned(transaction))?;
        let conn = slot.take().ok_or(PoolError::PinnedBusy(transaction))?;
        Ok(PinnedConnection {
            shared: Arc::clone(&self.shared),
            transaction,
            conn: Some(conn),
        })
    }

    /// Remove the pin at commit/rollback. The returned handle releases the
    /// connection back to the pool when dropped.
    pub fn unpin(&self, transaction: u64) -> Result<PooledConnection<M>, PoolError> {
        let mut state = self.shared.state.lock();
        match state.pinned.remove(&transaction) {
            Some(Some(conn)) => Ok(PooledConnection {
                shared: Arc::clone(&self.shared),
                conn: Some(conn),
                release_slot: true,
            }),
            Some(None) => {
                // Put the marker back; an operation still holds it.
                state.pinned.insert(transaction, None);
                Err(PoolError::PinnedBusy(transaction))
            }
            None => Err(PoolError::NotPinned(transaction)),
        }
    }

    /// Current pool counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.in_use,
            pinned: state.pinned.len(),
            max: self.shared.config.max_connections,
        }
    }

    /// One maintenance sweep: evict idle connections past their TTL beyond
    /// the idle floor, then ping the survivors and destroy the unhealthy.
    pub async fn run_maintenance(&self) {
        let shared = &self.shared;
        let ttl = shared.config.idle_ttl;

        // Eviction pass.
        if !ttl.is_zero() {
            let mut evicted = {
                let mut state = shared.state.lock();
                let floor = shared.config.min_idle.saturating_sub(state.in_use);
                let mut evicted = Vec::new();
                // Oldest entries sit at the front of the LIFO vector.
                while state.idle.len() > floor {
                    let Some(first) = state.idle.first() else {
                        break;
                    };
                    if first.since.elapsed() < ttl {
                        break;
                    }
                    evicted.push(state.idle.remove(0));
                }
                evicted
            };
            if !evicted.is_empty() {
                tracing::debug!(count = evicted.len(), "evicted idle connections past TTL");
            }
            evicted.clear();
        }

        // Keepalive pass: take the idle set out, ping outside the lock.
        let entries: Vec<IdleEntry<M::Connection>> =
            std::mem::take(&mut shared.state.lock().idle);
        let mut healthy = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if shared.manager.ping(&mut entry.conn).await {
                healthy.push(entry);
            } else {
                tracing::debug!("destroying idle connection that failed keepalive");
            }
        }
        let mut state = shared.state.lock();
        // Preserve age ordering: refreshed entries go back in place.
        healthy.append(&mut state.idle);
        state.idle = healthy;
        drop(state);
        shared.notify.notify_waiters();
    }

    /// Spawn a background sweep running every `interval`.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if pool.shared.closed.load(Ordering::Acquire) {
                    break;
                }
                pool.run_maintenance().await;
            }
        })
    }

    /// Close the pool: destroy idle connections and fail future acquires.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut state = self.shared.state.lock();
        state.idle.clear();
        state.pinned.clear();
        drop(state);
        self.shared.notify.notify_waiters();
        tracing::info!("connection pool closed");
    }
}

/// A connection checked out of the pool.
///
/// Dropping the handle returns the connection to the idle queue when it is
/// recyclable, and destroys it otherwise.
pub struct PooledConnection<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    conn: Option<M::Connection>,
    /// Cleared when the capacity slot outlives this handle (pinning).
    release_slot: bool,
}

impl<M: ManageConnection> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("release_slot", &self.release_slot)
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Take the connection out of pool management entirely.
    ///
    /// The pool slot is released; the connection is destroyed when the
    /// caller drops it.
    #[allow(clippy::expect_used)]
    pub fn detach(mut self) -> M::Connection {
        // Drop bookkeeping happens in Drop; conn is now caller-owned.
        self.conn.take().expect("detach on released connection")
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already released")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already released")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if !self.release_slot {
            return;
        }
        let shared = &self.shared;
        let recycle = !shared.closed.load(Ordering::Acquire) && shared.config.recycle;

        let mut state = shared.state.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if let Some(conn) = self.conn.take() {
            if recycle && shared.manager.is_recyclable(&conn) {
                state.idle.push(IdleEntry {
                    conn,
                    since: Instant::now(),
                });
            } else {
                tracing::debug!("destroying non-recyclable connection on release");
                drop(conn);
            }
        }
        drop(state);
        shared.notify.notify_one();
    }
}

/// A pinned connection checked out for one operation inside a transaction.
///
/// Dropping the guard returns the connection to its pin slot, not to the
/// idle queue.
pub struct PinnedConnection<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    transaction: u64,
    conn: Option<M::Connection>,
}

impl<M: ManageConnection> Deref for PinnedConnection<M> {
    type Target = M::Connection;

    #[allow(clippy::expect_used)]
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pinned connection already returned")
    }
}

impl<M: ManageConnection> DerefMut for PinnedConnection<M> {
    #[allow(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pinned connection already returned")
    }
}

impl<M: ManageConnection> Drop for PinnedConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut state = self.shared.state.lock();
            if let Some(slot) = state.pinned.get_mut(&self.transaction) {
                *slot = Some(conn);
            }
            // If the pin vanished (pool closed), the connection drops here.
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct TestConn {
        id: usize,
        clean: bool,
        healthy: bool,
    }

    struct TestManager {
        connects: AtomicUsize,
        fail_connect: AtomicBool,
    }

    impl TestManager {
        fn new() -> Self {
            Self {
                connects: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
            }
        }
    }

    impl ManageConnection for TestManager {
        type Connection = TestConn;

        async fn connect(&self) -> Result<TestConn, PoolError> {
            if self.fail_connect.load(Ordering::Relaxed) {
                return Err(PoolError::Connect("test failure".into()));
            }
            let id = self.connects.fetch_add(1, Ordering::Relaxed);
            Ok(TestConn {
                id,
                clean: true,
                healthy: true,
            })
        }

        fn is_recyclable(&self, conn: &TestConn) -> bool {
            conn.clean
        }

        async fn ping(&self, conn: &mut TestConn) -> bool {
            conn.healthy
        }
    }

    fn pool_with(config: PoolConfig) -> Pool<TestManager> {
        Pool::new(TestManager::new(), config)
    }

    #[tokio::test]
    async fn recycles_connections_lifo() {
        let pool = pool_with(PoolConfig::default());

        let first = pool.acquire().await.unwrap();
        let first_id = first.id;
        drop(first);

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id, first_id, "idle connection must be reused");
        assert_eq!(pool.status().in_use, 1);
    }

    #[tokio::test]
    async fn dirty_connections_are_destroyed_on_release() {
        let pool = pool_with(PoolConfig::default());

        let mut conn = pool.acquire().await.unwrap();
        conn.clean = false;
        drop(conn);

        assert_eq!(pool.status().idle, 0);
        let replacement = pool.acquire().await.unwrap();
        assert_eq!(replacement.id, 1, "a fresh connection must be created");
    }

    #[tokio::test]
    async fn capacity_blocks_until_release() {
        let config = PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let pool = pool_with(config);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        let conn = waiter.await.unwrap().unwrap();
        assert_eq!(pool.status().in_use, 1);
        drop(conn);
    }

    #[tokio::test]
    async fn acquire_times_out_at_capacity() {
        let config = PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let pool = pool_with(config);

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));
    }

    #[tokio::test]
    async fn zero_timeout_fails_immediately() {
        let config = PoolConfig {
            max_connections: 1,
            acquire_timeout: Duration::ZERO,
            ..Default::default()
        };
        let pool = pool_with(config);
        let _held = pool.acquire().await.unwrap();

        let start = Instant::now();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn failed_connect_releases_slot() {
        let pool = pool_with(PoolConfig {
            max_connections: 1,
            ..Default::default()
        });
        pool.shared.manager.fail_connect.store(true, Ordering::Relaxed);
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.status().in_use, 0);

        pool.shared.manager.fail_connect.store(false, Ordering::Relaxed);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn stale_idle_connection_is_replaced() {
        let config = PoolConfig {
            idle_ttl: Duration::from_millis(10),
            ..Default::default()
        };
        let pool = pool_with(config);

        let conn = pool.acquire().await.unwrap();
        let original = conn.id;
        drop(conn);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let conn = pool.acquire().await.unwrap();
        assert_ne!(conn.id, original, "stale connection must be evicted");
    }

    #[tokio::test]
    async fn min_idle_floor_blocks_eviction() {
        let config = PoolConfig {
            idle_ttl: Duration::from_millis(10),
            min_idle: 1,
            ..Default::default()
        };
        let pool = pool_with(config);

        let conn = pool.acquire().await.unwrap();
        let original = conn.id;
        drop(conn);
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Evicting would drop the pool below its floor; the stale
        // connection is reused instead.
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, original);
    }

    #[tokio::test]
    async fn maintenance_destroys_unhealthy_idle() {
        let pool = pool_with(PoolConfig::default());

        let mut conn = pool.acquire().await.unwrap();
        conn.healthy = false;
        drop(conn);
        assert_eq!(pool.status().idle, 1);

        pool.run_maintenance().await;
        assert_eq!(pool.status().idle, 0);
    }

    #[tokio::test]
    async fn pinned_connection_is_reused_within_transaction() {
        let pool = pool_with(PoolConfig::default());

        let conn = pool.acquire().await.unwrap();
        let pinned_id = conn.id;
        pool.pin(7, conn);
        assert!(pool.has_pin(7));
        assert_eq!(pool.status().pinned, 1);

        // Every checkout inside the transaction sees the same connection.
        for _ in 0..3 {
            let guard = pool.checkout_pinned(7).unwrap();
            assert_eq!(guard.id, pinned_id);
            drop(guard);
        }

        // While checked out, a second checkout is refused.
        let guard = pool.checkout_pinned(7).unwrap();
        assert!(matches!(
            pool.checkout_pinned(7),
            Err(PoolError::PinnedBusy(7))
        ));
        drop(guard);

        // Unpin returns the connection to the pool.
        let conn = pool.unpin(7).unwrap();
        assert_eq!(conn.id, pinned_id);
        drop(conn);
        assert_eq!(pool.status().pinned, 0);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn pinned_connection_is_never_handed_to_others() {
        let config = PoolConfig {
            max_connections: 2,
            ..Default::default()
        };
        let pool = pool_with(config);

        let conn = pool.acquire().await.unwrap();
        let pinned_id = conn.id;
        pool.pin(1, conn);

        // Plain acquire gets a different connection.
        let other = pool.acquire().await.unwrap();
        assert_ne!(other.id, pinned_id);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquire() {
        let pool = pool_with(PoolConfig::default());
        pool.close();
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}

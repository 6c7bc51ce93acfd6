//! Connection pooling for the sonic client.
//!
//! Bounds how many transport connections are open at once and hides
//! connection churn from callers. Waiters are served in arrival order: the
//! capacity gate is a fair tokio [`Semaphore`], so a connection freed by one
//! exchange goes to the longest-waiting acquirer.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::connection::{Connection, ConnectionId};
use crate::error::{Error, Result};
use crate::transport::{Transport, CLOSE_NORMAL};

/// Default maximum pool size.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Default minimum pool size.
pub const DEFAULT_MIN_CONNECTIONS: usize = 1;

/// Default time to wait for a free connection.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default time to wait for a liveness check.
pub const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Close reason used when the pool retires a connection.
pub const DESTROY_REASON: &str = "pool#destroy";

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections to keep open.
    pub min_connections: usize,
    /// Maximum number of connections open at once.
    pub max_connections: usize,
    /// Timeout for acquiring a connection, measured from the acquire call.
    pub acquire_timeout: Duration,
    /// Timeout for the liveness check run before reusing an idle connection.
    pub validate_timeout: Duration,
    /// Attempts made to open a connection before giving up.
    pub max_tries: usize,
}

impl PoolConfig {
    /// Create a new pool configuration with default settings.
    pub fn new() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            validate_timeout: DEFAULT_VALIDATE_TIMEOUT,
            max_tries: 1,
        }
    }

    /// Set the minimum connections.
    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum connections. Values below one are raised to one.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the validation timeout.
    pub fn with_validate_timeout(mut self, timeout: Duration) -> Self {
        self.validate_timeout = timeout;
        self
    }

    /// Set the number of attempts made when opening a connection.
    pub fn with_max_tries(mut self, tries: usize) -> Self {
        self.max_tries = tries.max(1);
        self
    }

    fn effective_min(&self) -> usize {
        self.min_connections.min(self.max_connections)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections open, idle or borrowed.
    pub size: usize,
    /// Connections waiting for reuse.
    pub idle: usize,
    /// Connections handed out, or reserved by an acquirer.
    pub borrowed: usize,
    /// Whether the pool has started draining.
    pub draining: bool,
}

/// A connection on loan from the pool.
///
/// Give it back with [`ConnectionPool::release`] or
/// [`ConnectionPool::destroy`]. Dropping it without doing either destroys
/// the connection, since its protocol state is unknown.
pub struct PooledConnection {
    connection: Connection,
    returned: bool,
    _permit: OwnedSemaphorePermit,
    pool: Arc<ConnectionPoolInner>,
}

impl PooledConnection {
    /// Hand the socket back to the pool. Only the first call has an effect.
    fn give_back(&mut self, destroy: bool) {
        if self.returned {
            return;
        }
        self.returned = true;
        let mut conn = self.connection.detach();
        if destroy {
            conn.mark_for_destroy();
        }
        self.pool.return_connection(conn);
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.connection
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.give_back(true);
        // The permit is released after this body runs, so a waiter woken by
        // it already sees the connection back in the idle set.
    }
}

/// Internal pool state.
struct PoolState {
    idle: VecDeque<Connection>,
    borrowed: usize,
    draining: bool,
}

impl PoolState {
    fn size(&self) -> usize {
        self.idle.len() + self.borrowed
    }
}

struct ConnectionPoolInner {
    address: String,
    transport: Arc<dyn Transport>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
    returned: Notify,
    next_connection_id: AtomicU64,
}

impl ConnectionPoolInner {
    /// Open a connection, retrying up to `max_tries` times.
    async fn create(&self) -> Result<Connection> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.open(&self.address).await {
                Ok(channel) => {
                    let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
                    tracing::debug!(connection = id, address = %self.address, "connection opened");
                    return Ok(Connection::new(id, channel));
                }
                Err(e) if attempt < self.config.max_tries => {
                    tracing::warn!(attempt, error = %e, "failed to open connection, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Liveness check run before an idle connection is handed out.
    async fn validate(&self, conn: &mut Connection) -> bool {
        conn.drain_pending_events();
        if !conn.is_open() {
            tracing::debug!(connection = conn.id(), "idle connection closed");
            return false;
        }

        match tokio::time::timeout(self.config.validate_timeout, conn.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(connection = conn.id(), error = %e, "connection failed validation");
                false
            }
            Err(_) => {
                tracing::warn!(
                    connection = conn.id(),
                    timeout = ?self.config.validate_timeout,
                    "connection validation timed out"
                );
                false
            }
        }
    }

    /// Take a validated idle connection, or open a new one.
    async fn checkout(&self) -> Result<Connection> {
        loop {
            let candidate = self.state.lock().idle.pop_back();
            let Some(mut conn) = candidate else {
                break;
            };
            if self.validate(&mut conn).await {
                return Ok(conn);
            }
            conn.close(CLOSE_NORMAL, DESTROY_REASON);
        }

        self.create().await
    }

    fn return_connection(self: &Arc<Self>, mut conn: Connection) {
        conn.drain_pending_events();
        let reusable = !conn.is_marked_for_destroy() && conn.is_open();

        let mut state = self.state.lock();
        state.borrowed = state.borrowed.saturating_sub(1);
        if reusable && !state.draining {
            state.idle.push_back(conn);
            drop(state);
        } else {
            let below_min = !state.draining && state.size() < self.config.effective_min();
            drop(state);
            tracing::debug!(connection = conn.id(), "destroying connection");
            conn.close(CLOSE_NORMAL, DESTROY_REASON);
            if below_min {
                self.replenish();
            }
        }

        self.returned.notify_one();
    }

    /// Undo an acquirer's slot reservation after checkout failed.
    fn cancel_reservation(self: &Arc<Self>) {
        let below_min = {
            let mut state = self.state.lock();
            state.borrowed = state.borrowed.saturating_sub(1);
            !state.draining && state.size() < self.config.effective_min()
        };
        if below_min {
            self.replenish();
        }
        self.returned.notify_one();
    }

    /// Bring the pool back up to its minimum size in the background.
    fn replenish(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pool = self.clone();
        handle.spawn(async move { pool.fill_to_min().await });
    }

    async fn fill_to_min(&self) {
        loop {
            // Hold a permit while opening so the pool never exceeds its bound.
            let Ok(_permit) = self.semaphore.clone().try_acquire_owned() else {
                return;
            };
            {
                let state = self.state.lock();
                if state.draining || state.size() >= self.config.effective_min() {
                    return;
                }
            }

            match self.create().await {
                Ok(mut conn) => {
                    let mut state = self.state.lock();
                    if state.draining {
                        drop(state);
                        conn.close(CLOSE_NORMAL, DESTROY_REASON);
                        return;
                    }
                    state.idle.push_back(conn);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to replenish connection pool");
                    return;
                }
            }
        }
    }
}

/// A bounded pool of connections to one service address.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use sonic_client::{ConnectionPool, PoolConfig, WsTransport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = Arc::new(WsTransport::default());
///     let pool = ConnectionPool::new("ws://127.0.0.1:9111/v1/query", transport, PoolConfig::default()).await;
///
///     let conn = pool.acquire().await?;
///     pool.release(conn);
///
///     pool.drain().await;
///     Ok(())
/// }
/// ```
pub struct ConnectionPool {
    inner: Arc<ConnectionPoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool.
    ///
    /// Opens `min_connections` connections up front. Failures are logged and
    /// do not prevent the pool from starting.
    pub async fn new(
        address: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: PoolConfig,
    ) -> Self {
        let inner = Arc::new(ConnectionPoolInner {
            address: address.into(),
            transport,
            semaphore: Arc::new(Semaphore::new(config.max_connections)),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                borrowed: 0,
                draining: false,
            }),
            returned: Notify::new(),
            next_connection_id: AtomicU64::new(1),
            config,
        });

        for _ in 0..inner.config.effective_min() {
            match inner.create().await {
                Ok(conn) => inner.state.lock().idle.push_back(conn),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to open initial pool connection");
                }
            }
        }

        Self { inner }
    }

    /// Acquire a connection from the pool.
    ///
    /// Waits in arrival order while the pool is at capacity, failing with
    /// [`Error::AcquireTimeout`] once `acquire_timeout` has passed since the
    /// call, or [`Error::PoolDraining`] once [`drain`](Self::drain) began.
    /// The deadline also covers opening and validating the connection.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = Instant::now() + timeout;

        let permit = tokio::time::timeout_at(deadline, self.inner.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| Error::AcquireTimeout(timeout))?
            .map_err(|_| Error::PoolDraining)?;

        // Reserve the slot before connecting so drain waits for us.
        {
            let mut state = self.inner.state.lock();
            if state.draining {
                return Err(Error::PoolDraining);
            }
            state.borrowed += 1;
        }

        // Opening and validating count against the same deadline.
        let result = match tokio::time::timeout_at(deadline, self.inner.checkout()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(timeout = ?timeout, "connection checkout timed out");
                Err(Error::AcquireTimeout(timeout))
            }
        };

        match result {
            Ok(conn) => Ok(PooledConnection {
                connection: conn,
                returned: false,
                _permit: permit,
                pool: self.inner.clone(),
            }),
            Err(e) => {
                self.inner.cancel_reservation();
                Err(e)
            }
        }
    }

    /// Return a connection for reuse.
    ///
    /// A connection flagged with [`Connection::mark_for_destroy`] or found
    /// closed is destroyed instead.
    pub fn release(&self, mut pooled: PooledConnection) {
        pooled.give_back(false);
    }

    /// Close and remove a connection.
    pub fn destroy(&self, mut pooled: PooledConnection) {
        pooled.give_back(true);
    }

    /// Check a borrowed connection. One that fails is flagged, so releasing
    /// it destroys it.
    pub async fn validate(&self, pooled: &mut PooledConnection) -> bool {
        let valid = self.inner.validate(pooled).await;
        if !valid {
            pooled.mark_for_destroy();
        }
        valid
    }

    /// Stop serving acquisitions, wait for every borrowed connection to come
    /// back, then close all connections.
    pub async fn drain(&self) {
        self.inner.state.lock().draining = true;
        self.inner.semaphore.close();
        tracing::debug!("draining connection pool");

        loop {
            let returned = self.inner.returned.notified();
            let borrowed = self.inner.state.lock().borrowed;
            if borrowed == 0 {
                break;
            }
            tracing::debug!(borrowed, "waiting for borrowed connections");
            returned.await;
        }

        let idle: Vec<Connection> = self.inner.state.lock().idle.drain(..).collect();
        for mut conn in idle {
            conn.close(CLOSE_NORMAL, DESTROY_REASON);
        }
        tracing::debug!("connection pool drained");
    }

    /// Get a snapshot of the pool.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            size: state.size(),
            idle: state.idle.len(),
            borrowed: state.borrowed,
            draining: state.draining,
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Identifiers of the idle connections, oldest first.
    pub fn idle_connections(&self) -> Vec<ConnectionId> {
        self.inner.state.lock().idle.iter().map(|c| c.id()).collect()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("max_connections", &self.inner.config.max_connections)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;

    use super::*;
    use crate::transport::testing::RecordingLink;
    use crate::transport::{Channel, Link};

    /// Transport handing out recording links and counting opens.
    #[derive(Default)]
    struct CountingTransport {
        attempts: AtomicUsize,
        opened: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        fail_next: AtomicUsize,
        links: SyncMutex<Vec<Arc<RecordingLink>>>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn open(&self, address: &str) -> Result<Channel> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing_once = self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing_once || self.fail.load(Ordering::SeqCst) {
                return Err(Error::TransportOpen {
                    address: address.to_string(),
                    reason: "refused".into(),
                });
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (link, channel) = RecordingLink::channel();
            self.links.lock().push(link);
            Ok(channel)
        }
    }

    /// Transport whose dial never completes.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn open(&self, _address: &str) -> Result<Channel> {
            std::future::pending().await
        }
    }

    async fn pool_with(config: PoolConfig) -> (Arc<CountingTransport>, ConnectionPool) {
        let transport = Arc::new(CountingTransport::default());
        let pool = ConnectionPool::new("mem://test", transport.clone(), config).await;
        (transport, pool)
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .with_min_connections(2)
            .with_max_connections(20)
            .with_acquire_timeout(Duration::from_secs(60))
            .with_validate_timeout(Duration::from_secs(1))
            .with_max_tries(3);

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.acquire_timeout, Duration::from_secs(60));
        assert_eq!(config.validate_timeout, Duration::from_secs(1));
        assert_eq!(config.max_tries, 3);
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.max_tries, 1);
        assert_eq!(PoolConfig::new().with_max_connections(0).max_connections, 1);
    }

    #[tokio::test]
    async fn test_eager_min_connections() {
        let (transport, pool) = pool_with(PoolConfig::new().with_min_connections(2)).await;
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().idle, 2);
    }

    #[tokio::test]
    async fn test_startup_tolerates_open_failures() {
        let transport = Arc::new(CountingTransport::default());
        transport.fail.store(true, Ordering::SeqCst);
        let pool = ConnectionPool::new("mem://test", transport.clone(), PoolConfig::new()).await;
        assert_eq!(pool.status().size, 0);

        transport.fail.store(false, Ordering::SeqCst);
        let conn = pool.acquire().await.unwrap();
        pool.release(conn);
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_release_reuses_connection() {
        let (transport, pool) = pool_with(PoolConfig::new()).await;

        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        assert_eq!(pool.status().borrowed, 1);
        pool.release(conn);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_destroy_replaces_below_min() {
        let (transport, pool) = pool_with(PoolConfig::new()).await;

        let conn = pool.acquire().await.unwrap();
        let id = conn.id();
        pool.destroy(conn);
        assert!(!transport.links.lock()[0].is_open());

        // Replacement is opened in the background.
        for _ in 0..50 {
            if pool.status().idle == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(pool.status().idle, 1);
        assert_ne!(pool.idle_connections(), vec![id]);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_destroyed() {
        let (transport, pool) = pool_with(PoolConfig::new().with_min_connections(0)).await;

        let conn = pool.acquire().await.unwrap();
        drop(conn);

        assert_eq!(pool.status().size, 0);
        assert!(!transport.links.lock()[0].is_open());
    }

    #[tokio::test]
    async fn test_invalid_idle_connection_is_replaced() {
        let (transport, pool) = pool_with(PoolConfig::new()).await;
        transport.links.lock()[0]
            .fail_ping
            .store(true, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), 2);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert!(!transport.links.lock()[0].is_open());
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_validate_flags_failed_connection() {
        let (transport, pool) = pool_with(PoolConfig::new()).await;

        let mut conn = pool.acquire().await.unwrap();
        assert!(pool.validate(&mut conn).await);
        assert!(!conn.is_marked_for_destroy());

        transport.links.lock()[0]
            .fail_ping
            .store(true, Ordering::SeqCst);
        assert!(!pool.validate(&mut conn).await);
        assert!(conn.is_marked_for_destroy());

        pool.release(conn);
        assert!(!transport.links.lock()[0].is_open());
    }

    #[tokio::test]
    async fn test_closed_idle_connection_is_skipped() {
        let (transport, pool) = pool_with(PoolConfig::new()).await;
        transport.links.lock()[0].close(1006, "gone");

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), 2);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_acquire_timeout_covers_hanging_open() {
        let config = PoolConfig::new()
            .with_min_connections(0)
            .with_acquire_timeout(Duration::from_millis(50));
        let pool = ConnectionPool::new("mem://test", Arc::new(HangingTransport), config).await;

        let result = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
            .await
            .expect("acquire must honour its timeout while dialling");
        assert!(matches!(result, Err(Error::AcquireTimeout(_))));
        assert_eq!(pool.status().borrowed, 0);

        tokio::time::timeout(Duration::from_secs(1), pool.drain())
            .await
            .expect("drain must not wait for a timed-out acquirer");
    }

    #[tokio::test]
    async fn test_acquire_timeout_covers_slow_validation() {
        let config = PoolConfig::new()
            .with_acquire_timeout(Duration::from_millis(50))
            .with_validate_timeout(Duration::from_secs(10));
        let (transport, pool) = pool_with(config).await;
        transport.links.lock()[0]
            .hang_ping
            .store(true, Ordering::SeqCst);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::AcquireTimeout(_)));
        assert_eq!(pool.status().borrowed, 0);
    }

    #[tokio::test]
    async fn test_validation_timeout_replaces_connection() {
        let config = PoolConfig::new().with_validate_timeout(Duration::from_millis(30));
        let (transport, pool) = pool_with(config).await;
        transport.links.lock()[0]
            .hang_ping
            .store(true, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), 2);
        assert!(!transport.links.lock()[0].is_open());
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_create_retries_up_to_max_tries() {
        let transport = Arc::new(CountingTransport::default());
        transport.fail_next.store(2, Ordering::SeqCst);
        let config = PoolConfig::new().with_min_connections(0).with_max_tries(3);
        let pool = ConnectionPool::new("mem://test", transport.clone(), config).await;

        let conn = pool.acquire().await.unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        pool.release(conn);
    }

    #[tokio::test]
    async fn test_create_gives_up_after_max_tries() {
        let transport = Arc::new(CountingTransport::default());
        transport.fail_next.store(2, Ordering::SeqCst);
        let config = PoolConfig::new().with_min_connections(0).with_max_tries(2);
        let pool = ConnectionPool::new("mem://test", transport.clone(), config).await;

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::TransportOpen { .. }));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().borrowed, 0);
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let config = PoolConfig::new()
            .with_max_connections(1)
            .with_acquire_timeout(Duration::from_millis(30));
        let (_transport, pool) = pool_with(config).await;

        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::AcquireTimeout(_)));
        assert_eq!(pool.status().borrowed, 1);
        pool.release(held);
    }

    #[tokio::test]
    async fn test_waiters_served_in_order() {
        let config = PoolConfig::new()
            .with_max_connections(1)
            .with_acquire_timeout(Duration::from_secs(5));
        let (transport, pool) = pool_with(config).await;
        let pool = Arc::new(pool);

        let held = pool.acquire().await.unwrap();
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for i in 0..3 {
            let pool = pool.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                let conn = pool.acquire().await.unwrap();
                order.lock().push(i);
                tokio::time::sleep(Duration::from_millis(5)).await;
                pool.release(conn);
            }));
            // Make arrival order deterministic.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.release(held);
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drain_waits_for_borrowed() {
        let (transport, pool) = pool_with(PoolConfig::new().with_min_connections(2)).await;
        let pool = Arc::new(pool);

        let conn = pool.acquire().await.unwrap();
        let drainer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.drain().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drainer.is_finished());
        assert!(matches!(pool.acquire().await, Err(Error::PoolDraining)));

        pool.release(conn);
        drainer.await.unwrap();

        assert_eq!(pool.status().size, 0);
        assert!(transport.links.lock().iter().all(|link| !link.is_open()));
    }
}

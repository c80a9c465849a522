//! Connection Pool
//!
//! One pool per server profile. Bookkeeping lives under a single lock that is
//! never held while connecting, resetting or closing.
//!
//! A connection is always in exactly one of:
//! - `free`: idle, ready to hand out after sanitizing
//! - `in_use`: leased to a caller
//! - `quarantine`: being sanitized on its way in or out
//!
//! Connections being opened are counted too, so
//! `free + in_use + quarantine + opening <= max_size` holds at all times.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::connection::{Connection, Opener};
use super::error::{DriverError, DriverResult};
use super::profile::ServerProfile;

// ============================================================================
// PoolConfig
// ============================================================================

/// Pool settings.
///
/// | Field | Default | Meaning |
/// |-------|---------|---------|
/// | `max_size` | 100 | live connections per server |
/// | `init_size` | 1 | connections opened by [`ConnectionPool::warmup`] |
/// | `max_age` | 1 hour | connections older than this are replaced |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,
    pub init_size: usize,
    pub max_age: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            init_size: 1,
            max_age: Duration::from_secs(3600),
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// Pool settings builder.
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    pub fn init_size(mut self, size: usize) -> Self {
        self.config.init_size = size;
        self
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.config.max_age = age;
        self
    }

    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A connection owned by a pool.
///
/// Clones share the connection. Lock it to issue requests; hand it back
/// with [`ConnectionPool::release`].
#[derive(Clone)]
pub struct PooledConnection {
    id: u64,
    profile: ServerProfile,
    inner: Arc<tokio::sync::Mutex<Box<dyn Connection>>>,
}

impl PooledConnection {
    fn new(id: u64, profile: ServerProfile, connection: Box<dyn Connection>) -> Self {
        Self {
            id,
            profile,
            inner: Arc::new(tokio::sync::Mutex::new(connection)),
        }
    }

    /// Pool-assigned id, unique within the pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    /// Exclusive access to the connection. Waits while another task is
    /// using it.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Box<dyn Connection>> {
        self.inner.lock().await
    }

    pub(crate) async fn close(&self) {
        self.inner.lock().await.close().await;
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("address", &self.profile.address())
            .finish()
    }
}

// ============================================================================
// PoolMetrics
// ============================================================================

/// Snapshot of a pool's size and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Live connections, including ones being opened
    pub size: usize,
    pub free: usize,
    pub in_use: usize,
    pub quarantined: usize,
    pub max_size: usize,
    pub total_acquisitions: u64,
    pub total_opened: u64,
    pub total_closed: u64,
    /// Acquires that failed, for lack of capacity or a failed connect
    pub total_failures: u64,
}

// ============================================================================
// ConnectionPool
// ============================================================================

#[derive(Default)]
struct PoolState {
    free: VecDeque<PooledConnection>,
    in_use: HashMap<u64, PooledConnection>,
    quarantine: HashMap<u64, PooledConnection>,
    opening: usize,
    max_size: usize,
}

impl PoolState {
    fn size(&self) -> usize {
        self.free.len() + self.in_use.len() + self.quarantine.len() + self.opening
    }

    fn has_capacity(&self) -> bool {
        self.size() < self.max_size
    }
}

enum Lease {
    Reuse(PooledConnection),
    Open,
}

/// Connections to one server.
///
/// A full pool fails fast with [`DriverError::Unavailable`]; retrying is up
/// to the caller.
pub struct ConnectionPool {
    profile: ServerProfile,
    config: PoolConfig,
    opener: Arc<dyn Opener>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    total_acquisitions: AtomicU64,
    total_opened: AtomicU64,
    total_closed: AtomicU64,
    total_failures: AtomicU64,
}

impl ConnectionPool {
    pub fn new(profile: ServerProfile, config: PoolConfig, opener: Arc<dyn Opener>) -> Self {
        let state = PoolState {
            max_size: config.max_size,
            ..PoolState::default()
        };
        Self {
            profile,
            config,
            opener,
            state: Mutex::new(state),
            next_id: AtomicU64::new(1),
            total_acquisitions: AtomicU64::new(0),
            total_opened: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Hand out a free connection, or open one if there is room.
    ///
    /// Free connections are sanitized first; ones that fail sanitizing are
    /// dropped and the next is tried. `force_reset` sends RESET even to a
    /// connection that looks idle.
    pub async fn acquire(&self, force_reset: bool) -> DriverResult<PooledConnection> {
        loop {
            let lease = {
                let mut state = self.state.lock();
                if let Some(cx) = state.free.pop_front() {
                    state.quarantine.insert(cx.id(), cx.clone());
                    Lease::Reuse(cx)
                } else if state.has_capacity() {
                    state.opening += 1;
                    Lease::Open
                } else {
                    let max_size = state.max_size;
                    drop(state);
                    self.total_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(DriverError::unavailable(format!(
                        "Pool for {} is full ({} connections)",
                        self.profile.address(),
                        max_size
                    )));
                }
            };

            match lease {
                Lease::Reuse(cx) => {
                    let sane = self.sanitize(&cx, force_reset).await;
                    let granted = {
                        let mut state = self.state.lock();
                        state.quarantine.remove(&cx.id());
                        if sane && state.max_size > 0 {
                            state.in_use.insert(cx.id(), cx.clone());
                            true
                        } else {
                            false
                        }
                    };
                    if granted {
                        self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
                        return Ok(cx);
                    }
                    if sane {
                        // Pool closed while sanitizing.
                        self.discard(&cx).await;
                    }
                }
                Lease::Open => return self.open_leased().await,
            }
        }
    }

    /// Open a connection for a slot already reserved in `opening`.
    async fn open_leased(&self) -> DriverResult<PooledConnection> {
        let opened = self.opener.open(&self.profile).await;
        let (result, orphan) = {
            let mut state = self.state.lock();
            state.opening -= 1;
            match opened {
                Err(e) => (Err(e), None),
                Ok(connection) => {
                    let cx = self.wrap(connection);
                    if state.max_size == 0 {
                        let closed = DriverError::unavailable(format!(
                            "Pool for {} is closed",
                            self.profile.address()
                        ));
                        (Err(closed), Some(cx))
                    } else {
                        state.in_use.insert(cx.id(), cx.clone());
                        (Ok(cx), None)
                    }
                }
            }
        };
        if let Some(cx) = orphan {
            self.discard(&cx).await;
        }
        match &result {
            Ok(_) => {
                self.total_acquisitions.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                debug!(address = %self.profile.address(), error = %e, "open failed");
            }
        }
        result
    }

    fn wrap(&self, connection: Box<dyn Connection>) -> PooledConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.total_opened.fetch_add(1, Ordering::Relaxed);
        debug!(address = %self.profile.address(), id, "connection opened");
        PooledConnection::new(id, self.profile.clone(), connection)
    }

    /// Make `cx` fit for reuse, closing it if it is not.
    async fn sanitize(&self, cx: &PooledConnection, force_reset: bool) -> bool {
        let mut connection = cx.lock().await;
        let reason = if connection.is_broken() || connection.is_closed() {
            Some("broken")
        } else if connection.age() > self.config.max_age {
            Some("too old")
        } else if let Err(e) = connection.reset(force_reset).await {
            debug!(address = %self.profile.address(), id = cx.id(), error = %e, "reset failed");
            Some("reset failed")
        } else {
            None
        };
        match reason {
            None => true,
            Some(reason) => {
                debug!(address = %self.profile.address(), id = cx.id(), reason, "discarding connection");
                connection.close().await;
                self.total_closed.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    async fn discard(&self, cx: &PooledConnection) {
        cx.close().await;
        self.total_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a leased connection.
    ///
    /// It goes back to the free list if the pool has room and it sanitizes
    /// cleanly; otherwise it is closed.
    pub async fn release(&self, cx: PooledConnection, force_reset: bool) {
        let keep = {
            let mut state = self.state.lock();
            if state.in_use.remove(&cx.id()).is_none() {
                false
            } else if state.has_capacity() {
                state.quarantine.insert(cx.id(), cx.clone());
                true
            } else {
                false
            }
        };
        if !keep {
            debug!(address = %self.profile.address(), id = cx.id(), "closing released connection");
            self.discard(&cx).await;
            return;
        }

        let sane = self.sanitize(&cx, force_reset).await;
        let returned = {
            let mut state = self.state.lock();
            state.quarantine.remove(&cx.id());
            if sane && state.has_capacity() {
                state.free.push_back(cx.clone());
                true
            } else {
                false
            }
        };
        if sane && !returned {
            self.discard(&cx).await;
        }
    }

    /// Open up to `init_size` connections ahead of demand.
    ///
    /// Best effort: stops at the first failure, which is logged. Returns how
    /// many were opened.
    pub async fn warmup(&self) -> usize {
        let mut opened = 0;
        loop {
            {
                let mut state = self.state.lock();
                if state.size() >= self.config.init_size || !state.has_capacity() {
                    break;
                }
                state.opening += 1;
            }
            let result = self.opener.open(&self.profile).await;
            let orphan = {
                let mut state = self.state.lock();
                state.opening -= 1;
                match result {
                    Ok(connection) => {
                        let cx = self.wrap(connection);
                        if state.max_size == 0 {
                            Some(cx)
                        } else {
                            state.free.push_back(cx);
                            opened += 1;
                            None
                        }
                    }
                    Err(e) => {
                        warn!(address = %self.profile.address(), error = %e, "warm-up connection failed");
                        break;
                    }
                }
            };
            if let Some(cx) = orphan {
                self.discard(&cx).await;
                break;
            }
        }
        opened
    }

    /// Close every free connection. Leased ones are untouched.
    pub async fn prune(&self) {
        let free: Vec<PooledConnection> = self.state.lock().free.drain(..).collect();
        if !free.is_empty() {
            debug!(address = %self.profile.address(), count = free.len(), "pruning free connections");
        }
        for cx in free {
            self.discard(&cx).await;
        }
    }

    /// Change capacity. Shrinking below the current size closes nothing;
    /// surplus connections are closed as they come back.
    pub fn set_max_size(&self, max_size: usize) {
        self.state.lock().max_size = max_size;
    }

    pub fn max_size(&self) -> usize {
        self.state.lock().max_size
    }

    /// Set capacity to zero and close every connection, leased ones
    /// included. A leased connection is closed once its current call
    /// returns.
    pub async fn close(&self) {
        let (free, in_use) = {
            let mut state = self.state.lock();
            state.max_size = 0;
            let free: Vec<PooledConnection> = state.free.drain(..).collect();
            let in_use: Vec<PooledConnection> = state.in_use.drain().map(|(_, cx)| cx).collect();
            (free, in_use)
        };
        debug!(
            address = %self.profile.address(),
            free = free.len(),
            in_use = in_use.len(),
            "closing pool"
        );
        for cx in free.iter().chain(in_use.iter()) {
            self.discard(cx).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.max_size() == 0
    }

    pub fn size(&self) -> usize {
        self.state.lock().size()
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Whether `cx` is currently leased from this pool.
    pub fn leased(&self, cx: &PooledConnection) -> bool {
        self.state.lock().in_use.contains_key(&cx.id())
    }

    pub fn metrics(&self) -> PoolMetrics {
        let state = self.state.lock();
        PoolMetrics {
            size: state.size(),
            free: state.free.len(),
            in_use: state.in_use.len(),
            quarantined: state.quarantine.len(),
            max_size: state.max_size,
            total_acquisitions: self.total_acquisitions.load(Ordering::Relaxed),
            total_opened: self.total_opened.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionPool")
            .field("address", &self.profile.address())
            .field("free", &state.free.len())
            .field("in_use", &state.in_use.len())
            .field("quarantine", &state.quarantine.len())
            .field("max_size", &state.max_size)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

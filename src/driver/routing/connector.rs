//! Connector
//!
//! One logical client over a set of per-server pools. In routing mode the
//! pools to use come from a per-database routing table, refreshed from the
//! cluster's routers when it expires.
//!
//! # Acquire
//!
//! ```text
//! acquire(database, readonly)
//!   ├── direct:  least busy of all known pools
//!   └── routing: table for database (refresh if stale)
//!                 └── least busy of its readers or writers
//! ```
//!
//! Pools fail fast when full; the connector retries the whole
//! lookup-then-acquire cycle with a doubling delay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::policy::ServerSelector;
use super::table::RoutingTable;
use crate::bolt::ValueMap;
use crate::driver::bolt::{BoltOpener, BoltOptions};
use crate::driver::config::ConnectorConfig;
use crate::driver::connection::{Opener, RoutingInfo};
use crate::driver::error::{DriverError, DriverResult, ServerFailure};
use crate::driver::pool::{ConnectionPool, PooledConnection};
use crate::driver::profile::ServerProfile;
use crate::driver::task::QueryResult;
use crate::driver::transaction::{Bookmark, Transaction, TransactionConfig};

fn database_name(database: Option<&str>) -> &str {
    database.unwrap_or("<default>")
}

fn mode_name(readonly: bool) -> &'static str {
    if readonly {
        "read"
    } else {
        "write"
    }
}

/// Pooled, optionally routed, access to a server or cluster.
pub struct Connector {
    config: ConnectorConfig,
    opener: Arc<dyn Opener>,
    pools: RwLock<HashMap<ServerProfile, Arc<ConnectionPool>>>,
    tables: RwLock<HashMap<Option<String>, RoutingTable>>,
    /// Open transactions by id, with the connection they run on
    transactions: Mutex<HashMap<String, PooledConnection>>,
    selector: ServerSelector,
    /// Serializes routing table refreshes
    refresh_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl Connector {
    /// Connector opening Bolt connections per `config`.
    pub fn new(config: ConnectorConfig) -> DriverResult<Self> {
        let opener = BoltOpener::new(BoltOptions::from_config(&config));
        Self::with_opener(config, Arc::new(opener))
    }

    /// Connector opening connections through `opener`.
    pub fn with_opener(config: ConnectorConfig, opener: Arc<dyn Opener>) -> DriverResult<Self> {
        config.validate()?;
        debug!(
            address = %config.profile.address(),
            routing = config.routing,
            "connector created"
        );
        let selector = ServerSelector::new(config.routing_policy);
        Ok(Self {
            config,
            opener,
            pools: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            selector,
            refresh_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_closed() {
            Err(DriverError::unavailable("Connector is closed"))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Pools
    // ========================================================================

    /// Pool for `profile`, registering and warming it up on first use.
    async fn ensure_pool(&self, profile: &ServerProfile) -> Arc<ConnectionPool> {
        if let Some(pool) = self.pools.read().get(profile) {
            return pool.clone();
        }
        let (pool, created) = {
            let mut pools = self.pools.write();
            match pools.get(profile) {
                Some(pool) => (pool.clone(), false),
                None => {
                    let pool = Arc::new(ConnectionPool::new(
                        profile.clone(),
                        self.config.pool.clone(),
                        self.opener.clone(),
                    ));
                    pools.insert(profile.clone(), pool.clone());
                    (pool, true)
                }
            }
        };
        if created {
            debug!(address = %profile.address(), "pool registered");
            pool.warmup().await;
        }
        pool
    }

    /// Registered pool for `profile`.
    pub fn pool(&self, profile: &ServerProfile) -> Option<Arc<ConnectionPool>> {
        self.pools.read().get(profile).cloned()
    }

    /// Profiles with a registered pool.
    pub fn profiles(&self) -> Vec<ServerProfile> {
        self.pools.read().keys().cloned().collect()
    }

    /// Close the idle connections to `profile`.
    pub async fn prune(&self, profile: &ServerProfile) {
        if let Some(pool) = self.pool(profile) {
            pool.prune().await;
        }
    }

    /// Drop a server that failed at the transport level: prune its pool and
    /// stop routing reads and writes to it.
    async fn forget(&self, profile: &ServerProfile) {
        warn!(address = %profile.address(), "server unreachable, dropping it");
        {
            let mut tables = self.tables.write();
            for table in tables.values_mut() {
                table.deactivate(profile);
            }
        }
        self.prune(profile).await;
    }

    // ========================================================================
    // Acquire / release
    // ========================================================================

    /// Lease a connection for `database`, to a reader when `readonly`.
    ///
    /// Tries at least three times, doubling the delay between attempts,
    /// and gives up early once `timeout` (default `acquire_timeout`) has
    /// passed. Only unavailability and transport failures are retried.
    pub async fn acquire(
        &self,
        database: Option<&str>,
        readonly: bool,
        timeout: Option<Duration>,
    ) -> DriverResult<PooledConnection> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout.unwrap_or(self.config.acquire_timeout);
        let attempts = self.config.acquire_attempts();
        let mut delay = self.config.retry_delay;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.try_acquire(database, readonly).await {
                Ok(cx) => return Ok(cx),
                Err(e) if e.is_retryable() || e.is_transport() => {
                    warn!(
                        attempt,
                        database = database_name(database),
                        mode = mode_name(readonly),
                        error = %e,
                        "acquire failed"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if attempt == attempts || now >= deadline {
                break;
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay *= 2;
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(DriverError::unavailable(format!(
            "No {} connection for database {}: {}",
            mode_name(readonly),
            database_name(database),
            reason
        )))
    }

    async fn try_acquire(&self, database: Option<&str>, readonly: bool) -> DriverResult<PooledConnection> {
        let candidates: Vec<Arc<ConnectionPool>> = if self.config.routing {
            let table = self.routing_table_for(database, readonly).await?;
            let mut pools = Vec::with_capacity(table.servers(readonly).len());
            for profile in table.servers(readonly) {
                pools.push(self.ensure_pool(profile).await);
            }
            pools
        } else {
            self.ensure_pool(&self.config.profile).await;
            let pools: Vec<Arc<ConnectionPool>> = self.pools.read().values().cloned().collect();
            pools
        };

        let pool = self
            .selector
            .select(&candidates, |pool| pool.in_use_count())
            .cloned()
            .ok_or_else(|| {
                DriverError::unavailable(format!(
                    "No {} servers for database {}",
                    mode_name(readonly),
                    database_name(database)
                ))
            })?;

        match pool.acquire(false).await {
            Ok(cx) => Ok(cx),
            Err(e) => {
                if e.is_transport() {
                    self.forget(pool.profile()).await;
                }
                Err(e)
            }
        }
    }

    /// Return `cx` to the pool of its profile. Closed when that pool is gone.
    pub async fn release(&self, cx: PooledConnection) {
        match self.pool(cx.profile()) {
            Some(pool) => pool.release(cx, false).await,
            None => {
                debug!(address = %cx.profile().address(), id = cx.id(), "no pool, closing");
                cx.close().await;
            }
        }
    }

    /// Release after an operation on `database`, then react to its failure.
    async fn settle<T>(
        &self,
        cx: PooledConnection,
        database: Option<&str>,
        outcome: DriverResult<T>,
    ) -> DriverResult<T> {
        let profile = cx.profile().clone();
        self.release(cx).await;
        if let Err(e) = &outcome {
            self.note_failure(&profile, database, e).await;
        }
        outcome
    }

    /// Drop `profile` on transport failure; stop writing to it when it is
    /// no longer the leader for `database`.
    async fn note_failure(&self, profile: &ServerProfile, database: Option<&str>, e: &DriverError) {
        if e.is_transport() {
            self.forget(profile).await;
        } else if e.server_failure().map_or(false, ServerFailure::is_not_a_leader) {
            self.demote(profile, database);
        }
    }

    /// Remove `profile` from the writers of `database` and expire the table.
    fn demote(&self, profile: &ServerProfile, database: Option<&str>) {
        if let Some(table) = self.tables.write().get_mut(&database.map(str::to_string)) {
            warn!(
                address = %profile.address(),
                database = database_name(database),
                "server is no longer the leader"
            );
            table.remove_writer(profile);
            table.expire();
        }
    }

    // ========================================================================
    // Routing tables
    // ========================================================================

    /// Cached routing table for `database`.
    pub fn routing_table(&self, database: Option<&str>) -> Option<RoutingTable> {
        self.tables.read().get(&database.map(str::to_string)).cloned()
    }

    /// Mark the table for `database` stale. The next acquire refreshes it.
    pub fn invalidate_routing_table(&self, database: Option<&str>) {
        if let Some(table) = self.tables.write().get_mut(&database.map(str::to_string)) {
            debug!(database = database_name(database), "routing table invalidated");
            table.expire();
        }
    }

    async fn routing_table_for(&self, database: Option<&str>, readonly: bool) -> DriverResult<RoutingTable> {
        if let Some(table) = self.tables.read().get(&database.map(str::to_string)) {
            if table.is_fresh(readonly) {
                return Ok(table.clone());
            }
        }
        self.refresh(database, readonly).await
    }

    /// Fetch a new table for `database` from the known routers, then the seed.
    async fn refresh(&self, database: Option<&str>, readonly: bool) -> DriverResult<RoutingTable> {
        let _refreshing = self.refresh_lock.lock().await;
        let key = database.map(str::to_string);

        let mut routers = {
            let tables = self.tables.read();
            match tables.get(&key) {
                // Refreshed by another task while this one waited.
                Some(table) if table.is_fresh(readonly) => return Ok(table.clone()),
                Some(table) => table.routers.clone(),
                None => Vec::new(),
            }
        };
        if !routers.contains(&self.config.profile) {
            routers.push(self.config.profile.clone());
        }

        for router in &routers {
            debug!(
                router = %router.address(),
                database = database_name(database),
                "fetching routing table"
            );
            match self.fetch_routing_info(router, database).await {
                Ok(info) => {
                    let table = RoutingTable::from_info(key.clone(), &info, &self.config.profile);
                    if table.routers.is_empty() {
                        warn!(router = %router.address(), "routing table names no routers");
                        continue;
                    }
                    self.apply(table.clone()).await;
                    return Ok(table);
                }
                Err(e) => {
                    warn!(router = %router.address(), error = %e, "routing table refresh failed");
                }
            }
        }

        Err(DriverError::unavailable(format!(
            "No router could provide a routing table for database {}",
            database_name(database)
        )))
    }

    async fn fetch_routing_info(&self, router: &ServerProfile, database: Option<&str>) -> DriverResult<RoutingInfo> {
        let pool = self.ensure_pool(router).await;
        let cx = pool.acquire(false).await?;
        let context = self.config.routing_context_for(router);
        let outcome = {
            let mut connection = cx.lock().await;
            connection.route(database, &context).await
        };
        pool.release(cx, false).await;
        if let Err(e) = &outcome {
            if e.is_transport() {
                pool.prune().await;
            }
        }
        outcome
    }

    /// Install `table`, registering pools for its servers and pruning pools
    /// of servers that dropped out.
    async fn apply(&self, table: RoutingTable) {
        for profile in table.all_servers() {
            self.ensure_pool(&profile).await;
        }

        let previous = self.tables.write().insert(table.database.clone(), table.clone());
        info!(
            database = database_name(table.database.as_deref()),
            routers = ?table.routers.iter().map(ServerProfile::address).collect::<Vec<_>>(),
            readers = ?table.readers.iter().map(ServerProfile::address).collect::<Vec<_>>(),
            writers = ?table.writers.iter().map(ServerProfile::address).collect::<Vec<_>>(),
            ttl = ?table.ttl(),
            "routing table updated"
        );

        let dropped: Vec<Arc<ConnectionPool>> = match previous {
            None => Vec::new(),
            Some(previous) => {
                let tables = self.tables.read();
                let mut pools = self.pools.write();
                let gone: Vec<Arc<ConnectionPool>> = previous
                    .all_servers()
                    .into_iter()
                    .filter(|profile| *profile != self.config.profile)
                    .filter(|profile| !tables.values().any(|t| t.contains(profile)))
                    .filter_map(|profile| pools.remove(&profile))
                    .collect();
                gone
            }
        };
        for pool in dropped {
            debug!(address = %pool.profile().address(), "server left the routing table");
            pool.prune().await;
        }
    }

    // ========================================================================
    // Queries and transactions
    // ========================================================================

    /// Run `query` in an auto-commit transaction and buffer its records.
    ///
    /// Transient and not-a-leader failures are retried on a fresh
    /// connection; not-a-leader also expires the routing table.
    pub async fn auto_run(
        &self,
        query: &str,
        parameters: ValueMap,
        config: &TransactionConfig,
    ) -> DriverResult<QueryResult> {
        let database = config.database.as_deref();
        let attempts = self.config.acquire_attempts();
        let mut delay = self.config.retry_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let cx = self.acquire(database, config.is_readonly(), None).await?;
            let outcome = {
                let mut connection = cx.lock().await;
                match connection.auto_run(query, parameters.clone(), config).await {
                    Ok(result) => connection.buffer(&result).await.map(|()| result),
                    Err(e) => Err(e),
                }
            };
            let e = match self.settle(cx, database, outcome).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let retryable = e
                .server_failure()
                .map_or(false, |failure| failure.is_transient() || failure.is_not_a_leader());
            if !retryable || attempt >= attempts {
                return Err(e);
            }
            warn!(attempt, error = %e, "retrying query");
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    /// Open an explicit transaction, binding it to its connection until
    /// commit or rollback.
    pub async fn begin(&self, config: &TransactionConfig) -> DriverResult<Transaction> {
        let cx = self.acquire(config.database.as_deref(), config.is_readonly(), None).await?;
        let begun = {
            let mut connection = cx.lock().await;
            connection.begin(config).await
        };
        match begun {
            Ok(tx) => {
                debug!(tx = %tx, address = %cx.profile().address(), "transaction bound");
                self.transactions.lock().insert(tx.id().to_string(), cx);
                Ok(tx)
            }
            Err(e) => self.settle(cx, config.database.as_deref(), Err(e)).await,
        }
    }

    fn bound(&self, tx: &Transaction) -> DriverResult<PooledConnection> {
        self.transactions
            .lock()
            .get(tx.id())
            .cloned()
            .ok_or_else(|| DriverError::transaction(format!("{} is not open on this connector", tx)))
    }

    fn unbind(&self, tx: &Transaction) -> DriverResult<PooledConnection> {
        self.transactions
            .lock()
            .remove(tx.id())
            .ok_or_else(|| DriverError::transaction(format!("{} is not open on this connector", tx)))
    }

    /// Transactions currently bound to a connection.
    pub fn open_transactions(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Run `query` inside `tx` and buffer its records.
    pub async fn run_in_tx(&self, tx: &Transaction, query: &str, parameters: ValueMap) -> DriverResult<QueryResult> {
        let cx = self.bound(tx)?;
        let outcome = {
            let mut connection = cx.lock().await;
            match connection.run_in_tx(tx, query, parameters).await {
                Ok(result) => connection.buffer(&result).await.map(|()| result),
                Err(e) => Err(e),
            }
        };
        match outcome {
            Err(e) if e.is_transport() => {
                let cx = self.unbind(tx)?;
                self.settle(cx, tx.database(), Err(e)).await
            }
            Err(e) => {
                self.note_failure(cx.profile(), tx.database(), &e).await;
                Err(e)
            }
            ok => ok,
        }
    }

    /// Commit `tx` and release its connection.
    pub async fn commit(&self, tx: &Transaction) -> DriverResult<Option<Bookmark>> {
        let cx = self.unbind(tx)?;
        let outcome = {
            let mut connection = cx.lock().await;
            connection.commit(tx).await
        };
        self.settle(cx, tx.database(), outcome).await
    }

    /// Roll back `tx` and release its connection.
    pub async fn rollback(&self, tx: &Transaction) -> DriverResult<()> {
        let cx = self.unbind(tx)?;
        let outcome = {
            let mut connection = cx.lock().await;
            connection.rollback(tx).await
        };
        self.settle(cx, tx.database(), outcome).await
    }

    /// Close every pool, including connections still leased.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transactions.lock().clear();
        self.tables.write().clear();
        let pools: Vec<Arc<ConnectionPool>> = self.pools.write().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.close().await;
        }
        info!(address = %self.config.profile.address(), "connector closed");
    }
}

//! Connection contract
//!
//! What pools and the connector need from a connection, independent of the
//! protocol behind it. [`crate::driver::bolt::BoltConnection`] is the Bolt
//! implementation; an HTTP variant would plug in here too.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use super::error::DriverResult;
use super::profile::ServerProfile;
use super::record::Record;
use super::task::{QueryResult, Response};
use super::transaction::{Bookmark, Transaction, TransactionConfig};
use crate::bolt::{BoltVersion, ValueMap};

// ============================================================================
// ConnectionState
// ============================================================================

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, not yet authenticated
    Connected,
    /// Idle, ready for a request
    Ready,
    /// A result is being streamed
    Streaming,
    /// A request failed; RESET required
    Failed,
    /// Closed or broken
    Closed,
}

// ============================================================================
// ServerInfo
// ============================================================================

/// Identity reported by the server when authenticating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    /// Raw agent string, e.g. `Neo4j/4.1.3`
    pub agent: String,
    /// Product part of the agent
    pub product: String,
    /// Version triple, if the agent carries one
    pub version: Option<(u32, u32, u32)>,
    /// Server-side connection id (v3+)
    pub connection_id: Option<String>,
}

impl ServerInfo {
    /// Parse `product/major.minor.patch`; missing parts are zero.
    pub fn from_agent(agent: &str) -> Self {
        let (product, version) = match agent.split_once('/') {
            Some((product, version)) => (product, Some(version)),
            None => (agent, None),
        };
        let version = version.and_then(|v| {
            let mut parts = v
                .split(|c: char| !c.is_ascii_digit())
                .filter(|p| !p.is_empty())
                .map(|p| p.parse::<u32>().ok());
            let major = parts.next()??;
            let minor = parts.next().flatten().unwrap_or(0);
            let patch = parts.next().flatten().unwrap_or(0);
            Some((major, minor, patch))
        });
        Self {
            agent: agent.to_string(),
            product: product.to_string(),
            version,
            connection_id: None,
        }
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.agent)
    }
}

// ============================================================================
// RoutingInfo
// ============================================================================

/// Routing procedure output, addresses as `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingInfo {
    pub routers: Vec<String>,
    pub readers: Vec<String>,
    pub writers: Vec<String>,
    /// How long the table may be cached
    pub ttl: Duration,
}

// ============================================================================
// Connection
// ============================================================================

/// One authenticated connection to one server.
///
/// Requests may be pipelined; replies are matched to requests in order.
/// Errors never leave a connection half-usable: after a transport or
/// protocol error it reports [`is_broken`](Self::is_broken) or
/// [`is_closed`](Self::is_closed) and must be discarded.
#[async_trait]
pub trait Connection: Send {
    fn profile(&self) -> &ServerProfile;

    fn protocol_version(&self) -> BoltVersion;

    fn server_info(&self) -> &ServerInfo;

    fn state(&self) -> ConnectionState;

    /// Time since the connection was opened.
    fn age(&self) -> Duration;

    fn is_broken(&self) -> bool;

    fn is_closed(&self) -> bool;

    /// The open explicit transaction, if any.
    fn transaction(&self) -> Option<&Transaction>;

    fn bytes_sent(&self) -> u64;

    fn bytes_received(&self) -> u64;

    /// Say goodbye where supported and close. Never fails.
    async fn close(&mut self);

    /// Return to a clean ready state. Without `force`, a connection already
    /// ready and idle is left alone.
    async fn reset(&mut self, force: bool) -> DriverResult<()>;

    /// Queue an auto-commit query. Nothing is sent until a pull or sync.
    async fn auto_run(
        &mut self,
        query: &str,
        parameters: ValueMap,
        config: &TransactionConfig,
    ) -> DriverResult<QueryResult>;

    /// Open an explicit transaction. At most one may be open at a time.
    async fn begin(&mut self, config: &TransactionConfig) -> DriverResult<Transaction>;

    /// Commit, returning the server's bookmark if it sent one.
    async fn commit(&mut self, tx: &Transaction) -> DriverResult<Option<Bookmark>>;

    async fn rollback(&mut self, tx: &Transaction) -> DriverResult<()>;

    /// Queue a query inside `tx`.
    async fn run_in_tx(
        &mut self,
        tx: &Transaction,
        query: &str,
        parameters: ValueMap,
    ) -> DriverResult<QueryResult>;

    /// Request up to `n` more records (`-1` for all) and wait for them.
    ///
    /// With a non-negative `capacity`, waiting stops once that many records
    /// are buffered. Fails with [`Exhausted`](super::error::DriverError::Exhausted)
    /// if the result is already done.
    async fn pull(&mut self, result: &QueryResult, n: i64, capacity: i64) -> DriverResult<Response>;

    /// Throw away the rest of the result.
    async fn discard(&mut self, result: &QueryResult) -> DriverResult<Response>;

    /// Ask this server for the routing table of `database`.
    async fn route(&mut self, database: Option<&str>, context: &ValueMap)
        -> DriverResult<RoutingInfo>;

    /// Send anything queued and read until `result` is done.
    async fn sync(&mut self, result: &QueryResult) -> DriverResult<()>;

    /// Pull everything still outstanding for `result` and wait for it.
    async fn buffer(&mut self, result: &QueryResult) -> DriverResult<()>;

    /// Next record of `result`, reading from the wire as needed.
    /// `Ok(None)` is the normal end of the stream.
    async fn next_record(&mut self, result: &QueryResult) -> DriverResult<Option<Record>>;
}

/// Opens connections to a profile.
#[async_trait]
pub trait Opener: Send + Sync {
    async fn open(&self, profile: &ServerProfile) -> DriverResult<Box<dyn Connection>>;
}

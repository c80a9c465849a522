//! Test doubles: a scripted Bolt server over an in-memory duplex stream, and
//! a fake connection/opener pair for pool and connector tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;

use super::bolt::{BoltConnection, BoltOptions};
use super::connection::{Connection, ConnectionState, Opener, RoutingInfo, ServerInfo};
use super::error::{DriverError, DriverResult, ServerFailure};
use super::profile::ServerProfile;
use super::record::Record;
use super::task::{QueryResult, Response};
use super::transaction::{Bookmark, Transaction, TransactionConfig};
use super::wire::Wire;
use crate::bolt::message::tag;
use crate::bolt::{BoltCodec, BoltResponse, BoltVersion, Structure, Value, ValueMap};

/// Route `tracing` output to the test harness. `RUST_LOG=debug` shows the
/// message exchange.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn meta(entries: &[(&str, Value)]) -> ValueMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ============================================================================
// Scripted server
// ============================================================================

/// Server side of one scripted conversation.
pub struct Script {
    framed: Framed<DuplexStream, BoltCodec>,
    /// The 20 handshake bytes the client sent
    pub proposal: [u8; 20],
}

impl Script {
    /// Read the handshake and answer with `reply`.
    pub async fn accept(mut stream: DuplexStream, reply: [u8; 4]) -> Self {
        let mut proposal = [0u8; 20];
        stream.read_exact(&mut proposal).await.unwrap();
        assert_eq!(&proposal[..4], &crate::bolt::BOLT_MAGIC);
        stream.write_all(&reply).await.unwrap();
        Self {
            framed: Framed::new(stream, BoltCodec::new()),
            proposal,
        }
    }

    /// Expect INIT/HELLO and accept it.
    pub async fn authenticate(&mut self) {
        self.expect(tag::HELLO).await;
        self.success(meta(&[
            ("server", "Neo4j/4.1.3".into()),
            ("connection_id", "bolt-1".into()),
        ]))
        .await;
    }

    pub async fn next(&mut self) -> Structure {
        self.framed
            .next()
            .await
            .expect("client hung up")
            .expect("undecodable client message")
    }

    pub async fn expect(&mut self, expected: u8) -> Structure {
        let message = self.next().await;
        assert_eq!(
            message.tag, expected,
            "expected message 0x{:02X}, got {:?}",
            expected, message
        );
        message
    }

    async fn reply(&mut self, response: BoltResponse) {
        self.framed.send(response.to_structure()).await.unwrap();
    }

    pub async fn success(&mut self, metadata: ValueMap) {
        self.reply(BoltResponse::Success(metadata)).await;
    }

    pub async fn record(&mut self, values: Vec<Value>) {
        self.reply(BoltResponse::Record(values)).await;
    }

    pub async fn failure(&mut self, code: &str, message: &str) {
        self.reply(BoltResponse::Failure {
            code: code.to_string(),
            message: message.to_string(),
        })
        .await;
    }

    pub async fn ignored(&mut self) {
        self.reply(BoltResponse::Ignored).await;
    }

    /// Read until the client closes.
    pub async fn finish(mut self) {
        while let Some(Ok(_)) = self.framed.next().await {}
    }
}

/// Open a client connection proposing `proposals` against a scripted server.
pub async fn connect<F, Fut>(
    proposals: &[BoltVersion],
    server: F,
) -> (DriverResult<BoltConnection>, JoinHandle<()>)
where
    F: FnOnce(DuplexStream) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let options = BoltOptions {
        protocol_versions: proposals.to_vec(),
        ..BoltOptions::default()
    };
    connect_with(options, server).await
}

pub async fn connect_with<F, Fut>(
    options: BoltOptions,
    server: F,
) -> (DriverResult<BoltConnection>, JoinHandle<()>)
where
    F: FnOnce(DuplexStream) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    init_tracing();
    let (client, server_end) = duplex(1 << 16);
    let handle = tokio::spawn(server(server_end));
    let wire = Wire::from_stream(client, "localhost:7687");
    let cx = BoltConnection::open(wire, ServerProfile::default(), &options).await;
    (cx, handle)
}

// ============================================================================
// Fake cluster
// ============================================================================

/// Behaviour of one fake server.
#[derive(Debug, Clone, Default)]
pub struct FakeServer {
    /// Refuse new connections; existing ones report broken
    pub down: bool,
    /// Answer to the routing procedure; `None` fails it
    pub routing: Option<RoutingInfo>,
    /// Every query fails with this
    pub failure: Option<ServerFailure>,
    /// Queries break the connection
    pub break_on_run: bool,
}

#[derive(Debug, Default)]
struct Cluster {
    servers: HashMap<String, FakeServer>,
    opened: Vec<String>,
    routed: Vec<String>,
    queries: Vec<(String, String)>,
    closed: usize,
    resets: usize,
    commits: usize,
}

/// Opener for [`FakeConnection`]s. Clones share one cluster.
#[derive(Debug, Clone, Default)]
pub struct FakeOpener {
    cluster: Arc<Mutex<Cluster>>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, server: FakeServer) {
        self.cluster.lock().servers.insert(address.to_string(), server);
    }

    pub fn update(&self, address: &str, f: impl FnOnce(&mut FakeServer)) {
        let mut cluster = self.cluster.lock();
        f(cluster.servers.entry(address.to_string()).or_default());
    }

    fn server(&self, address: &str) -> FakeServer {
        self.cluster
            .lock()
            .servers
            .get(address)
            .cloned()
            .unwrap_or_default()
    }

    /// Addresses connected to, in order.
    pub fn opened(&self) -> Vec<String> {
        self.cluster.lock().opened.clone()
    }

    /// Addresses asked for a routing table, in order.
    pub fn routed(&self) -> Vec<String> {
        self.cluster.lock().routed.clone()
    }

    /// `(address, query)` for every query run.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.cluster.lock().queries.clone()
    }

    pub fn closed(&self) -> usize {
        self.cluster.lock().closed
    }

    pub fn resets(&self) -> usize {
        self.cluster.lock().resets
    }
}

#[async_trait]
impl Opener for FakeOpener {
    async fn open(&self, profile: &ServerProfile) -> DriverResult<Box<dyn Connection>> {
        let address = profile.address();
        if self.server(&address).down {
            return Err(DriverError::connect_failure(address, "connection refused"));
        }
        self.cluster.lock().opened.push(address);
        Ok(Box::new(FakeConnection {
            profile: profile.clone(),
            cluster: self.clone(),
            server: ServerInfo::from_agent("Neo4j/4.1.3"),
            state: ConnectionState::Ready,
            opened: Instant::now(),
            broken: false,
            transaction: None,
        }))
    }
}

/// Connection that answers every query with one record holding its address.
#[derive(Debug)]
pub struct FakeConnection {
    profile: ServerProfile,
    cluster: FakeOpener,
    server: ServerInfo,
    state: ConnectionState,
    opened: Instant,
    broken: bool,
    transaction: Option<Transaction>,
}

impl FakeConnection {
    fn check(&mut self) -> DriverResult<FakeServer> {
        if self.is_broken() || self.is_closed() {
            return Err(DriverError::broken_wire(format!(
                "{} is gone",
                self.profile.address()
            )));
        }
        Ok(self.cluster.server(&self.profile.address()))
    }

    fn run(&mut self, database: Option<String>, query: &str) -> DriverResult<QueryResult> {
        let server = self.check()?;
        if server.break_on_run {
            self.broken = true;
            if let Some(tx) = self.transaction.take() {
                tx.mark_broken();
            }
            return Err(DriverError::broken_wire("connection reset by peer"));
        }
        if let Some(failure) = server.failure {
            if let Some(tx) = self.transaction.take() {
                tx.mark_broken();
            }
            return Err(failure.into());
        }
        let address = self.profile.address();
        self.cluster
            .cluster
            .lock()
            .queries
            .push((address.clone(), query.to_string()));

        let result = QueryResult::new(database, query);
        let run = Response::new("RUN");
        run.set_success(meta(&[("fields", Value::List(vec!["address".into()]))]));
        let pull = Response::new("PULL");
        pull.add_record(vec![Value::from(address)]);
        pull.set_success(ValueMap::new());
        result.append(run, false);
        result.append(pull, true);
        Ok(result)
    }

    fn check_transaction(&self, tx: &Transaction) -> DriverResult<()> {
        tx.ensure_usable()?;
        match &self.transaction {
            Some(current) if current.same(tx) => Ok(()),
            _ => Err(DriverError::transaction("not open here")),
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    fn protocol_version(&self) -> BoltVersion {
        BoltVersion::V4_1
    }

    fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn age(&self) -> Duration {
        self.opened.elapsed()
    }

    fn is_broken(&self) -> bool {
        self.broken || self.cluster.server(&self.profile.address()).down
    }

    fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    fn bytes_sent(&self) -> u64 {
        0
    }

    fn bytes_received(&self) -> u64 {
        0
    }

    async fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.cluster.cluster.lock().closed += 1;
        }
    }

    async fn reset(&mut self, force: bool) -> DriverResult<()> {
        self.check()?;
        if force || self.transaction.is_some() {
            self.cluster.cluster.lock().resets += 1;
            if let Some(tx) = self.transaction.take() {
                tx.mark_broken();
            }
        }
        Ok(())
    }

    async fn auto_run(
        &mut self,
        query: &str,
        _parameters: ValueMap,
        config: &TransactionConfig,
    ) -> DriverResult<QueryResult> {
        if self.transaction.is_some() {
            return Err(DriverError::transaction("transaction open"));
        }
        self.run(config.database.clone(), query)
    }

    async fn begin(&mut self, config: &TransactionConfig) -> DriverResult<Transaction> {
        self.check()?;
        if self.transaction.is_some() {
            return Err(DriverError::transaction("transaction open"));
        }
        let tx = Transaction::new(config.database.clone(), config.is_readonly());
        self.transaction = Some(tx.clone());
        Ok(tx)
    }

    async fn commit(&mut self, tx: &Transaction) -> DriverResult<Option<Bookmark>> {
        self.check_transaction(tx)?;
        self.check()?;
        let done = Response::new("COMMIT");
        done.set_success(ValueMap::new());
        tx.append(done, true);
        self.transaction = None;
        let mut cluster = self.cluster.cluster.lock();
        cluster.commits += 1;
        Ok(Some(Bookmark::new(format!("bookmark:{}", cluster.commits))))
    }

    async fn rollback(&mut self, tx: &Transaction) -> DriverResult<()> {
        self.check_transaction(tx)?;
        self.check()?;
        let done = Response::new("ROLLBACK");
        done.set_success(ValueMap::new());
        tx.append(done, true);
        self.transaction = None;
        Ok(())
    }

    async fn run_in_tx(
        &mut self,
        tx: &Transaction,
        query: &str,
        _parameters: ValueMap,
    ) -> DriverResult<QueryResult> {
        self.check_transaction(tx)?;
        let result = self.run(tx.database().map(str::to_string), query)?;
        tx.append(result.clone(), false);
        Ok(result)
    }

    async fn pull(&mut self, result: &QueryResult, _n: i64, _capacity: i64) -> DriverResult<Response> {
        match result.last_response() {
            Some(response) if !result.done() => Ok(response),
            _ => Err(DriverError::Exhausted(result.query())),
        }
    }

    async fn discard(&mut self, result: &QueryResult) -> DriverResult<Response> {
        self.pull(result, -1, -1).await
    }

    async fn route(&mut self, _database: Option<&str>, _context: &ValueMap) -> DriverResult<RoutingInfo> {
        let server = self.check()?;
        let address = self.profile.address();
        self.cluster.cluster.lock().routed.push(address.clone());
        server.routing.ok_or_else(|| {
            ServerFailure::new(
                "Neo.ClientError.Procedure.ProcedureNotFound",
                format!("{} is not a router", address),
            )
            .into()
        })
    }

    async fn sync(&mut self, result: &QueryResult) -> DriverResult<()> {
        result.audit()
    }

    async fn buffer(&mut self, result: &QueryResult) -> DriverResult<()> {
        result.audit()
    }

    async fn next_record(&mut self, result: &QueryResult) -> DriverResult<Option<Record>> {
        result.audit()?;
        Ok(result.take())
    }
}

/// Routing table naming `routers`, `readers` and `writers`, valid for `ttl` seconds.
pub fn routing_info(routers: &[&str], readers: &[&str], writers: &[&str], ttl: u64) -> RoutingInfo {
    let owned = |list: &[&str]| list.iter().map(|a| a.to_string()).collect();
    RoutingInfo {
        routers: owned(routers),
        readers: owned(readers),
        writers: owned(writers),
        ttl: Duration::from_secs(ttl),
    }
}

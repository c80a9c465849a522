//! Bolt connection core.
//!
//! Handshake, authentication and the request/response pump. Requests are
//! appended to the wire's output buffer together with a [`Response`]
//! placeholder; replies are matched to placeholders strictly first in,
//! first out.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::BoltOptions;
use crate::bolt::handshake::HANDSHAKE_RESPONSE_SIZE;
use crate::bolt::message::tag;
use crate::bolt::{
    BoltCodec, BoltRequest, BoltResponse, BoltVersion, Capabilities, Handshake, Structure, Value,
    ValueMap,
};
use crate::driver::connection::{ConnectionState, ServerInfo};
use crate::driver::error::{DriverError, DriverResult, ServerFailure};
use crate::driver::profile::ServerProfile;
use crate::driver::task::Response;
use crate::driver::transaction::Transaction;
use crate::driver::wire::Wire;

/// Client-side Bolt connection.
///
/// Owns its wire exclusively. Version differences are read from the
/// negotiated [`Capabilities`] row.
pub struct BoltConnection {
    pub(super) profile: ServerProfile,
    pub(super) version: BoltVersion,
    pub(super) capabilities: &'static Capabilities,
    pub(super) wire: Wire,
    codec: BoltCodec,
    pub(super) state: ConnectionState,
    pub(super) server: ServerInfo,
    opened: Instant,
    pending: VecDeque<Response>,
    pub(super) transaction: Option<Transaction>,
}

impl BoltConnection {
    /// Handshake and authenticate over an open wire.
    ///
    /// On any failure the wire is closed before the error is returned.
    pub async fn open(
        mut wire: Wire,
        profile: ServerProfile,
        options: &BoltOptions,
    ) -> DriverResult<Self> {
        let version = match handshake(&mut wire, &options.protocol_versions).await {
            Ok(version) => version,
            Err(e) => {
                wire.close().await;
                return Err(e);
            }
        };

        let mut cx = Self {
            profile,
            version,
            capabilities: version.capabilities(),
            wire,
            codec: BoltCodec::new(),
            state: ConnectionState::Connected,
            server: ServerInfo::default(),
            opened: Instant::now(),
            pending: VecDeque::new(),
            transaction: None,
        };

        let routing = options.routing_context.as_ref().map(|context| {
            let mut context = context.clone();
            context.insert("address".into(), Value::from(cx.profile.address()));
            context
        });
        if let Err(e) = cx.authenticate(&options.user_agent, routing).await {
            cx.shutdown().await;
            return Err(e);
        }
        Ok(cx)
    }

    async fn authenticate(&mut self, user_agent: &str, routing: Option<ValueMap>) -> DriverResult<()> {
        let auth = self.profile.auth().to_map();
        let request = if self.capabilities.hello {
            let mut extra = auth;
            extra.insert("user_agent".into(), Value::from(user_agent));
            if self.capabilities.routing_context {
                if let Some(routing) = routing {
                    extra.insert("routing".into(), Value::Map(routing));
                }
            }
            BoltRequest::Hello { extra }
        } else {
            BoltRequest::Init {
                user_agent: user_agent.to_string(),
                auth,
            }
        };

        let response = Response::vital(request.name());
        self.append(request, response.clone())?;
        self.send().await?;
        self.wait(&response).await?;
        response.audit()?;
        if !response.succeeded() {
            return Err(DriverError::protocol(format!(
                "{} was ignored by {}",
                response.request(),
                self.profile.address()
            )));
        }

        let metadata = response.metadata();
        if let Some(agent) = metadata.get("server").and_then(Value::as_str) {
            self.server = ServerInfo::from_agent(agent);
        }
        self.server.connection_id = metadata
            .get("connection_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.state = ConnectionState::Ready;
        debug!(
            peer = %self.wire.peer(),
            version = %self.version,
            server = %self.server,
            "connection opened"
        );
        Ok(())
    }

    // ========================================================================
    // Request/response pump
    // ========================================================================

    pub(super) fn ensure_open(&self) -> DriverResult<()> {
        if self.state == ConnectionState::Closed {
            return Err(DriverError::broken_wire(format!(
                "Connection to {} is closed",
                self.profile.address()
            )));
        }
        Ok(())
    }

    fn write(&mut self, request: &BoltRequest) -> DriverResult<()> {
        debug!(peer = %self.wire.peer(), "C: {}", request);
        self.codec
            .encode(request.to_structure(), self.wire.output_mut())
            .map_err(DriverError::from)
    }

    /// Queue `request`; its reply will complete `response`.
    pub(super) fn append(&mut self, request: BoltRequest, response: Response) -> DriverResult<()> {
        self.ensure_open()?;
        self.write(&request)?;
        self.pending.push_back(response);
        Ok(())
    }

    /// Flush queued requests.
    pub(super) async fn send(&mut self) -> DriverResult<usize> {
        match self.wire.send().await {
            Ok(n) => Ok(n),
            Err(e) => Err(self.broken(e)),
        }
    }

    /// Whether any reply is still owed.
    pub(super) fn awaiting(&self) -> bool {
        !self.pending.is_empty()
    }

    async fn read_message(&mut self) -> DriverResult<Structure> {
        loop {
            match self.codec.decode(self.wire.input_mut()) {
                Ok(Some(structure)) => return Ok(structure),
                Ok(None) => {}
                Err(e) => return Err(self.violation(e.to_string()).await),
            }
            if let Err(e) = self.wire.fill().await {
                return Err(self.broken(e));
            }
        }
    }

    /// Read one message and apply it to the head response.
    ///
    /// RECORDs already buffered behind the first one are taken in the same
    /// call, up to the head response's capacity.
    pub(super) async fn fetch(&mut self) -> DriverResult<()> {
        let structure = self.read_message().await?;
        let message = match BoltResponse::from_structure(structure) {
            Ok(message) => message,
            Err(e) => return Err(self.violation(e.to_string()).await),
        };
        debug!(peer = %self.wire.peer(), "S: {}", message);

        let head = match self.pending.front() {
            Some(head) => head.clone(),
            None => {
                let msg = format!("{} received with no request outstanding", message.name());
                return Err(self.violation(msg).await);
            }
        };

        match message {
            BoltResponse::Record(values) => {
                head.add_record(values);
                while !head.full() && self.codec.peek_tag(self.wire.input()) == Some(tag::RECORD) {
                    let structure = self.read_message().await?;
                    match BoltResponse::from_structure(structure) {
                        Ok(BoltResponse::Record(values)) => {
                            let record = Value::List(values.clone());
                            debug!(peer = %self.wire.peer(), "S: RECORD {}", record);
                            head.add_record(values);
                        }
                        Ok(other) => {
                            let msg = format!("peeked RECORD but read {}", other.name());
                            return Err(self.violation(msg).await);
                        }
                        Err(e) => return Err(self.violation(e.to_string()).await),
                    }
                }
            }
            BoltResponse::Success(metadata) => {
                self.pending.pop_front();
                head.set_success(metadata);
                if self.state != ConnectionState::Failed {
                    self.state = if head.request() == "RUN" || head.has_more() {
                        ConnectionState::Streaming
                    } else {
                        ConnectionState::Ready
                    };
                }
            }
            BoltResponse::Failure { code, message } => {
                self.pending.pop_front();
                head.set_failure(ServerFailure::new(code, message));
                self.state = ConnectionState::Failed;
                if head.is_vital() {
                    warn!(
                        peer = %self.wire.peer(),
                        request = head.request(),
                        "vital request failed, closing connection"
                    );
                    self.shutdown().await;
                }
            }
            BoltResponse::Ignored => {
                self.pending.pop_front();
                head.set_ignored();
            }
        }
        Ok(())
    }

    /// Send, then read until `response` is terminal.
    pub(super) async fn wait(&mut self, response: &Response) -> DriverResult<()> {
        self.send().await?;
        while !response.done() {
            self.fetch().await?;
        }
        Ok(())
    }

    /// Reset after a server failure and surface it.
    ///
    /// Only resets while the connection is still in the failed state, so a
    /// failure already dealt with does not trigger a second RESET.
    pub(super) async fn audit(&mut self, failure: Option<ServerFailure>) -> DriverResult<()> {
        let failure = match failure {
            Some(failure) => failure,
            None => return Ok(()),
        };
        if self.state == ConnectionState::Failed {
            if let Err(e) = self.reset_now(true).await {
                warn!(peer = %self.wire.peer(), error = %e, "reset after failure did not succeed");
            }
        }
        Err(DriverError::ServerFailure(failure))
    }

    /// Send RESET and wait for it. Any open transaction is lost.
    pub(super) async fn reset_now(&mut self, force: bool) -> DriverResult<()> {
        self.ensure_open()?;
        let dirty = self.state != ConnectionState::Ready
            || self.awaiting()
            || self.transaction.is_some();
        if !force && !dirty {
            return Ok(());
        }

        let response = Response::vital("RESET");
        self.append(BoltRequest::Reset, response.clone())?;
        self.wait(&response).await?;
        response.audit()?;
        self.state = ConnectionState::Ready;
        if let Some(tx) = self.transaction.take() {
            tx.mark_broken();
        }
        Ok(())
    }

    /// GOODBYE where supported, then close the wire. Idempotent.
    pub(super) async fn shutdown(&mut self) {
        if self.state == ConnectionState::Closed && self.wire.closed() {
            return;
        }
        if self.capabilities.goodbye && !self.wire.broken() && !self.wire.closed() {
            if self.write(&BoltRequest::Goodbye).is_ok() {
                if let Err(e) = self.wire.send().await {
                    debug!(peer = %self.wire.peer(), error = %e, "GOODBYE not delivered");
                }
            }
        }
        self.wire.close().await;
        self.abandon();
        debug!(peer = %self.wire.peer(), "connection closed");
    }

    /// Transport failure: nothing on this connection can complete.
    fn broken(&mut self, err: DriverError) -> DriverError {
        warn!(peer = %self.wire.peer(), error = %err, "connection broken");
        self.abandon();
        err
    }

    async fn violation(&mut self, msg: String) -> DriverError {
        warn!(peer = %self.wire.peer(), %msg, "protocol violation, closing connection");
        self.shutdown().await;
        DriverError::protocol(msg)
    }

    fn abandon(&mut self) {
        self.state = ConnectionState::Closed;
        self.pending.clear();
        if let Some(tx) = self.transaction.take() {
            tx.mark_broken();
        }
    }

    pub(super) fn age(&self) -> Duration {
        self.opened.elapsed()
    }
}

impl fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoltConnection")
            .field("profile", &self.profile)
            .field("version", &self.version)
            .field("state", &self.state)
            .field("server", &self.server.agent)
            .field("pending", &self.pending.len())
            .finish()
    }
}

async fn handshake(wire: &mut Wire, proposals: &[BoltVersion]) -> DriverResult<BoltVersion> {
    let handshake =
        Handshake::new(proposals).map_err(|e| DriverError::configuration(e.to_string()))?;
    let offered: Vec<String> = proposals.iter().map(ToString::to_string).collect();
    debug!(peer = %wire.peer(), "C: <BOLT> {}", offered.join(", "));
    wire.write(&handshake.request());
    wire.send().await?;

    let reply = wire.read(HANDSHAKE_RESPONSE_SIZE).await?;
    let reply = [reply[0], reply[1], reply[2], reply[3]];
    let version = handshake.accept(reply).map_err(|e| {
        DriverError::protocol(format!("Handshake with {} failed: {}", wire.peer(), e))
    })?;
    debug!(peer = %wire.peer(), "S: <PROTOCOL> {}", version);
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{connect, meta, Script};
    use crate::bolt::BoltErrorCode;

    #[tokio::test]
    async fn handshake_selects_the_server_choice() {
        let (cx, server) = connect(
            &[BoltVersion::V4_1, BoltVersion::V4_0, BoltVersion::V3],
            |stream| async move {
                let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
                assert_eq!(
                    &s.proposal[4..16],
                    &[0, 0, 1, 4, 0, 0, 0, 4, 0, 0, 0, 3]
                );
                assert_eq!(&s.proposal[16..], &[0, 0, 0, 0]);
                s.authenticate().await;
                s.finish().await;
            },
        )
        .await;
        let mut cx = cx.unwrap();
        assert_eq!(cx.version, BoltVersion::V4_0);
        assert!(cx.capabilities.flow_control);
        assert!(!cx.capabilities.routing_context);
        assert_eq!(cx.state, ConnectionState::Ready);
        assert_eq!(cx.server.version, Some((4, 1, 3)));
        assert_eq!(cx.server.connection_id.as_deref(), Some("bolt-1"));
        cx.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_handshake() {
        let (cx, server) = connect(&[BoltVersion::V4_1], |stream| async move {
            let _ = Script::accept(stream, [0, 0, 0, 0]).await;
        })
        .await;
        assert!(matches!(cx, Err(DriverError::ProtocolViolation(_))));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn http_port_is_reported() {
        let (cx, server) = connect(&[BoltVersion::V4_1], |stream| async move {
            let _ = Script::accept(stream, *b"HTTP").await;
        })
        .await;
        let err = cx.err().unwrap();
        assert!(err.to_string().contains("HTTP"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn v1_authenticates_with_init() {
        let (cx, server) = connect(&[BoltVersion::V1], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 1]).await;
            let init = s.expect(tag::HELLO).await;
            assert_eq!(init.fields.len(), 2);
            assert_eq!(init.fields[0].as_str(), Some(crate::driver::config::DEFAULT_USER_AGENT));
            let auth = init.fields[1].as_map().unwrap();
            assert_eq!(auth.get("scheme"), Some(&Value::from("basic")));
            s.success(meta(&[("server", "Neo4j/3.4.0".into())])).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        assert_eq!(cx.server.product, "Neo4j");
        cx.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn hello_carries_routing_on_v4_1() {
        let mut context = ValueMap::new();
        context.insert("region".into(), "eu".into());
        let options = BoltOptions {
            protocol_versions: vec![BoltVersion::V4_1],
            routing_context: Some(context),
            ..BoltOptions::default()
        };
        let (cx, server) = crate::driver::testing::connect_with(options, |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 1, 4]).await;
            let hello = s.expect(tag::HELLO).await;
            let extra = hello.fields[0].as_map().unwrap();
            let routing = extra.get("routing").and_then(Value::as_map).unwrap();
            assert_eq!(routing.get("address"), Some(&Value::from("localhost:7687")));
            assert_eq!(routing.get("region"), Some(&Value::from("eu")));
            assert!(extra.contains_key("user_agent"));
            s.success(meta(&[("server", "Neo4j/4.1.0".into())])).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        cx.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failed_authentication_closes() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.expect(tag::HELLO).await;
            s.failure(BoltErrorCode::UNAUTHORIZED, "bad credentials").await;
            s.finish().await;
        })
        .await;
        match cx {
            Err(DriverError::ServerFailure(f)) => assert_eq!(f.code, BoltErrorCode::UNAUTHORIZED),
            other => panic!("expected auth failure, got {:?}", other.err()),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn replies_are_matched_in_order() {
        let (cx, server) = connect(&[BoltVersion::V3], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 3]).await;
            s.authenticate().await;
            for _ in 0..4 {
                s.next().await;
            }
            s.success(meta(&[("fields", Value::List(vec!["a".into()]))])).await;
            s.record(vec![1.into()]).await;
            s.success(ValueMap::new()).await;
            s.success(meta(&[("fields", Value::List(vec!["b".into()]))])).await;
            s.record(vec![2.into()]).await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();

        let run = |q: &str| BoltRequest::Run {
            query: q.to_string(),
            parameters: ValueMap::new(),
            extra: Some(ValueMap::new()),
        };
        let (r1, p1, r2, p2) = (
            Response::new("RUN"),
            Response::new("PULL_ALL"),
            Response::new("RUN"),
            Response::new("PULL_ALL"),
        );
        cx.append(run("RETURN 1 AS a"), r1.clone()).unwrap();
        cx.append(BoltRequest::PullAll, p1.clone()).unwrap();
        cx.append(run("RETURN 2 AS b"), r2.clone()).unwrap();
        cx.append(BoltRequest::PullAll, p2.clone()).unwrap();
        cx.send().await.unwrap();

        cx.fetch().await.unwrap();
        assert!(r1.done() && !p1.done() && !r2.done());
        while !p1.done() {
            cx.fetch().await.unwrap();
        }
        assert!(!r2.done());
        assert_eq!(r1.record_count(), 0);
        assert_eq!(p1.take_record(), Some(vec![Value::Integer(1)]));

        cx.wait(&p2).await.unwrap();
        assert_eq!(p2.take_record(), Some(vec![Value::Integer(2)]));
        assert!(!cx.awaiting());
        assert_eq!(cx.state, ConnectionState::Ready);
        cx.shutdown().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unsolicited_message_is_a_violation() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let err = cx.fetch().await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolViolation(_)));
        assert_eq!(cx.state, ConnectionState::Closed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_breaks_the_connection() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            s.next().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let response = Response::vital("RESET");
        cx.append(BoltRequest::Reset, response.clone()).unwrap();
        let err = cx.wait(&response).await.unwrap_err();
        assert!(err.is_transport());
        assert!(cx.wire.broken());
        assert_eq!(cx.state, ConnectionState::Closed);
        assert!(cx.ensure_open().is_err());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_says_goodbye() {
        let (cx, server) = connect(&[BoltVersion::V3], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 3]).await;
            s.authenticate().await;
            s.expect(tag::GOODBYE).await;
        })
        .await;
        let mut cx = cx.unwrap();
        cx.shutdown().await;
        cx.shutdown().await;
        assert_eq!(cx.state, ConnectionState::Closed);
        server.await.unwrap();
    }
}

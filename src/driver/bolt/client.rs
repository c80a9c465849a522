//! Bolt operations.
//!
//! The [`Connection`] contract on top of the connection core:
//! - Auto-commit queries (RUN, pipelined with the first pull)
//! - Explicit transactions (BEGIN/COMMIT/ROLLBACK, or Cypher text before v3)
//! - Streaming (PULL/DISCARD with `{n, qid}` from v4.0, PULL_ALL/DISCARD_ALL before)
//! - Routing table lookup via the routing procedure

use std::time::Duration;

use async_trait::async_trait;

use super::connection::BoltConnection;
use crate::bolt::{BoltRequest, BoltVersion, Value, ValueMap};
use crate::driver::connection::{Connection, ConnectionState, RoutingInfo, ServerInfo};
use crate::driver::error::{DriverError, DriverResult};
use crate::driver::profile::ServerProfile;
use crate::driver::record::Record;
use crate::driver::routing::ServerRole;
use crate::driver::task::{QueryResult, Response};
use crate::driver::transaction::{Bookmark, Transaction, TransactionConfig};

/// Routing procedure on 4.x servers, per database.
const ROUTING_QUERY_V4: &str = "CALL dbms.routing.getRoutingTable($context, $database)";
/// Routing procedure before 4.0.
const ROUTING_QUERY_V3: &str = "CALL dbms.cluster.routing.getRoutingTable($context)";
/// Database the v4 routing procedure runs in.
const SYSTEM_DATABASE: &str = "system";

impl BoltConnection {
    fn run_request(&self, query: &str, parameters: ValueMap, extra: ValueMap) -> BoltRequest {
        BoltRequest::Run {
            query: query.to_string(),
            parameters,
            extra: self.capabilities.extra_metadata.then_some(extra),
        }
    }

    /// Append `statement` the way this version runs transaction control.
    ///
    /// From v3 this is a single message; before, the Cypher text is run and
    /// its (empty) result discarded. Returns the responses in order.
    fn append_control(&mut self, statement: &'static str, extra: ValueMap) -> DriverResult<Vec<Response>> {
        if self.capabilities.transaction_messages {
            let request = match statement {
                "BEGIN" => BoltRequest::Begin { extra },
                "COMMIT" => BoltRequest::Commit,
                _ => BoltRequest::Rollback,
            };
            let response = Response::new(request.name());
            self.append(request, response.clone())?;
            Ok(vec![response])
        } else {
            let run = Response::new("RUN");
            let discard = Response::new("DISCARD_ALL");
            self.append(self.run_request(statement, ValueMap::new(), ValueMap::new()), run.clone())?;
            self.append(BoltRequest::DiscardAll, discard.clone())?;
            Ok(vec![run, discard])
        }
    }

    /// `tx` must be usable and be the transaction open here.
    fn check_transaction(&self, tx: &Transaction) -> DriverResult<()> {
        tx.ensure_usable()?;
        self.ensure_open()?;
        match &self.transaction {
            Some(current) if current.same(tx) => Ok(()),
            _ => Err(DriverError::transaction(format!(
                "{} is not open on this connection",
                tx
            ))),
        }
    }

    async fn finish_transaction(&mut self, tx: &Transaction, statement: &'static str) -> DriverResult<Response> {
        self.check_transaction(tx)?;
        let responses = self.append_control(statement, ValueMap::new())?;
        let last = responses.len() - 1;
        for (i, response) in responses.iter().enumerate() {
            tx.append(response.clone(), i == last);
        }
        self.transaction = None;

        let result = self.wait(&responses[last]).await;
        if let Err(e) = result {
            tx.mark_broken();
            return Err(e);
        }
        if let Err(e) = self.audit(tx.failure()).await {
            tx.mark_broken();
            return Err(e);
        }
        Ok(responses[last].clone())
    }

    /// In a v4 transaction with several open results, PULL must name the
    /// query, so RUN's reply (which carries the qid) is awaited first.
    async fn qid_for(&mut self, result: &QueryResult) -> DriverResult<Option<i64>> {
        if !self.capabilities.flow_control || self.transaction.is_none() {
            return Ok(None);
        }
        if let Some(run) = result.run_response() {
            if !run.done() {
                self.wait(&run).await?;
            }
        }
        Ok(result.qid())
    }
}

#[async_trait]
impl Connection for BoltConnection {
    fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    fn protocol_version(&self) -> BoltVersion {
        self.version
    }

    fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn age(&self) -> Duration {
        BoltConnection::age(self)
    }

    fn is_broken(&self) -> bool {
        self.wire.broken()
    }

    fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    fn bytes_sent(&self) -> u64 {
        self.wire.bytes_sent()
    }

    fn bytes_received(&self) -> u64 {
        self.wire.bytes_received()
    }

    async fn close(&mut self) {
        self.shutdown().await;
    }

    async fn reset(&mut self, force: bool) -> DriverResult<()> {
        self.reset_now(force).await
    }

    async fn auto_run(
        &mut self,
        query: &str,
        parameters: ValueMap,
        config: &TransactionConfig,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;
        if let Some(tx) = &self.transaction {
            return Err(DriverError::transaction(format!(
                "Cannot run an auto-commit query while {} is open",
                tx
            )));
        }
        let extra = config.to_extra(self.capabilities)?;
        let result = QueryResult::new(config.database.clone(), query);
        let response = Response::new("RUN");
        result.append(response.clone(), false);
        self.append(self.run_request(query, parameters, extra), response)?;
        Ok(result)
    }

    async fn begin(&mut self, config: &TransactionConfig) -> DriverResult<Transaction> {
        self.ensure_open()?;
        if let Some(tx) = &self.transaction {
            return Err(DriverError::transaction(format!("{} is already open", tx)));
        }
        let extra = config.to_extra(self.capabilities)?;
        let tx = Transaction::new(config.database.clone(), config.is_readonly());
        let responses = self.append_control("BEGIN", extra)?;
        for response in &responses {
            tx.append(response.clone(), false);
        }
        self.transaction = Some(tx.clone());

        if let Some(last) = responses.last() {
            self.wait(last).await?;
        }
        self.audit(tx.failure()).await?;
        Ok(tx)
    }

    async fn commit(&mut self, tx: &Transaction) -> DriverResult<Option<Bookmark>> {
        let response = self.finish_transaction(tx, "COMMIT").await?;
        Ok(response
            .get("bookmark")
            .and_then(|v| v.as_str().map(Bookmark::new)))
    }

    async fn rollback(&mut self, tx: &Transaction) -> DriverResult<()> {
        self.finish_transaction(tx, "ROLLBACK").await.map(|_| ())
    }

    async fn run_in_tx(
        &mut self,
        tx: &Transaction,
        query: &str,
        parameters: ValueMap,
    ) -> DriverResult<QueryResult> {
        self.check_transaction(tx)?;
        let result = QueryResult::new(tx.database().map(str::to_string), query);
        let response = Response::new("RUN");
        result.append(response.clone(), false);
        tx.append(result.clone(), false);
        self.append(self.run_request(query, parameters, ValueMap::new()), response)?;
        Ok(result)
    }

    async fn pull(&mut self, result: &QueryResult, n: i64, capacity: i64) -> DriverResult<Response> {
        self.ensure_open()?;
        if result.done() {
            return Err(DriverError::Exhausted(format!(
                "No more records for {:?}",
                result.query()
            )));
        }
        let request = if self.capabilities.flow_control {
            BoltRequest::Pull {
                n,
                qid: self.qid_for(result).await?,
            }
        } else if n < 0 {
            BoltRequest::PullAll
        } else {
            return Err(DriverError::unsupported(format!(
                "Pulling {} records at a time requires Bolt 4.0 or later",
                n
            )));
        };

        let response = Response::with_capacity(request.name(), capacity);
        result.append(response.clone(), n < 0);
        self.append(request, response.clone())?;
        self.send().await?;
        while !response.done() && !response.full() {
            self.fetch().await?;
        }
        self.audit(result.failure()).await?;
        Ok(response)
    }

    async fn discard(&mut self, result: &QueryResult) -> DriverResult<Response> {
        self.ensure_open()?;
        if result.done() {
            return Err(DriverError::Exhausted(format!(
                "Nothing left to discard for {:?}",
                result.query()
            )));
        }
        let request = if self.capabilities.flow_control {
            BoltRequest::Discard {
                n: -1,
                qid: self.qid_for(result).await?,
            }
        } else {
            BoltRequest::DiscardAll
        };
        let response = Response::new(request.name());
        result.append(response.clone(), true);
        self.append(request, response.clone())?;
        self.wait(&response).await?;
        self.audit(result.failure()).await?;
        Ok(response)
    }

    async fn route(
        &mut self,
        database: Option<&str>,
        context: &ValueMap,
    ) -> DriverResult<RoutingInfo> {
        let mut parameters = ValueMap::new();
        parameters.insert("context".into(), Value::Map(context.clone()));
        let (query, config) = if self.version >= BoltVersion::V4_0 {
            parameters.insert("database".into(), database.map(Value::from).unwrap_or(Value::Null));
            (
                ROUTING_QUERY_V4,
                TransactionConfig::new().with_database(SYSTEM_DATABASE),
            )
        } else if let Some(database) = database {
            return Err(DriverError::unsupported(format!(
                "Routing for database {:?} requires Bolt 4.0 or later",
                database
            )));
        } else {
            (ROUTING_QUERY_V3, TransactionConfig::new())
        };

        let result = self.auto_run(query, parameters, &config).await?;
        self.buffer(&result).await?;
        let record = result
            .take()
            .ok_or_else(|| DriverError::protocol("Routing procedure returned no records"))?;
        parse_routing_record(&record)
    }

    async fn sync(&mut self, result: &QueryResult) -> DriverResult<()> {
        self.send().await?;
        while !result.done() && self.awaiting() {
            self.fetch().await?;
        }
        self.audit(result.failure()).await
    }

    async fn buffer(&mut self, result: &QueryResult) -> DriverResult<()> {
        if !result.done() && !result.streaming() {
            self.pull(result, -1, -1).await?;
        }
        self.sync(result).await
    }

    async fn next_record(&mut self, result: &QueryResult) -> DriverResult<Option<Record>> {
        loop {
            if let Some(record) = result.take() {
                return Ok(Some(record));
            }
            if result.done() {
                result.audit()?;
                return Ok(None);
            }
            if result.streaming() {
                self.send().await?;
                self.fetch().await?;
                if result.failed() {
                    self.audit(result.failure()).await?;
                }
            } else {
                self.pull(result, -1, -1).await?;
            }
        }
    }
}

/// Parse the routing procedure's single `[ttl, servers]` record.
///
/// `ttl` is in seconds. Roles other than ROUTE, READ and WRITE are skipped.
pub fn parse_routing_record(record: &Record) -> DriverResult<RoutingInfo> {
    let ttl = record
        .get("ttl")
        .or_else(|| record.get_by_index(0))
        .and_then(Value::as_int)
        .ok_or_else(|| DriverError::protocol("Routing record has no integer ttl"))?;
    let servers = record
        .get("servers")
        .or_else(|| record.get_by_index(1))
        .and_then(Value::as_list)
        .ok_or_else(|| DriverError::protocol("Routing record has no server list"))?;

    let mut info = RoutingInfo {
        ttl: Duration::from_secs(ttl.max(0) as u64),
        ..RoutingInfo::default()
    };
    for server in servers {
        let entry = server
            .as_map()
            .ok_or_else(|| DriverError::protocol("Routing server entry is not a map"))?;
        let role = entry.get("role").and_then(Value::as_str).and_then(ServerRole::parse);
        let addresses: Vec<String> = entry
            .get("addresses")
            .and_then(Value::as_list)
            .unwrap_or_default()
            .iter()
            .filter_map(|a| a.as_str().map(str::to_string))
            .collect();
        match role {
            Some(ServerRole::Route) => info.routers.extend(addresses),
            Some(ServerRole::Read) => info.readers.extend(addresses),
            Some(ServerRole::Write) => info.writers.extend(addresses),
            None => {}
        }
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::tag;
    use crate::bolt::BoltErrorCode;
    use crate::driver::testing::{connect, meta, Script};
    use std::sync::Arc;

    fn fields(names: &[&str]) -> ValueMap {
        meta(&[(
            "fields",
            Value::List(names.iter().map(|n| Value::from(*n)).collect()),
        )])
    }

    fn pull_n(s: &crate::bolt::Structure) -> i64 {
        s.fields[0]
            .as_map()
            .and_then(|m| m.get("n"))
            .and_then(Value::as_int)
            .unwrap()
    }

    #[tokio::test]
    async fn pull_with_flow_control() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            let run = s.expect(tag::RUN).await;
            assert_eq!(run.fields[0].as_str(), Some("UNWIND range(1, 5) AS n RETURN n"));
            let pull = s.expect(tag::PULL).await;
            assert_eq!(pull_n(&pull), 3);
            s.success(fields(&["n"])).await;
            for n in 1..=3 {
                s.record(vec![Value::from(n)]).await;
            }
            s.success(meta(&[("has_more", true.into())])).await;

            let pull = s.expect(tag::PULL).await;
            assert_eq!(pull_n(&pull), -1);
            for n in 4..=5 {
                s.record(vec![Value::from(n)]).await;
            }
            s.success(meta(&[("bookmark", "FB:1".into())])).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();

        let result = cx
            .auto_run("UNWIND range(1, 5) AS n RETURN n", ValueMap::new(), &TransactionConfig::new())
            .await
            .unwrap();
        let first = cx.pull(&result, 3, -1).await.unwrap();
        assert!(first.has_more());
        assert!(!result.done());
        let mut seen = Vec::new();
        while let Some(record) = result.take() {
            seen.push(record.get("n").and_then(Value::as_int).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);

        let second = cx.pull(&result, -1, -1).await.unwrap();
        assert!(!second.has_more());
        assert!(result.done());
        let rest: Vec<i64> = std::iter::from_fn(|| result.take())
            .map(|r| r.get("n").and_then(Value::as_int).unwrap())
            .collect();
        assert_eq!(rest, vec![4, 5]);
        assert_eq!(result.bookmark(), Some(Bookmark::new("FB:1")));

        let err = cx.pull(&result, -1, -1).await.unwrap_err();
        assert!(matches!(err, DriverError::Exhausted(_)));
        assert_eq!(cx.state(), ConnectionState::Ready);
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn records_attach_to_the_pull() {
        let (cx, server) = connect(&[BoltVersion::V3], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 3]).await;
            s.authenticate().await;
            let run = s.expect(tag::RUN).await;
            assert_eq!(run.fields.len(), 3);
            s.expect(tag::PULL).await;
            s.success(fields(&["x"])).await;
            for n in 0..4 {
                s.record(vec![Value::from(n)]).await;
            }
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let result = cx
            .auto_run("UNWIND range(0, 3) AS x RETURN x", ValueMap::new(), &TransactionConfig::new())
            .await
            .unwrap();
        let pull = cx.pull(&result, -1, -1).await.unwrap();
        assert_eq!(pull.request(), "PULL_ALL");
        assert_eq!(result.run_response().unwrap().record_count(), 0);
        assert_eq!(pull.record_count(), 4);
        assert_eq!(result.fields(), vec!["x".to_string()]);
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn capacity_limits_waiting_not_delivery() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            s.expect(tag::RUN).await;
            s.expect(tag::PULL).await;
            s.success(fields(&["n"])).await;
            for n in 0..6 {
                s.record(vec![Value::from(n)]).await;
            }
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let result = cx
            .auto_run("UNWIND range(0, 5) AS n RETURN n", ValueMap::new(), &TransactionConfig::new())
            .await
            .unwrap();
        let pull = cx.pull(&result, -1, 2).await.unwrap();
        assert!(pull.record_count() >= 2);

        let mut all = Vec::new();
        while let Some(record) = cx.next_record(&result).await.unwrap() {
            all.push(record.get("n").and_then(Value::as_int).unwrap());
        }
        assert_eq!(all, (0..6).collect::<Vec<i64>>());
        assert!(result.exhausted());
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failure_resets_and_connection_recovers() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            s.expect(tag::RUN).await;
            s.expect(tag::PULL).await;
            s.failure(BoltErrorCode::SYNTAX_ERROR, "Invalid input 'T'").await;
            s.ignored().await;
            s.expect(tag::RESET).await;
            s.success(ValueMap::new()).await;

            s.expect(tag::RUN).await;
            s.expect(tag::PULL).await;
            s.success(fields(&["one"])).await;
            s.record(vec![1.into()]).await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let bad = cx
            .auto_run("RETRUN 1", ValueMap::new(), &TransactionConfig::new())
            .await
            .unwrap();
        let err = cx.pull(&bad, -1, -1).await.unwrap_err();
        match err {
            DriverError::ServerFailure(f) => assert_eq!(f.code, BoltErrorCode::SYNTAX_ERROR),
            other => panic!("unexpected {:?}", other),
        }
        assert!(bad.failed() && bad.done());
        assert_eq!(bad.last_response().unwrap().status(), crate::driver::task::ResponseStatus::Ignored);
        assert_eq!(cx.state(), ConnectionState::Ready);
        assert!(!cx.is_closed());

        let good = cx
            .auto_run("RETURN 1 AS one", ValueMap::new(), &TransactionConfig::new())
            .await
            .unwrap();
        let record = cx.next_record(&good).await.unwrap().unwrap();
        assert_eq!(record.get("one"), Some(&Value::Integer(1)));
        assert!(cx.next_record(&good).await.unwrap().is_none());
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn v1_transactions_run_as_cypher() {
        let (cx, server) = connect(&[BoltVersion::V1], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 1]).await;
            s.authenticate().await;
            let begin = s.expect(tag::RUN).await;
            assert_eq!(begin.fields[0].as_str(), Some("BEGIN"));
            assert_eq!(begin.fields.len(), 2);
            let discard = s.expect(tag::DISCARD).await;
            assert!(discard.fields.is_empty());
            s.success(fields(&[])).await;
            s.success(ValueMap::new()).await;

            s.expect(tag::RUN).await;
            s.expect(tag::PULL).await;
            s.success(fields(&["n"])).await;
            s.record(vec![42.into()]).await;
            s.success(ValueMap::new()).await;

            let commit = s.expect(tag::RUN).await;
            assert_eq!(commit.fields[0].as_str(), Some("COMMIT"));
            s.expect(tag::DISCARD).await;
            s.success(fields(&[])).await;
            s.success(meta(&[("bookmark", "neo4j:bookmark:v1:tx7".into())])).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();

        let timeout = TransactionConfig::new().with_timeout(Duration::from_secs(5));
        assert!(matches!(cx.begin(&timeout).await, Err(DriverError::Unsupported(_))));

        let tx = cx.begin(&TransactionConfig::new()).await.unwrap();
        assert_eq!(cx.transaction().map(Transaction::id), Some(tx.id()));
        let result = cx.run_in_tx(&tx, "RETURN 42 AS n", ValueMap::new()).await.unwrap();
        cx.buffer(&result).await.unwrap();
        assert_eq!(result.take().unwrap().get("n"), Some(&Value::Integer(42)));

        let bookmark = cx.commit(&tx).await.unwrap();
        assert_eq!(bookmark, Some(Bookmark::new("neo4j:bookmark:v1:tx7")));
        assert!(cx.transaction().is_none());
        assert!(tx.done());
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn v4_transaction_messages() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            let begin = s.expect(tag::BEGIN).await;
            let extra = begin.fields[0].as_map().unwrap();
            assert_eq!(extra.get("db"), Some(&Value::from("movies")));
            assert_eq!(extra.get("mode"), Some(&Value::from("r")));
            s.success(ValueMap::new()).await;

            s.expect(tag::RUN).await;
            let mut run_meta = fields(&["n"]);
            run_meta.insert("qid".into(), 0.into());
            s.success(run_meta).await;
            let pull = s.expect(tag::PULL).await;
            let args = pull.fields[0].as_map().unwrap();
            assert_eq!(args.get("qid"), Some(&Value::Integer(0)));
            s.record(vec![1.into()]).await;
            s.success(ValueMap::new()).await;

            s.expect(tag::ROLLBACK).await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let config = TransactionConfig::new().with_database("movies").readonly();
        let tx = cx.begin(&config).await.unwrap();
        assert!(tx.readonly());
        assert_eq!(tx.database(), Some("movies"));

        let second = cx.begin(&TransactionConfig::new()).await;
        assert!(matches!(second, Err(DriverError::Transaction(_))));
        let auto = cx.auto_run("RETURN 1", ValueMap::new(), &TransactionConfig::new()).await;
        assert!(matches!(auto, Err(DriverError::Transaction(_))));

        let result = cx.run_in_tx(&tx, "RETURN 1 AS n", ValueMap::new()).await.unwrap();
        cx.buffer(&result).await.unwrap();
        assert_eq!(result.qid(), Some(0));
        cx.rollback(&tx).await.unwrap();
        assert!(matches!(
            cx.run_in_tx(&tx, "RETURN 2", ValueMap::new()).await,
            Err(DriverError::Transaction(_))
        ));
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn failure_in_transaction_breaks_it() {
        let (cx, server) = connect(&[BoltVersion::V3], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 3]).await;
            s.authenticate().await;
            s.expect(tag::BEGIN).await;
            s.success(ValueMap::new()).await;
            s.expect(tag::RUN).await;
            s.expect(tag::PULL).await;
            s.failure("Neo.ClientError.Schema.ConstraintValidationFailed", "exists").await;
            s.ignored().await;
            s.expect(tag::RESET).await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let tx = cx.begin(&TransactionConfig::new()).await.unwrap();
        let result = cx.run_in_tx(&tx, "CREATE (:X {id: 1})", ValueMap::new()).await.unwrap();
        assert!(cx.buffer(&result).await.is_err());
        assert!(tx.broken());
        assert!(cx.transaction().is_none());
        assert!(matches!(cx.commit(&tx).await, Err(DriverError::TransactionBroken(_))));
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn discard_drops_the_rest() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            s.expect(tag::RUN).await;
            let discard = s.expect(tag::DISCARD).await;
            assert_eq!(pull_n(&discard), -1);
            s.success(fields(&["n"])).await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let result = cx
            .auto_run("UNWIND range(1, 100) AS n RETURN n", ValueMap::new(), &TransactionConfig::new())
            .await
            .unwrap();
        cx.discard(&result).await.unwrap();
        assert!(result.exhausted());
        assert!(matches!(cx.discard(&result).await, Err(DriverError::Exhausted(_))));
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn route_on_v4() {
        let (cx, server) = connect(&[BoltVersion::V4_0], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 4]).await;
            s.authenticate().await;
            let run = s.expect(tag::RUN).await;
            assert_eq!(run.fields[0].as_str(), Some(ROUTING_QUERY_V4));
            let params = run.fields[1].as_map().unwrap();
            assert_eq!(params.get("database"), Some(&Value::from("movies")));
            let extra = run.fields[2].as_map().unwrap();
            assert_eq!(extra.get("db"), Some(&Value::from("system")));
            s.expect(tag::PULL).await;
            s.success(fields(&["ttl", "servers"])).await;
            let server_entry = |role: &str, addrs: &[&str]| {
                Value::Map(meta(&[
                    ("role", role.into()),
                    ("addresses", Value::List(addrs.iter().map(|a| Value::from(*a)).collect())),
                ]))
            };
            s.record(vec![
                Value::from(300),
                Value::List(vec![
                    server_entry("ROUTE", &["core1:7687", "core2:7687"]),
                    server_entry("READ", &["replica1:7687"]),
                    server_entry("WRITE", &["core1:7687"]),
                ]),
            ])
            .await;
            s.success(ValueMap::new()).await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let info = cx.route(Some("movies"), &ValueMap::new()).await.unwrap();
        assert_eq!(info.routers, vec!["core1:7687", "core2:7687"]);
        assert_eq!(info.readers, vec!["replica1:7687"]);
        assert_eq!(info.writers, vec!["core1:7687"]);
        assert_eq!(info.ttl, Duration::from_secs(300));
        cx.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn named_database_routing_needs_v4() {
        let (cx, server) = connect(&[BoltVersion::V3], |stream| async move {
            let mut s = Script::accept(stream, [0, 0, 0, 3]).await;
            s.authenticate().await;
            s.finish().await;
        })
        .await;
        let mut cx = cx.unwrap();
        let err = cx.route(Some("movies"), &ValueMap::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::Unsupported(_)));
        cx.close().await;
        server.await.unwrap();
    }

    #[test]
    fn routing_record_by_position() {
        let keys: Arc<[String]> = Vec::<String>::new().into();
        let servers = Value::List(vec![Value::Map(meta(&[
            ("role", "WRITE".into()),
            ("addresses", Value::List(vec!["w:7687".into()])),
        ]))]);
        let record = Record::new(keys.clone(), vec![Value::from(-5), servers]);
        let info = parse_routing_record(&record).unwrap();
        assert_eq!(info.ttl, Duration::ZERO);
        assert_eq!(info.writers, vec!["w:7687"]);
        assert!(info.readers.is_empty());

        let empty = Record::new(keys.clone(), vec![]);
        assert!(parse_routing_record(&empty).is_err());
    }
}

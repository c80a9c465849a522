//! Task bookkeeping
//!
//! Requests on a connection are pipelined, so every request gets a
//! [`Response`] placeholder that the connection fills in as replies arrive,
//! strictly in the order the requests were written.
//!
//! Responses are grouped into tasks: a [`QueryResult`] holds the RUN response
//! followed by its PULL/DISCARD responses, and a transaction holds BEGIN, its
//! results and COMMIT/ROLLBACK. Both are built on [`ItemizedTask`].
//!
//! All handles here are cheap clones over shared state, so the connection
//! draining the wire and the caller reading records see the same data.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::{DriverError, DriverResult, ServerFailure};
use super::record::Record;
use super::transaction::Bookmark;
use crate::bolt::{Value, ValueMap};

// ============================================================================
// Response
// ============================================================================

/// Where a response is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// No terminal message yet
    Pending,
    /// SUCCESS received
    Success,
    /// FAILURE received
    Failure,
    /// IGNORED received
    Ignored,
}

#[derive(Debug)]
struct ResponseState {
    status: ResponseStatus,
    metadata: ValueMap,
    records: VecDeque<Vec<Value>>,
    failure: Option<ServerFailure>,
}

#[derive(Debug)]
struct ResponseInner {
    request: &'static str,
    capacity: i64,
    vital: bool,
    state: Mutex<ResponseState>,
}

/// Placeholder for the reply to one request.
///
/// Moves from pending to success, failure or ignored exactly once. Records
/// are accepted only while pending.
#[derive(Debug, Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl Response {
    /// Response to `request` with unlimited record capacity.
    pub fn new(request: &'static str) -> Self {
        Self::build(request, -1, false)
    }

    /// Response whose record buffer counts as full at `capacity` records.
    /// Negative means unlimited.
    pub fn with_capacity(request: &'static str, capacity: i64) -> Self {
        Self::build(request, capacity, false)
    }

    /// Response whose failure must close the connection.
    pub fn vital(request: &'static str) -> Self {
        Self::build(request, -1, true)
    }

    fn build(request: &'static str, capacity: i64, vital: bool) -> Self {
        Self {
            inner: Arc::new(ResponseInner {
                request,
                capacity,
                vital,
                state: Mutex::new(ResponseState {
                    status: ResponseStatus::Pending,
                    metadata: ValueMap::new(),
                    records: VecDeque::new(),
                    failure: None,
                }),
            }),
        }
    }

    /// Name of the request this answers, e.g. `PULL`.
    pub fn request(&self) -> &'static str {
        self.inner.request
    }

    pub fn capacity(&self) -> i64 {
        self.inner.capacity
    }

    pub fn is_vital(&self) -> bool {
        self.inner.vital
    }

    pub fn status(&self) -> ResponseStatus {
        self.inner.state.lock().status
    }

    /// Whether a terminal message has arrived.
    pub fn done(&self) -> bool {
        self.status() != ResponseStatus::Pending
    }

    pub fn succeeded(&self) -> bool {
        self.status() == ResponseStatus::Success
    }

    pub fn failed(&self) -> bool {
        self.status() == ResponseStatus::Failure
    }

    pub fn ignored(&self) -> bool {
        self.status() == ResponseStatus::Ignored
    }

    /// Record SUCCESS. Returns false if already terminal.
    pub fn set_success(&self, metadata: ValueMap) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != ResponseStatus::Pending {
            return false;
        }
        state.status = ResponseStatus::Success;
        state.metadata = metadata;
        true
    }

    /// Record FAILURE. Returns false if already terminal.
    pub fn set_failure(&self, failure: ServerFailure) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != ResponseStatus::Pending {
            return false;
        }
        state.status = ResponseStatus::Failure;
        state.failure = Some(failure);
        true
    }

    /// Record IGNORED. Returns false if already terminal.
    pub fn set_ignored(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != ResponseStatus::Pending {
            return false;
        }
        state.status = ResponseStatus::Ignored;
        true
    }

    /// Buffer one record. Returns false once terminal.
    pub fn add_record(&self, values: Vec<Value>) -> bool {
        let mut state = self.inner.state.lock();
        if state.status != ResponseStatus::Pending {
            return false;
        }
        state.records.push_back(values);
        true
    }

    /// Whether the record buffer has reached capacity.
    pub fn full(&self) -> bool {
        let capacity = self.inner.capacity;
        capacity >= 0 && self.inner.state.lock().records.len() as i64 >= capacity
    }

    pub fn record_count(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    pub fn take_record(&self) -> Option<Vec<Value>> {
        self.inner.state.lock().records.pop_front()
    }

    pub fn peek_records(&self, limit: usize) -> Vec<Vec<Value>> {
        self.inner
            .state
            .lock()
            .records
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn metadata(&self) -> ValueMap {
        self.inner.state.lock().metadata.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().metadata.get(key).cloned()
    }

    /// `has_more` from PULL's SUCCESS (v4+).
    pub fn has_more(&self) -> bool {
        self.get("has_more").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn failure(&self) -> Option<ServerFailure> {
        self.inner.state.lock().failure.clone()
    }

    /// The server failure, as an error.
    pub fn audit(&self) -> DriverResult<()> {
        match self.failure() {
            Some(failure) => Err(DriverError::ServerFailure(failure)),
            None => Ok(()),
        }
    }

    /// Whether `other` is this same placeholder.
    pub fn same(&self, other: &Response) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn is_stream(&self) -> bool {
        matches!(self.inner.request, "PULL" | "PULL_ALL" | "DISCARD" | "DISCARD_ALL")
    }
}

// ============================================================================
// ItemizedTask
// ============================================================================

/// One entry in an [`ItemizedTask`].
#[derive(Debug, Clone)]
pub enum TaskItem {
    Response(Response),
    Result(QueryResult),
}

impl TaskItem {
    pub fn done(&self) -> bool {
        match self {
            TaskItem::Response(r) => r.done(),
            TaskItem::Result(r) => r.done(),
        }
    }

    pub fn failed(&self) -> bool {
        match self {
            TaskItem::Response(r) => r.failed(),
            TaskItem::Result(r) => r.failed(),
        }
    }

    pub fn failure(&self) -> Option<ServerFailure> {
        match self {
            TaskItem::Response(r) => r.failure(),
            TaskItem::Result(r) => r.failure(),
        }
    }
}

impl From<Response> for TaskItem {
    fn from(response: Response) -> Self {
        TaskItem::Response(response)
    }
}

impl From<QueryResult> for TaskItem {
    fn from(result: QueryResult) -> Self {
        TaskItem::Result(result)
    }
}

/// Ordered items making up one logical operation.
#[derive(Debug, Clone, Default)]
pub struct ItemizedTask {
    items: Vec<TaskItem>,
    complete: bool,
}

impl ItemizedTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item; `final_` marks the task complete.
    pub fn append(&mut self, item: impl Into<TaskItem>, final_: bool) {
        self.items.push(item.into());
        if final_ {
            self.complete = true;
        }
    }

    pub fn items(&self) -> &[TaskItem] {
        &self.items
    }

    pub fn latest(&self) -> Option<&TaskItem> {
        self.items.last()
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    /// Complete, and every item done.
    pub fn done(&self) -> bool {
        self.complete && self.items.iter().all(TaskItem::done)
    }

    pub fn failed(&self) -> bool {
        self.items.iter().any(TaskItem::failed)
    }

    /// First failure among the items.
    pub fn failure(&self) -> Option<ServerFailure> {
        self.items.iter().find_map(TaskItem::failure)
    }

    pub fn audit(&self) -> DriverResult<()> {
        match self.failure() {
            Some(failure) => Err(DriverError::ServerFailure(failure)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// QueryResult
// ============================================================================

#[derive(Debug)]
struct ResultState {
    database: Option<String>,
    query: String,
    task: ItemizedTask,
    fields: Option<Arc<[String]>>,
}

/// Responses for one query: RUN, then any number of PULL/DISCARD.
///
/// Done once the last response is terminal and the server has nothing more
/// to stream. Records can be taken while the result is still streaming.
#[derive(Debug, Clone)]
pub struct QueryResult {
    inner: Arc<Mutex<ResultState>>,
}

impl QueryResult {
    pub fn new(database: Option<String>, query: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResultState {
                database,
                query: query.into(),
                task: ItemizedTask::new(),
                fields: None,
            })),
        }
    }

    pub fn database(&self) -> Option<String> {
        self.inner.lock().database.clone()
    }

    pub fn query(&self) -> String {
        self.inner.lock().query.clone()
    }

    pub fn append(&self, response: Response, final_: bool) {
        self.inner.lock().task.append(response, final_);
    }

    fn responses(&self) -> Vec<Response> {
        self.inner
            .lock()
            .task
            .items()
            .iter()
            .filter_map(|item| match item {
                TaskItem::Response(r) => Some(r.clone()),
                TaskItem::Result(_) => None,
            })
            .collect()
    }

    /// The RUN response.
    pub fn run_response(&self) -> Option<Response> {
        self.responses().into_iter().next()
    }

    /// Most recently appended response.
    pub fn last_response(&self) -> Option<Response> {
        self.responses().pop()
    }

    /// The server has finished with this query.
    pub fn done(&self) -> bool {
        let state = self.inner.lock();
        let items = state.task.items();
        match items.last() {
            Some(TaskItem::Response(last)) if last.done() => {
                state.task.complete()
                    || last.failed()
                    || last.ignored()
                    || (last.is_stream() && !last.has_more())
            }
            _ => false,
        }
    }

    pub fn failed(&self) -> bool {
        self.inner.lock().task.failed()
    }

    pub fn failure(&self) -> Option<ServerFailure> {
        self.inner.lock().task.failure()
    }

    pub fn audit(&self) -> DriverResult<()> {
        self.inner.lock().task.audit()
    }

    /// A PULL or DISCARD has been sent and its reply is still pending.
    pub fn streaming(&self) -> bool {
        self.last_response()
            .map(|r| r.is_stream() && !r.done())
            .unwrap_or(false)
    }

    /// The server reported more records after the last PULL.
    pub fn has_more(&self) -> bool {
        self.last_response().map(|r| r.has_more()).unwrap_or(false)
    }

    /// Field names from RUN's SUCCESS, once it has arrived.
    pub fn fields(&self) -> Vec<String> {
        self.keys().map(|k| k.to_vec()).unwrap_or_default()
    }

    fn keys(&self) -> Option<Arc<[String]>> {
        if let Some(fields) = &self.inner.lock().fields {
            return Some(fields.clone());
        }
        let run = self.run_response()?;
        let names: Vec<String> = match run.get("fields")? {
            Value::List(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => return None,
        };
        let fields: Arc<[String]> = names.into();
        self.inner.lock().fields = Some(fields.clone());
        Some(fields)
    }

    /// Query id from RUN's SUCCESS inside an explicit transaction (v4+).
    pub fn qid(&self) -> Option<i64> {
        self.run_response()
            .and_then(|run| run.get("qid"))
            .and_then(|v| v.as_int())
    }

    /// Metadata of all responses, later entries winning.
    pub fn metadata(&self) -> ValueMap {
        let mut merged = ValueMap::new();
        for response in self.responses() {
            merged.extend(response.metadata());
        }
        merged
    }

    pub fn bookmark(&self) -> Option<Bookmark> {
        self.responses()
            .iter()
            .rev()
            .find_map(|r| r.get("bookmark"))
            .and_then(|v| v.as_str().map(Bookmark::new))
    }

    /// Next buffered record, without touching the wire.
    ///
    /// `None` only means nothing is buffered; check [`done`](Self::done) to
    /// tell that apart from the end of the stream.
    pub fn take(&self) -> Option<Record> {
        let keys = self.keys().unwrap_or_else(|| Vec::new().into());
        self.responses()
            .iter()
            .find_map(Response::take_record)
            .map(|values| Record::new(keys, values))
    }

    /// Up to `limit` buffered records, left in place.
    pub fn peek(&self, limit: usize) -> Vec<Record> {
        let keys = self.keys().unwrap_or_else(|| Vec::new().into());
        let mut out = Vec::new();
        for response in self.responses() {
            if out.len() >= limit {
                break;
            }
            for values in response.peek_records(limit - out.len()) {
                out.push(Record::new(keys.clone(), values));
            }
        }
        out
    }

    /// Records buffered across all responses.
    pub fn buffered(&self) -> usize {
        self.responses().iter().map(Response::record_count).sum()
    }

    /// Done, and every buffered record taken.
    pub fn exhausted(&self) -> bool {
        self.done() && self.buffered() == 0
    }
}

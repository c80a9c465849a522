//! Transactions
//!
//! An explicit transaction lives on exactly one connection. The handle here
//! only tracks identity and progress; the connection drives the messages.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use super::error::{DriverError, DriverResult, ServerFailure};
use super::task::{ItemizedTask, TaskItem};
use crate::bolt::{AccessMode, Capabilities, Value, ValueMap};

// ============================================================================
// Bookmark
// ============================================================================

/// Opaque marker of a point in transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Bookmark {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// TransactionConfig
// ============================================================================

/// Options for an explicit or auto-commit transaction.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Target database; server default when `None`
    pub database: Option<String>,
    /// Read or write
    pub access_mode: AccessMode,
    /// Transactions that must be visible first
    pub bookmarks: Vec<Bookmark>,
    /// Server-side timeout
    pub timeout: Option<Duration>,
    /// Attached to the transaction in server logs
    pub metadata: ValueMap,
}

impl TransactionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    pub fn readonly(self) -> Self {
        self.with_access_mode(AccessMode::Read)
    }

    pub fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.bookmarks.push(bookmark);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_readonly(&self) -> bool {
        self.access_mode.is_read()
    }

    /// The extra map for RUN/BEGIN under `capabilities`.
    ///
    /// Versions without an extra map cannot carry any option except the
    /// access mode, which only matters for routing.
    pub fn to_extra(&self, capabilities: &Capabilities) -> DriverResult<ValueMap> {
        let mut extra = ValueMap::new();
        if !capabilities.extra_metadata {
            if self.database.is_some()
                || !self.bookmarks.is_empty()
                || self.timeout.is_some()
                || !self.metadata.is_empty()
            {
                return Err(DriverError::unsupported(
                    "Transaction options require Bolt 3 or later",
                ));
            }
            return Ok(extra);
        }

        if let Some(database) = &self.database {
            if !capabilities.database_selection {
                return Err(DriverError::unsupported(format!(
                    "Database selection ({:?}) requires Bolt 4.0 or later",
                    database
                )));
            }
            extra.insert("db".into(), Value::from(database.as_str()));
        }
        if self.access_mode.is_read() {
            extra.insert("mode".into(), Value::from(self.access_mode.as_str()));
        }
        if !self.bookmarks.is_empty() {
            let bookmarks = self
                .bookmarks
                .iter()
                .map(|b| Value::from(b.as_str()))
                .collect::<Vec<_>>();
            extra.insert("bookmarks".into(), Value::List(bookmarks));
        }
        if let Some(timeout) = self.timeout {
            extra.insert("tx_timeout".into(), Value::Integer(timeout.as_millis() as i64));
        }
        if !self.metadata.is_empty() {
            extra.insert("tx_metadata".into(), Value::Map(self.metadata.clone()));
        }
        Ok(extra)
    }
}

// ============================================================================
// Transaction
// ============================================================================

#[derive(Debug)]
struct TransactionInner {
    id: String,
    database: Option<String>,
    readonly: bool,
    broken: AtomicBool,
    task: Mutex<ItemizedTask>,
}

/// Explicit transaction handle.
///
/// Clones refer to the same transaction. Once broken, every operation on it
/// fails with [`DriverError::TransactionBroken`].
#[derive(Debug, Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub fn new(database: Option<String>, readonly: bool) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4().to_string(),
                database,
                readonly,
                broken: AtomicBool::new(false),
                task: Mutex::new(ItemizedTask::new()),
            }),
        }
    }

    /// Unique id, also the key in the connector's binding map.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn database(&self) -> Option<&str> {
        self.inner.database.as_deref()
    }

    pub fn readonly(&self) -> bool {
        self.inner.readonly
    }

    pub fn broken(&self) -> bool {
        self.inner.broken.load(Ordering::Acquire)
    }

    pub fn mark_broken(&self) {
        self.inner.broken.store(true, Ordering::Release);
    }

    pub fn append(&self, item: impl Into<TaskItem>, final_: bool) {
        self.inner.task.lock().append(item, final_);
    }

    /// COMMIT or ROLLBACK has been appended.
    pub fn closing(&self) -> bool {
        self.inner.task.lock().complete()
    }

    pub fn done(&self) -> bool {
        self.inner.task.lock().done()
    }

    pub fn failed(&self) -> bool {
        self.inner.task.lock().failed()
    }

    pub fn failure(&self) -> Option<ServerFailure> {
        self.inner.task.lock().failure()
    }

    pub fn audit(&self) -> DriverResult<()> {
        self.inner.task.lock().audit()
    }

    /// Fail unless the transaction can still be used.
    pub fn ensure_usable(&self) -> DriverResult<()> {
        if self.broken() {
            return Err(DriverError::transaction_broken(format!(
                "Transaction {} is broken",
                self.id()
            )));
        }
        if self.closing() {
            return Err(DriverError::transaction(format!(
                "Transaction {} is already closed",
                self.id()
            )));
        }
        Ok(())
    }

    pub fn same(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Transaction {}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transaction({})", self.inner.id)
    }
}

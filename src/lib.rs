//! # graphwire
//!
//! An async client for graph databases speaking the Bolt protocol,
//! versions 1 to 4.1.
//!
//! ## Features
//!
//! - **Bolt 1 to 4.1** - Version negotiation, with each version's differences held in one capability table
//! - **Pipelining** - Requests are queued and replies matched to them in order
//! - **Connection Pooling** - Per-server pools that fail fast when full
//! - **Cluster Routing** - Per-database routing tables, reads to readers and writes to the leader
//! - **Retries** - Transient and not-a-leader failures are retried with backoff
//! - **TLS** - `+s` and `+ssc` URI schemes via rustls
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graphwire::{Connector, ConnectorConfig, TransactionConfig, ValueMap};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectorConfig::builder("neo4j://localhost:7687")?
//!         .with_credentials("neo4j", "password")
//!         .build()?;
//!     let connector = Connector::new(config)?;
//!
//!     let result = connector
//!         .auto_run("UNWIND range(1, 3) AS n RETURN n", ValueMap::new(), &TransactionConfig::new())
//!         .await?;
//!     while let Some(record) = result.take() {
//!         println!("{:?}", record.get("n"));
//!     }
//!
//!     connector.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! Below the connector, a [`Connection`] gives direct control over flow:
//!
//! ```rust,no_run
//! # use graphwire::{Connection, DriverResult, TransactionConfig, ValueMap};
//! # async fn example(cx: &mut dyn Connection) -> DriverResult<()> {
//! let result = cx.auto_run("UNWIND range(1, 5) AS n RETURN n", ValueMap::new(), &TransactionConfig::new()).await?;
//! cx.pull(&result, 3, -1).await?;
//! while let Some(record) = cx.next_record(&result).await? {
//!     println!("{:?}", record.values());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`driver`] - Connections, pools, routing and transactions
//! - [`bolt`] - PackStream, message framing and version negotiation
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod bolt;
pub mod driver;

// Re-exports for convenience
pub use driver::{
    Bookmark, Connection, ConnectionPool, Connector, ConnectorConfig, ConnectorConfigBuilder,
    DriverError, DriverResult, PoolConfig, PooledConnection, QueryResult, Record,
    ServerFailure, ServerProfile, Transaction, TransactionConfig,
};

pub use bolt::{BoltError, BoltVersion, Value, ValueMap};

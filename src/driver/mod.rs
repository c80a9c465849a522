//! Driver Module
//!
//! Client side of the Bolt protocol: connections, pools and routing.
//!
//! # Layers
//!
//! ```text
//! Connector (routing, retries, transaction binding)
//!   └── ConnectionPool (one per server, fail-fast)
//!         └── Connection (BoltConnection)
//!               └── Wire (TCP or TLS)
//! ```
//!
//! - [`wire`]: buffered byte stream with TLS upgrade and byte counters
//! - [`bolt`]: the Bolt state machine for protocol versions 1 to 4.1
//! - [`task`]: response placeholders, results and itemized tasks
//! - [`transaction`]: transactions, their options and bookmarks
//! - [`connection`]: the `Connection` contract and `Opener`
//! - [`pool`]: per-server connection pool
//! - [`routing`]: routing tables and the connector
//!
//! # Example
//!
//! ```ignore
//! use graphwire::driver::{Connector, ConnectorConfig, TransactionConfig};
//!
//! let config = ConnectorConfig::builder("bolt://localhost:7687")?
//!     .with_credentials("neo4j", "password")
//!     .build()?;
//! let connector = Connector::new(config)?;
//!
//! let tx = connector.begin(&TransactionConfig::new()).await?;
//! connector.run_in_tx(&tx, "CREATE (n:Person {name: $name})", params).await?;
//! let bookmark = connector.commit(&tx).await?;
//!
//! connector.close().await;
//! ```

pub mod bolt;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod profile;
pub mod record;
pub mod routing;
pub mod task;
pub mod transaction;
pub mod wire;

#[cfg(test)]
mod testing;

// Re-exports
pub use bolt::{BoltConnection, BoltOpener, BoltOptions};
pub use config::{ConnectorConfig, ConnectorConfigBuilder};
pub use connection::{Connection, ConnectionState, Opener, RoutingInfo, ServerInfo};
pub use error::{DriverError, DriverResult, FailureClassification, ServerFailure};
pub use pool::{ConnectionPool, PoolConfig, PoolConfigBuilder, PoolMetrics, PooledConnection};
pub use profile::{Scheme, ServerProfile};
pub use record::Record;
pub use routing::{Connector, RoutingTable};
pub use task::{ItemizedTask, QueryResult, Response, ResponseStatus};
pub use transaction::{Bookmark, Transaction, TransactionConfig};
pub use wire::Wire;

//! Routing
//!
//! Cluster-aware connection acquisition.
//!
//! # Overview
//!
//! A [`Connector`] built from a `neo4j://` URI keeps one [`RoutingTable`] per
//! database, fetched from the cluster's routers. Reads are sent to readers,
//! writes to writers, and the least busy server of the set is chosen by the
//! [`ServerSelector`]. A `bolt://` URI turns routing off and every
//! connection goes to the one server named.
//!
//! # Example
//!
//! ```ignore
//! use graphwire::driver::config::ConnectorConfig;
//! use graphwire::driver::routing::Connector;
//! use graphwire::driver::transaction::TransactionConfig;
//!
//! let config = ConnectorConfig::builder("neo4j://core1:7687")?
//!     .with_credentials("neo4j", "secret")
//!     .build()?;
//! let connector = Connector::new(config)?;
//!
//! // Sent to a reader
//! let result = connector
//!     .auto_run("MATCH (n) RETURN count(n)", Default::default(), &TransactionConfig::new().readonly())
//!     .await?;
//!
//! connector.close().await;
//! ```

mod connector;
mod policy;
mod table;

pub use connector::Connector;
pub use policy::{RoutingPolicy, ServerSelector};
pub use table::{RoutingTable, ServerRole};

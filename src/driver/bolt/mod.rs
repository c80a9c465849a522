//! Bolt connections for the driver.
//!
//! This module provides the client side of the Bolt protocol: a
//! [`BoltConnection`] per socket, driving the shared codec and message types
//! from [`crate::bolt`] over a [`Wire`].
//!
//! # Architecture
//!
//! ```text
//! Connector / ConnectionPool
//!   └── BoltOpener (Opener)
//!         └── BoltConnection (Connection)
//!               ├── Wire (TCP or TLS, buffered)
//!               ├── BoltCodec (chunking, tag peek)
//!               └── Capabilities (per negotiated version)
//! ```
//!
//! The negotiated version is resolved to a [`Capabilities`] row once, at
//! open time; every version difference is a branch on that row.
//!
//! [`Capabilities`]: crate::bolt::Capabilities

pub mod client;
pub mod connection;

use std::time::Duration;

use async_trait::async_trait;

pub use client::parse_routing_record;
pub use connection::BoltConnection;

use super::config::{ConnectorConfig, DEFAULT_USER_AGENT};
use super::connection::{Connection, Opener};
use super::error::{DriverError, DriverResult};
use super::profile::ServerProfile;
use super::wire::Wire;
use crate::bolt::{BoltVersion, ValueMap};

/// Settings used when opening a Bolt connection.
#[derive(Debug, Clone)]
pub struct BoltOptions {
    /// User agent sent in INIT/HELLO
    pub user_agent: String,
    /// Handshake proposal, highest preference first
    pub protocol_versions: Vec<BoltVersion>,
    /// Routing context for HELLO on v4.1; `None` when routing is off
    pub routing_context: Option<ValueMap>,
    /// Deadline for socket, TLS, handshake and authentication together
    pub connect_timeout: Duration,
    pub keep_alive: bool,
}

impl BoltOptions {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            protocol_versions: config.protocol_versions.clone(),
            routing_context: config.routing.then(|| config.routing_context.clone()),
            connect_timeout: config.connect_timeout,
            keep_alive: config.keep_alive,
        }
    }
}

impl Default for BoltOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            protocol_versions: BoltVersion::DEFAULT_PROPOSAL.to_vec(),
            routing_context: None,
            connect_timeout: Duration::from_secs(30),
            keep_alive: true,
        }
    }
}

/// Opens Bolt connections over TCP, upgrading to TLS when the profile asks.
#[derive(Debug, Clone, Default)]
pub struct BoltOpener {
    options: BoltOptions,
}

impl BoltOpener {
    pub fn new(options: BoltOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BoltOptions {
        &self.options
    }

    async fn connect(&self, profile: &ServerProfile) -> DriverResult<BoltConnection> {
        let address = profile.address();
        let mut wire = Wire::open(&address, self.options.keep_alive, self.options.connect_timeout).await?;
        if profile.secure() {
            wire.secure(profile.verify(), profile.host()).await?;
        }
        BoltConnection::open(wire, profile.clone(), &self.options).await
    }
}

#[async_trait]
impl Opener for BoltOpener {
    async fn open(&self, profile: &ServerProfile) -> DriverResult<Box<dyn Connection>> {
        let cx = tokio::time::timeout(self.options.connect_timeout, self.connect(profile))
            .await
            .map_err(|_| DriverError::connect_failure(profile.address(), "timed out"))??;
        Ok(Box::new(cx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn options_follow_config() {
        let config = ConnectorConfig::builder("neo4j://core1:7687")
            .unwrap()
            .with_routing_context("region", "eu")
            .with_user_agent("app/1.0")
            .build()
            .unwrap();
        let options = BoltOptions::from_config(&config);
        assert_eq!(options.user_agent, "app/1.0");
        assert!(options.routing_context.unwrap().contains_key("region"));

        let direct = ConnectorConfig::builder("bolt://localhost").unwrap().build().unwrap();
        assert!(BoltOptions::from_config(&direct).routing_context.is_none());
    }

    #[tokio::test]
    async fn open_reports_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let opener = BoltOpener::default();
        let err = opener
            .open(&ServerProfile::new("127.0.0.1", port))
            .await
            .err()
            .unwrap();
        assert!(err.is_transport());
    }
}

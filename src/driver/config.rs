//! Connector configuration
//!
//! Settings for connecting, pooling and routing.

use std::time::Duration;

use super::error::{DriverError, DriverResult};
use super::pool::PoolConfig;
use super::profile::ServerProfile;
use super::routing::RoutingPolicy;
use crate::bolt::{BoltVersion, Value, ValueMap};

/// User agent sent in INIT/HELLO.
pub const DEFAULT_USER_AGENT: &str = concat!("graphwire/", env!("CARGO_PKG_VERSION"));

/// Fewest acquire attempts the connector will make.
pub const MIN_ACQUIRE_ATTEMPTS: usize = 3;

// ============================================================================
// ConnectorConfig
// ============================================================================

/// Connector configuration.
///
/// | Field | Default |
/// |-------|---------|
/// | `user_agent` | `graphwire/<version>` |
/// | `protocol_versions` | 4.1, 4.0, 3, 2 |
/// | `pool` | see [`PoolConfig`] |
/// | `connect_timeout` | 30s |
/// | `acquire_timeout` | 60s |
/// | `max_acquire_attempts` | 3 |
/// | `retry_delay` | 100ms, doubled per attempt |
/// | `keep_alive` | true |
/// | `routing` | from the URI scheme |
/// | `routing_policy` | least connected |
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Seed server
    pub profile: ServerProfile,
    /// User agent
    pub user_agent: String,
    /// Handshake proposal, highest preference first, at most four
    pub protocol_versions: Vec<BoltVersion>,
    /// Per-server pool settings
    pub pool: PoolConfig,
    /// Socket connect plus TLS timeout
    pub connect_timeout: Duration,
    /// Overall deadline for one acquire, across retries
    pub acquire_timeout: Duration,
    /// Acquire attempts before giving up; never below [`MIN_ACQUIRE_ATTEMPTS`]
    pub max_acquire_attempts: usize,
    /// First backoff delay between attempts
    pub retry_delay: Duration,
    /// TCP keep-alive
    pub keep_alive: bool,
    /// Route through a cluster routing table
    pub routing: bool,
    /// How a server is picked among a table's readers or writers
    pub routing_policy: RoutingPolicy,
    /// Extra routing context for the routing procedure and v4.1 HELLO
    pub routing_context: ValueMap,
}

impl ConnectorConfig {
    /// Defaults for `profile`; routing follows its scheme.
    pub fn new(profile: ServerProfile) -> Self {
        Self {
            routing: profile.routing(),
            profile,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            protocol_versions: BoltVersion::DEFAULT_PROPOSAL.to_vec(),
            pool: PoolConfig::default(),
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(60),
            max_acquire_attempts: MIN_ACQUIRE_ATTEMPTS,
            retry_delay: Duration::from_millis(100),
            keep_alive: true,
            routing_policy: RoutingPolicy::default(),
            routing_context: ValueMap::new(),
        }
    }

    /// Parse `uri` and start a builder.
    pub fn builder(uri: &str) -> DriverResult<ConnectorConfigBuilder> {
        Ok(ConnectorConfigBuilder {
            config: Self::new(ServerProfile::parse(uri)?),
        })
    }

    /// Attempts actually made by the acquire loop.
    pub fn acquire_attempts(&self) -> usize {
        self.max_acquire_attempts.max(MIN_ACQUIRE_ATTEMPTS)
    }

    /// Routing context as sent to the server: `address` plus user entries.
    pub fn routing_context_for(&self, profile: &ServerProfile) -> ValueMap {
        let mut context = self.routing_context.clone();
        context.insert("address".into(), Value::from(profile.address()));
        context
    }

    /// Reject settings that cannot work.
    pub fn validate(&self) -> DriverResult<()> {
        if self.protocol_versions.is_empty() || self.protocol_versions.len() > 4 {
            return Err(DriverError::configuration(format!(
                "Between one and four protocol versions may be proposed, got {}",
                self.protocol_versions.len()
            )));
        }
        if self.pool.max_size == 0 {
            return Err(DriverError::configuration("Pool max_size must be at least 1"));
        }
        if self.pool.init_size > self.pool.max_size {
            return Err(DriverError::configuration(format!(
                "Pool init_size {} exceeds max_size {}",
                self.pool.init_size, self.pool.max_size
            )));
        }
        Ok(())
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::new(ServerProfile::default())
    }
}

// ============================================================================
// ConnectorConfigBuilder
// ============================================================================

/// Connector configuration builder.
pub struct ConnectorConfigBuilder {
    config: ConnectorConfig,
}

impl ConnectorConfigBuilder {
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.config.profile = self.config.profile.with_user(user).with_password(password);
        self
    }

    pub fn with_protocol_versions(mut self, versions: &[BoltVersion]) -> Self {
        self.config.protocol_versions = versions.to_vec();
        self
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.config.pool.max_size = size;
        self
    }

    pub fn with_init_pool_size(mut self, size: usize) -> Self {
        self.config.pool.init_size = size;
        self
    }

    pub fn with_max_connection_age(mut self, age: Duration) -> Self {
        self.config.pool.max_age = age;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    pub fn with_max_acquire_attempts(mut self, attempts: usize) -> Self {
        self.config.max_acquire_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn with_routing(mut self, routing: bool) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing_policy = policy;
        self
    }

    pub fn with_routing_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.routing_context.insert(key.into(), value.into());
        self
    }

    /// Validate and finish.
    pub fn build(self) -> DriverResult<ConnectorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

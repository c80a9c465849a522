//! Routing table
//!
//! Which servers route, read and write for one database, and until when
//! that is known to hold.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::driver::connection::RoutingInfo;
use crate::driver::profile::ServerProfile;

/// Role of a server in a routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// Serves routing tables
    Route,
    /// Accepts writes (leader)
    Write,
    /// Accepts reads (follower or replica)
    Read,
}

impl ServerRole {
    /// Parse a role name as the routing procedure reports it. Case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

/// Routing table for one database.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Database; `None` is the server default
    pub database: Option<String>,
    pub routers: Vec<ServerProfile>,
    pub readers: Vec<ServerProfile>,
    pub writers: Vec<ServerProfile>,
    expires_at: Instant,
}

impl RoutingTable {
    /// Table from a routing procedure answer.
    ///
    /// Addresses become profiles sharing `template`'s scheme, security and
    /// credentials. Unparseable addresses are skipped.
    pub fn from_info(database: Option<String>, info: &RoutingInfo, template: &ServerProfile) -> Self {
        let profiles = |addresses: &[String]| {
            let mut out: Vec<ServerProfile> = Vec::new();
            for address in addresses {
                match template.with_address(address) {
                    Ok(profile) if !out.contains(&profile) => out.push(profile),
                    Ok(_) => {}
                    Err(e) => warn!(address = %address, error = %e, "skipping routing table entry"),
                }
            }
            out
        };
        Self {
            database,
            routers: profiles(&info.routers[..]),
            readers: profiles(&info.readers[..]),
            writers: profiles(&info.writers[..]),
            expires_at: Instant::now() + info.ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Force a refresh on next use, keeping the known routers.
    pub fn expire(&mut self) {
        self.expires_at = Instant::now();
    }

    /// Time left before expiry.
    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Unexpired, with routers and with servers for the requested mode.
    pub fn is_fresh(&self, readonly: bool) -> bool {
        !self.is_expired() && !self.routers.is_empty() && !self.servers(readonly).is_empty()
    }

    /// Readers when `readonly`, writers otherwise.
    pub fn servers(&self, readonly: bool) -> &[ServerProfile] {
        if readonly {
            &self.readers
        } else {
            &self.writers
        }
    }

    pub fn contains(&self, profile: &ServerProfile) -> bool {
        self.routers.contains(profile) || self.readers.contains(profile) || self.writers.contains(profile)
    }

    /// Every server in the table, each once.
    pub fn all_servers(&self) -> Vec<ServerProfile> {
        let mut out: Vec<ServerProfile> = Vec::new();
        for profile in self.routers.iter().chain(&self.readers).chain(&self.writers) {
            if !out.contains(profile) {
                out.push(profile.clone());
            }
        }
        out
    }

    /// Stop using `profile` for reads and writes. It stays a router
    /// candidate until the next refresh.
    pub fn deactivate(&mut self, profile: &ServerProfile) {
        self.readers.retain(|p| p != profile);
        self.writers.retain(|p| p != profile);
    }

    /// Stop writing to `profile`, a leader that stepped down.
    pub fn remove_writer(&mut self, profile: &ServerProfile) {
        self.writers.retain(|p| p != profile);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::routing_info;

    fn template() -> ServerProfile {
        ServerProfile::parse("neo4j://seed:7687").unwrap()
    }

    fn addresses(profiles: &[ServerProfile]) -> Vec<String> {
        profiles.iter().map(ServerProfile::address).collect()
    }

    #[test]
    fn role_parsing() {
        assert_eq!(ServerRole::parse("ROUTE"), Some(ServerRole::Route));
        assert_eq!(ServerRole::parse("read"), Some(ServerRole::Read));
        assert_eq!(ServerRole::parse("Write"), Some(ServerRole::Write));
        assert_eq!(ServerRole::parse("LEADER"), None);
        assert_eq!(ServerRole::Write.as_str(), "WRITE");
    }

    #[tokio::test(start_paused = true)]
    async fn built_from_routing_info() {
        let info = routing_info(
            &["core1:7687", "core2:7687", "core1:7687"],
            &["replica1:7687"],
            &["core1:7687"],
            300,
        );
        let table = RoutingTable::from_info(Some("movies".into()), &info, &template());
        assert_eq!(addresses(&table.routers), vec!["core1:7687", "core2:7687"]);
        assert_eq!(addresses(table.servers(true)), vec!["replica1:7687"]);
        assert_eq!(addresses(table.servers(false)), vec!["core1:7687"]);
        assert!(table.routers.iter().all(ServerProfile::routing));
        assert_eq!(table.all_servers().len(), 3);
        assert!(table.is_fresh(true) && table.is_fresh(false));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(table.is_expired());
        assert!(!table.is_fresh(true));
    }

    #[tokio::test(start_paused = true)]
    async fn freshness_needs_servers_for_the_mode() {
        let info = routing_info(&["core1:7687"], &["replica1:7687"], &[], 60);
        let mut table = RoutingTable::from_info(None, &info, &template());
        assert!(table.is_fresh(true));
        assert!(!table.is_fresh(false));

        table.expire();
        assert_eq!(table.ttl(), Duration::ZERO);
        assert!(!table.is_fresh(true));
    }

    #[tokio::test(start_paused = true)]
    async fn deactivated_servers_stay_routers() {
        let info = routing_info(&["core1:7687"], &["core1:7687"], &["core1:7687"], 60);
        let mut table = RoutingTable::from_info(None, &info, &template());
        let core1 = table.routers[0].clone();
        table.deactivate(&core1);
        assert!(table.readers.is_empty() && table.writers.is_empty());
        assert!(table.contains(&core1));
        assert!(!table.is_fresh(true));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_table_keeps_routers() {
        let info = routing_info(&["core1:7687", "core2:7687"], &["core2:7687"], &["core1:7687"], 300);
        let mut table = RoutingTable::from_info(None, &info, &template());
        table.expire();
        assert!(table.is_expired());
        assert_eq!(table.routers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_writer_stays_a_reader() {
        let info = routing_info(&["core1:7687"], &["core1:7687", "core2:7687"], &["core1:7687"], 300);
        let mut table = RoutingTable::from_info(None, &info, &template());
        let core1 = table.writers[0].clone();
        table.remove_writer(&core1);
        assert!(table.writers.is_empty());
        assert_eq!(table.readers.len(), 2);
        assert!(table.is_fresh(true));
        assert!(!table.is_fresh(false));
    }
}

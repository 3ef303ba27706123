//! In-memory server directory
//!
//! One record per registered remote address. The directory is owned and
//! mutated only by the event-loop task; concurrency control is by
//! confinement, not locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Metadata retained from a server's last successful query response.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMetadata {
    pub version: String,
    pub max_players: u8,
    pub name: String,
    pub address: String,
    pub port: u16,
}

#[derive(Serialize)]
struct MetadataJson<'a> {
    address: &'a str,
    port: u16,
    age: u64,
    name: &'a str,
    version: &'a str,
    max_players: u8,
}

impl ServerMetadata {
    /// JSON object sent in GET_METADATA responses, with the record's age
    /// in seconds filled in.
    pub fn to_json(&self, age_secs: u64) -> String {
        let json = MetadataJson {
            address: &self.address,
            port: self.port,
            age: age_secs,
            name: &self.name,
            version: &self.version,
            max_players: self.max_players,
        };
        serde_json::to_string(&json).expect("metadata serializes")
    }
}

/// One registered game server.
#[derive(Debug, Clone)]
pub struct ServerRecord {
    pub addr: SocketAddr,
    /// When the server first registered
    pub add_time: Instant,
    /// When the server last sent an ADD
    pub refresh_time: Instant,
    /// True once the server answered a query from the verification socket
    pub verified: bool,
    /// Set when direct verification failed and the server is presumed to be
    /// behind NAT; such servers are contacted via hole-punch forwards
    pub needs_hole_punch: bool,
    pub metadata: Option<ServerMetadata>,
    pub metadata_time: Option<Instant>,
}

impl ServerRecord {
    fn new(addr: SocketAddr, now: Instant) -> ServerRecord {
        ServerRecord {
            addr,
            add_time: now,
            refresh_time: now,
            verified: false,
            needs_hole_punch: false,
            metadata: None,
            metadata_time: None,
        }
    }

    /// Seconds since the server first registered.
    pub fn age_secs(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.add_time).as_secs()
    }

    /// Whether the cached metadata is older than `refresh_after`.
    /// Missing metadata counts as stale.
    pub fn metadata_stale(&self, now: Instant, refresh_after: Duration) -> bool {
        match self.metadata_time {
            Some(t) => now.saturating_duration_since(t) > refresh_after,
            None => true,
        }
    }
}

/// Directory of known servers, keyed by remote address.
#[derive(Debug, Default)]
pub struct ServerDirectory {
    servers: HashMap<SocketAddr, ServerRecord>,
}

impl ServerDirectory {
    pub fn new() -> ServerDirectory {
        ServerDirectory::default()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn contains(&self, addr: SocketAddr) -> bool {
        self.servers.contains_key(&addr)
    }

    pub fn get(&self, addr: SocketAddr) -> Option<&ServerRecord> {
        self.servers.get(&addr)
    }

    pub fn get_mut(&mut self, addr: SocketAddr) -> Option<&mut ServerRecord> {
        self.servers.get_mut(&addr)
    }

    /// Create a record for a new address, or bump the refresh time of a
    /// known one. Returns the record.
    pub fn upsert(&mut self, addr: SocketAddr, now: Instant) -> &mut ServerRecord {
        let record = self
            .servers
            .entry(addr)
            .or_insert_with(|| ServerRecord::new(addr, now));
        record.refresh_time = now;
        record
    }

    pub fn remove(&mut self, addr: SocketAddr) -> Option<ServerRecord> {
        self.servers.remove(&addr)
    }

    /// Addresses of every record, for the aging sweep.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        self.servers.keys().copied().collect()
    }

    /// Records currently visible to clients.
    pub fn verified_snapshot(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values().filter(|r| r.verified)
    }

    pub fn all_snapshot(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_upsert_creates_then_refreshes() {
        let mut directory = ServerDirectory::new();
        let a = addr("203.0.113.5:2342");
        let t0 = Instant::now();

        let record = directory.upsert(a, t0);
        assert_eq!(record.add_time, t0);
        assert_eq!(record.refresh_time, t0);
        assert!(!record.verified);

        let t1 = t0 + Duration::from_secs(30);
        let record = directory.upsert(a, t1);
        assert_eq!(record.add_time, t0);
        assert_eq!(record.refresh_time, t1);
        assert!(record.add_time <= record.refresh_time);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn test_verified_snapshot_filters() {
        let mut directory = ServerDirectory::new();
        let now = Instant::now();
        directory.upsert(addr("203.0.113.5:2342"), now);
        directory.upsert(addr("203.0.113.6:2342"), now).verified = true;

        let visible: Vec<_> = directory.verified_snapshot().map(|r| r.addr).collect();
        assert_eq!(visible, vec![addr("203.0.113.6:2342")]);
        assert_eq!(directory.all_snapshot().count(), 2);
    }

    #[test]
    fn test_metadata_staleness() {
        let mut directory = ServerDirectory::new();
        let a = addr("203.0.113.5:2342");
        let t0 = Instant::now();
        let record = directory.upsert(a, t0);

        // No metadata yet: always stale.
        assert!(record.metadata_stale(t0, Duration::from_secs(60)));

        record.metadata_time = Some(t0);
        assert!(!record.metadata_stale(t0 + Duration::from_secs(60), Duration::from_secs(60)));
        assert!(record.metadata_stale(t0 + Duration::from_secs(61), Duration::from_secs(60)));
    }

    #[test]
    fn test_metadata_json() {
        let metadata = ServerMetadata {
            version: "Chocolate Doom 3.0.1".to_string(),
            max_players: 4,
            name: "Arena".to_string(),
            address: "203.0.113.5".to_string(),
            port: 2342,
        };
        let value: serde_json::Value = serde_json::from_str(&metadata.to_json(17)).unwrap();
        assert_eq!(value["address"], "203.0.113.5");
        assert_eq!(value["port"], 2342);
        assert_eq!(value["age"], 17);
        assert_eq!(value["name"], "Arena");
        assert_eq!(value["version"], "Chocolate Doom 3.0.1");
        assert_eq!(value["max_players"], 4);
    }
}

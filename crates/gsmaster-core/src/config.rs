//! Master configuration

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::banlist::BanList;
use crate::error::{MasterError, MasterResult};
use crate::signer::DemoSigner;

/// A listen endpoint: optional host plus port. An absent host binds the
/// wildcard address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenAddress {
    pub host: Option<String>,
    pub port: u16,
}

impl ListenAddress {
    /// Resolve to a concrete IPv4 bind address. Hostname resolution may
    /// block; it happens once at startup.
    pub fn to_bind_addr(&self) -> MasterResult<SocketAddr> {
        let host = self.host.as_deref().unwrap_or("0.0.0.0");
        (host, self.port)
            .to_socket_addrs()?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| MasterError::BindAddress(format!("{}:{}", host, self.port)))
    }
}

/// Master server configuration, loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Public socket servers and clients talk to
    pub server_address: ListenAddress,
    /// Independent socket used to prove server reachability. When absent,
    /// verification is disabled and no new registration can succeed.
    pub query_address: Option<ListenAddress>,
    /// Glob patterns blocking matching `host:port` registrants
    pub block_addresses: Vec<String>,
    /// Event log file, opened in append mode
    pub log_file: String,
    /// Seconds without a refresh before a server is dropped
    pub server_timeout_secs: u64,
    /// Seconds before cached metadata must be re-queried
    pub metadata_refresh_secs: u64,
    /// Hex-encoded Ed25519 seed for demo signing; absent disables signing
    pub signing_key: Option<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            server_address: ListenAddress {
                host: None,
                port: crate::DEFAULT_MASTER_PORT,
            },
            query_address: None,
            block_addresses: Vec::new(),
            log_file: "gsmaster.log".to_string(),
            server_timeout_secs: 2 * 60 * 60,
            metadata_refresh_secs: 6 * 60 * 60,
            signing_key: None,
        }
    }
}

impl MasterConfig {
    /// Load configuration from a TOML file.
    pub async fn load(path: &Path) -> MasterResult<Self> {
        let contents = tokio::fs::read_to_string(path).await?;
        toml::from_str(&contents).map_err(|e| MasterError::Config(e.to_string()))
    }

    /// Check the parts that would otherwise only fail mid-flight.
    pub fn validate(&self) -> MasterResult<()> {
        BanList::new(&self.block_addresses)?;
        if let Some(seed) = &self.signing_key {
            DemoSigner::from_hex_seed(seed)?;
        }
        if self.server_timeout_secs == 0 {
            return Err(MasterError::Config(
                "server_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_secs(self.server_timeout_secs)
    }

    pub fn metadata_refresh(&self) -> Duration {
        Duration::from_secs(self.metadata_refresh_secs)
    }
}

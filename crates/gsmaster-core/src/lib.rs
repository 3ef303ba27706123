//! gsmaster core
//!
//! Implements the master-server side of the game discovery protocol:
//! - Wire codec shared with existing game clients
//! - In-memory directory of registered game servers
//! - Two-socket reachability verification and NAT hole-punch brokering
//! - Signed demo start/end message issuance

pub mod banlist;
pub mod config;
pub mod directory;
pub mod error;
pub mod eventlog;
pub mod protocol;
pub mod server;
pub mod signer;

pub use banlist::BanList;
pub use config::{ListenAddress, MasterConfig};
pub use directory::{ServerDirectory, ServerMetadata, ServerRecord};
pub use error::{MasterError, MasterResult};
pub use eventlog::EventLog;
pub use server::MasterServer;
pub use signer::{DemoSigner, NONCE_SIZE};

/// Canonical port the master listens on.
pub const DEFAULT_MASTER_PORT: u16 = 2342;

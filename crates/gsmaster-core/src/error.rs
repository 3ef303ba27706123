//! Master error types

use thiserror::Error;

/// Errors surfaced by the master library.
///
/// These only occur at startup (bind, log file, configuration) or inside
/// the demo signer; per-datagram failures are logged and swallowed by the
/// event loop instead of being raised.
#[derive(Debug, Error)]
pub enum MasterError {
    /// IO error (socket bind, log file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Ban pattern that does not compile
    #[error("invalid ban pattern '{pattern}': {source}")]
    BanPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Bind address that does not resolve to an IPv4 endpoint
    #[error("cannot resolve bind address '{0}'")]
    BindAddress(String),

    /// Signing key that is not a hex-encoded 32-byte seed
    #[error("invalid signing key: {0}")]
    SigningKey(String),

    /// Nonce generation failure
    #[error("nonce generation failed: {0}")]
    Random(String),
}

/// Result type for master operations
pub type MasterResult<T> = Result<T, MasterError>;

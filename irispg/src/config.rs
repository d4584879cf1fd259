//! Configuration consumed by the core.
//!
//! Loading these from environment, CLI, or files is the embedding
//! application's job; the core only defines the shapes and defaults.
use std::time::Duration;

pub use crate::executor::PoolConfig;
pub use crate::sql::SchemaMapping;

/// How a connecting client proves who it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Accept any user without a credential exchange.
    Trust,
    /// PasswordMessage in the clear, compared to the configured secret.
    Cleartext,
    /// Full SCRAM-SHA-256 exchange.
    ScramSha256,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub method: AuthMethod,
    /// The shared secret cleartext and SCRAM verify against.
    pub password: Option<String>,
    /// The whole handshake, SCRAM round-trips included, must finish
    /// inside this window.
    pub handshake_timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            method: AuthMethod::Trust,
            password: None,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// TLS material locations; the listener's TLS acceptor is wired in by
/// the embedding application.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone)]
pub struct CopyConfig {
    pub batch_size: usize,
    pub max_line_len: usize,
    pub chunk_size: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::copy::DEFAULT_BATCH_SIZE,
            max_line_len: crate::copy::DEFAULT_MAX_LINE_LEN,
            chunk_size: crate::copy::DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Which executor implementation carries statements to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorKind {
    #[default]
    Network,
    Embedded,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    pub auth: AuthConfig,
    pub pool: PoolConfig,
    pub schema: SchemaMapping,
    pub copy: CopyConfig,
    pub executor: ExecutorKind,
    /// Catalog snapshot lifetime before backend metadata is re-read.
    pub catalog_ttl: Duration,
    /// Negate `VECTOR_DOT_PRODUCT` so `<#>` keeps pgvector ordering.
    pub negate_inner_product: bool,
    /// Reported `server_version`; modern clients gate features on it.
    pub server_version: String,
    /// Largest accepted frame; anything bigger is a protocol violation.
    pub max_frame_len: usize,
    /// How long shutdown waits for sessions to finish their request.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5432,
            tls: None,
            auth: AuthConfig::default(),
            pool: PoolConfig::default(),
            schema: SchemaMapping::default(),
            copy: CopyConfig::default(),
            executor: ExecutorKind::Network,
            catalog_ttl: Duration::from_secs(300),
            negate_inner_product: false,
            server_version: "16.3".into(),
            max_frame_len: crate::protocol::MAX_FRAME_LEN,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

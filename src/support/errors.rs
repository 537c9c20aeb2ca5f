//! Layered error types. Mirrors the error-kind taxonomy in the session/station
//! design: transport failures retry, protocol/schema failures reply with a
//! CallError, domain/state failures surface as a typed response status.

use thiserror::Error;

/// Failures from the duplex transport (C2 Session).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection refused")]
    ConnectRefused,
    #[error("TLS handshake failed: {0}")]
    TlsError(String),
    #[error("DNS resolution failed: {0}")]
    DnsError(String),
    #[error("session is not open")]
    NotOpen,
    #[error("outbound buffer exceeds backpressure limit")]
    Backpressure,
    #[error("session disconnected")]
    Disconnected,
    #[error("request {0} timed out")]
    Timeout(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Failures from filesystem-backed or cryptographic infrastructure
/// (configuration persistence, certificate storage).
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid PEM payload")]
    InvalidPem,
    #[error("lock poisoned for {0}")]
    LockPoisoned(String),
}

/// Top-level error surfaced to callers of the engine's public API (UI
/// control-plane handlers, supervisor wiring). HTTP maps this to a status
/// code; broadcast aggregation maps it to a per-station failure entry.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("station not found: {0}")]
    StationNotFound(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("operation rejected: {0}")]
    Rejected(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("rate limited")]
    RateLimited,
    #[error("internal error: {0}")]
    Internal(String),
}

impl SimError {
    /// HTTP status code the UI control-plane should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::RateLimited => 429,
            Self::StationNotFound(_) | Self::Validation(_) | Self::Rejected(_) => 400,
            Self::Transport(_) | Self::Infra(_) | Self::Internal(_) => 500,
        }
    }
}

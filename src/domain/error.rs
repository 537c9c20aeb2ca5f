//! Domain-level errors: state violations in the station/connector/config/auth
//! model. These never kill a session — handlers translate them into a typed
//! response status (§7 `State` error kind).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("connector {0} not found")]
    ConnectorNotFound(u32),
    #[error("connector {0} already has a transaction in progress")]
    TransactionAlreadyActive(u32),
    #[error("no active transaction on connector {0}")]
    NoActiveTransaction(u32),
    #[error("transaction id {0} does not match the active transaction")]
    TransactionIdMismatch(String),
    #[error("configuration key {0} is read-only")]
    ReadOnly(String),
    #[error("configuration key {0} not found")]
    UnknownKey(String),
    #[error("local list version must strictly increase (have {have}, got {got})")]
    VersionMismatch { have: u64, got: u64 },
    #[error("invalid state transition for connector {connector}: {from} -> {to}")]
    InvalidTransition {
        connector: u32,
        from: String,
        to: String,
    },
    #[error("identifier is invalid: {0}")]
    InvalidIdentifier(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

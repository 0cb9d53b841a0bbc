//! Common error types for Keeper components.

use std::fmt;

/// A specialized Result type for Keeper operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Keeper operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid contract: {0}")]
    ContractInvalid(String),

    #[error("Entity does not exist: {0}")]
    EntityDoesNotExist(String),

    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`], used by callers that translate
/// errors into protocol-level responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ContractInvalid,
    EntityDoesNotExist,
    DuplicateName,
    ServerError,
}

impl Error {
    /// Create a new contract validation error.
    pub fn contract_invalid(msg: impl fmt::Display) -> Self {
        Error::ContractInvalid(msg.to_string())
    }

    /// Create a new not-found error.
    pub fn entity_does_not_exist(msg: impl fmt::Display) -> Self {
        Error::EntityDoesNotExist(msg.to_string())
    }

    /// Create a new duplicate-name error.
    pub fn duplicate_name(msg: impl fmt::Display) -> Self {
        Error::DuplicateName(msg.to_string())
    }

    /// Create a new storage error.
    pub fn storage(msg: impl fmt::Display) -> Self {
        Error::Storage(msg.to_string())
    }

    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ContractInvalid(_) => ErrorKind::ContractInvalid,
            Error::EntityDoesNotExist(_) => ErrorKind::EntityDoesNotExist,
            Error::DuplicateName(_) => ErrorKind::DuplicateName,
            Error::Storage(_) | Error::Config(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorKind::ServerError
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::EntityDoesNotExist
    }
}

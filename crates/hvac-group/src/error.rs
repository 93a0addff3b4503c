//! Error types for the HVAC group engine

use hvac_service_registry::ServiceError;
use thiserror::Error;

/// Result type for group and actuator operations
pub type HvacGroupResult<T> = Result<T, HvacGroupError>;

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Misuse of the transaction buffer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction is already in progress")]
    AlreadyInProgress,

    #[error("transaction has not begun, cannot {op}")]
    NotInProgress { op: &'static str },
}

/// Errors surfaced by the group engine to its caller
#[derive(Debug, Clone, Error)]
pub enum HvacGroupError {
    /// A scalar temperature and a target range were supplied together
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// A remote command failed on a single-actuator commit
    #[error("command failed: {0}")]
    Command(#[from] ServiceError),
}

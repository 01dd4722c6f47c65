pub mod account_service;
pub mod transaction_service;

pub use account_service::AccountService;
pub use transaction_service::{SeriesDeletion, TransactionService};

use uuid::Uuid;

use crate::errors::LedgerError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures returned by the use-case layer. Everything except a broken recurrence
/// invariant is an ordinary business outcome the caller is expected to handle.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: Uuid },
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Transaction already accomplished: {0}")]
    AlreadyAccomplished(Uuid),
    #[error("Forbidden action: {0}")]
    Forbidden(String),
}

impl ServiceError {
    pub fn transaction_not_found(id: Uuid) -> Self {
        ServiceError::NotFound {
            resource: "Transaction",
            id,
        }
    }

    pub fn bank_account_not_found(id: Uuid) -> Self {
        ServiceError::NotFound {
            resource: "Bank account",
            id,
        }
    }

    /// True for failures that signal broken engine invariants rather than bad input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Ledger(err) if err.is_fatal())
    }
}

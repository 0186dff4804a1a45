use thiserror::Error;

use crate::{model::AccountId, rates::RatesError, storage::StorageError};

pub type Result<T> = std::result::Result<T, BankError>;

/// Infrastructure failures surfaced at the worker's public boundary.
/// Business denials and refund precondition errors are not errors at this
/// level; they travel inside the per-operation outcome values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BankError {
    #[error("storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Rates(#[from] RatesError),

    #[error("account worker for {0} is unavailable")]
    WorkerUnavailable(AccountId),

    /// A cross-account leg failed after the local debit was already durable.
    /// The debit stands; there is no rollback.
    #[error("transfer to account {recipient} failed: {reason}")]
    RecipientFailed { recipient: AccountId, reason: String },

    #[error("timed out waiting for account {0}")]
    RecipientTimeout(AccountId),
}

//! Multi-currency banking account engine.
//!
//! One worker task per account serializes every operation for that account;
//! cross-account transfers are worker-to-worker calls; every accepted
//! mutation is written through a key-sharded storage pool before the caller
//! observes the result.

pub mod account;
pub mod bank;
pub mod config;
pub mod error;
pub mod model;
pub mod rates;
pub mod registry;
pub mod storage;
pub mod worker;

pub use account::{Account, Operation, OperationKind, OperationStatus, RefunderError};
pub use bank::Bank;
pub use config::BankConfig;
pub use error::BankError;
pub use model::{
    AccountId, Amount, CardId, Currency, Envelope, InitialArgs, OperationId, SplitRecipient,
};
pub use rates::{Conversion, RatesError, RatesTable};
pub use registry::{AccountClient, AccountRegistry};
pub use storage::{StorageError, StoragePool, ACCOUNTS_FOLDER, EXCHANGE_FOLDER};
pub use worker::{
    ExchangeOutcome, FundsOutcome, RefundOutcome, SplitTransferOutcome, TransferOutcome,
};

#[cfg(test)]
use rstest_reuse;

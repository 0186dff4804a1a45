use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    config::BankConfig,
    model::{AccountId, InitialArgs},
    rates::RatesTable,
    registry::{AccountClient, AccountRegistry},
    storage::StoragePool,
};

/// The engine entry point. `start` brings up the rates ticker, the storage
/// pool and the account registry, and the bank then hands out per-account
/// clients.
pub struct Bank {
    registry: AccountRegistry,
    rates: RatesTable,
    storage: StoragePool,
    refresher: JoinHandle<()>,
}

impl Bank {
    /// Must be called from within a tokio runtime. The storage pool is
    /// constructed first because the refresh ticker persists its snapshots
    /// through it.
    pub fn start(config: BankConfig) -> Bank {
        let config = Arc::new(config);
        let rates = RatesTable::new(config.rates.seed_table.clone());
        let storage = StoragePool::start(&config.storage);
        let refresher = rates.spawn_refresher(
            storage.clone(),
            config.rates.seed_table.clone(),
            config.rates.refresh_interval(),
        );
        let registry = AccountRegistry::new(storage.clone(), rates.clone(), Arc::clone(&config));
        tracing::info!(
            workers = config.storage.workers,
            base_folder = %config.storage.base_folder.display(),
            "bank started"
        );
        Bank {
            registry,
            rates,
            storage,
            refresher,
        }
    }

    /// A client for the account, created on first use with the configured
    /// defaults.
    pub fn account(&self, account_id: AccountId) -> AccountClient {
        self.registry.client(account_id)
    }

    /// Like [`Bank::account`], carrying creation arguments honored only if
    /// this id has never been stored before.
    pub fn account_with(&self, account_id: AccountId, initial_args: InitialArgs) -> AccountClient {
        self.registry.client_with(account_id, initial_args)
    }

    pub fn rates(&self) -> &RatesTable {
        &self.rates
    }

    pub fn storage(&self) -> &StoragePool {
        &self.storage
    }
}

impl Drop for Bank {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

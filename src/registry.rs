use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::{
    account::Operation,
    config::BankConfig,
    error::BankError,
    model::{AccountId, Amount, CardId, Currency, Envelope, InitialArgs, OperationId, SplitRecipient},
    rates::RatesTable,
    storage::StoragePool,
    worker::{
        self, Command, ExchangeOutcome, FundsOutcome, RefundOutcome, SplitTransferOutcome,
        TransferOutcome,
    },
};

const WORKER_INBOX_DEPTH: usize = 256;

/// Handle to a live account worker. The generation tag ties a registration
/// to the worker that owns it, so a shutting-down worker never evicts its
/// replacement.
#[derive(Clone)]
pub(crate) struct WorkerHandle {
    pub(crate) sender: mpsc::Sender<Command>,
    pub(crate) generation: u64,
}

/// The account id -> live worker map. Looks up or lazily spawns the worker
/// for an account; used by external callers and by a worker carrying out a
/// cross-account transfer.
#[derive(Clone)]
pub struct AccountRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    workers: DashMap<AccountId, WorkerHandle>,
    generations: AtomicU64,
    storage: StoragePool,
    rates: RatesTable,
    config: Arc<BankConfig>,
}

impl AccountRegistry {
    pub(crate) fn new(
        storage: StoragePool,
        rates: RatesTable,
        config: Arc<BankConfig>,
    ) -> AccountRegistry {
        AccountRegistry {
            inner: Arc::new(RegistryInner {
                workers: DashMap::new(),
                generations: AtomicU64::new(0),
                storage,
                rates,
                config,
            }),
        }
    }

    /// The live handle for the account, spawning a worker first if none is
    /// registered. The spawn-and-register step is atomic: concurrent callers
    /// for the same id converge on one handle. `initial_args` only matter
    /// when this call ends up creating the account.
    pub(crate) fn server_process(
        &self,
        account_id: AccountId,
        initial_args: &InitialArgs,
    ) -> WorkerHandle {
        self.inner
            .workers
            .entry(account_id)
            .or_insert_with(|| self.spawn(account_id, initial_args.clone()))
            .clone()
    }

    fn spawn(&self, account_id: AccountId, initial_args: InitialArgs) -> WorkerHandle {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let (sender, inbox) = mpsc::channel(WORKER_INBOX_DEPTH);
        worker::spawn(account_id, generation, inbox, self.clone(), initial_args);
        tracing::debug!(account_id, generation, "account worker spawned");
        WorkerHandle { sender, generation }
    }

    /// Removes the registration left by a terminating worker, but only if it
    /// still belongs to that worker's generation.
    pub(crate) fn deregister(&self, account_id: AccountId, generation: u64) {
        self.inner
            .workers
            .remove_if(&account_id, |_, handle| handle.generation == generation);
    }

    /// Routes one command to the account's worker. A handle that raced an
    /// idle shutdown hands the command back; the stale registration is
    /// dropped and the send retried against a fresh worker.
    pub(crate) async fn send(
        &self,
        account_id: AccountId,
        initial_args: &InitialArgs,
        command: Command,
    ) -> Result<(), BankError> {
        let mut command = command;
        for _ in 0..2 {
            let handle = self.server_process(account_id, initial_args);
            match handle.sender.send(command).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(rejected)) => {
                    command = rejected;
                    self.deregister(account_id, handle.generation);
                }
            }
        }
        Err(BankError::WorkerUnavailable(account_id))
    }

    pub(crate) fn client(&self, account_id: AccountId) -> AccountClient {
        self.client_with(account_id, InitialArgs::default())
    }

    pub(crate) fn client_with(
        &self,
        account_id: AccountId,
        initial_args: InitialArgs,
    ) -> AccountClient {
        AccountClient {
            registry: self.clone(),
            account_id,
            initial_args,
        }
    }

    pub(crate) fn storage(&self) -> &StoragePool {
        &self.inner.storage
    }

    pub(crate) fn rates(&self) -> &RatesTable {
        &self.inner.rates
    }

    pub(crate) fn account_defaults(&self) -> (&str, Amount) {
        (
            &self.inner.config.account.default_currency,
            self.inner.config.account.default_limit,
        )
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.inner.config.actor.idle_timeout()
    }
}

/// Caller-facing handle for one account. Every call routes through the
/// account's worker; the reply reflects state after persistence succeeded.
#[derive(Clone)]
pub struct AccountClient {
    registry: AccountRegistry,
    account_id: AccountId,
    initial_args: InitialArgs,
}

impl AccountClient {
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, BankError>>) -> Command,
    ) -> Result<T, BankError> {
        let (reply, response) = oneshot::channel();
        self.registry
            .send(self.account_id, &self.initial_args, command(reply))
            .await?;
        response
            .await
            .map_err(|_| BankError::WorkerUnavailable(self.account_id))?
    }

    pub async fn deposit(
        &self,
        amount: Amount,
        currency: &str,
        envelope: Envelope,
    ) -> Result<FundsOutcome, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::Deposit {
            amount,
            currency,
            envelope,
            reply,
        })
        .await
    }

    pub async fn withdraw(
        &self,
        amount: Amount,
        currency: &str,
        envelope: Envelope,
    ) -> Result<FundsOutcome, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::Withdraw {
            amount,
            currency,
            envelope,
            reply,
        })
        .await
    }

    pub async fn card_transaction(
        &self,
        amount: Amount,
        currency: &str,
        card_id: CardId,
        envelope: Envelope,
    ) -> Result<FundsOutcome, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::CardTransaction {
            amount,
            currency,
            card_id,
            envelope,
            reply,
        })
        .await
    }

    pub async fn transfer_out(
        &self,
        amount: Amount,
        currency: &str,
        recipient_account_id: AccountId,
        envelope: Envelope,
    ) -> Result<TransferOutcome, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::TransferOut {
            amount,
            currency,
            recipient_account_id,
            envelope,
            reply,
        })
        .await
    }

    pub async fn transfer_out_split(
        &self,
        amount: Amount,
        currency: &str,
        recipients: Vec<SplitRecipient>,
        envelope: Envelope,
    ) -> Result<SplitTransferOutcome, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::TransferOutSplit {
            amount,
            currency,
            recipients,
            envelope,
            reply,
        })
        .await
    }

    pub async fn transfer_in(
        &self,
        amount: Amount,
        currency: &str,
        sender_account_id: AccountId,
        envelope: Envelope,
    ) -> Result<FundsOutcome, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::TransferIn {
            amount,
            currency,
            sender_account_id,
            envelope,
            reply,
        })
        .await
    }

    pub async fn refund(
        &self,
        operation_to_refund_id: OperationId,
        envelope: Envelope,
    ) -> Result<RefundOutcome, BankError> {
        self.call(|reply| Command::Refund {
            operation_to_refund_id,
            envelope,
            reply,
        })
        .await
    }

    pub async fn exchange(
        &self,
        current_amount: Amount,
        current_currency: &str,
        new_currency: &str,
        envelope: Envelope,
    ) -> Result<ExchangeOutcome, BankError> {
        let current_currency = current_currency.to_string();
        let new_currency = new_currency.to_string();
        self.call(|reply| Command::Exchange {
            current_amount,
            current_currency,
            new_currency,
            envelope,
            reply,
        })
        .await
    }

    pub async fn balance(&self, currency: &str) -> Result<Amount, BankError> {
        let currency = currency.to_string();
        self.call(|reply| Command::Balance { currency, reply }).await
    }

    pub async fn balances(&self) -> Result<BTreeMap<Currency, Amount>, BankError> {
        self.call(|reply| Command::Balances { reply }).await
    }

    pub async fn operation(
        &self,
        operation_id: OperationId,
    ) -> Result<Option<Operation>, BankError> {
        self.call(|reply| Command::Operation {
            operation_id,
            reply,
        })
        .await
    }

    pub async fn operations_on(&self, date: NaiveDate) -> Result<Vec<Operation>, BankError> {
        self.operations_between(date, date).await
    }

    pub async fn operations_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Operation>, BankError> {
        self.call(|reply| Command::Operations { from, to, reply })
            .await
    }
}

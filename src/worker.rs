use std::collections::BTreeMap;

use chrono::NaiveDate;
use tokio::sync::{mpsc, oneshot};

use crate::{
    account::{Account, Debited, Operation, SimpleAccountTransactor, SplitDebited},
    error::BankError,
    model::{AccountId, Amount, CardId, Currency, Envelope, InitialArgs, OperationId, SplitRecipient},
    registry::AccountRegistry,
    storage::ACCOUNTS_FOLDER,
};

type Reply<T> = oneshot::Sender<Result<T, BankError>>;

/// Outcome of deposit / withdraw / card_transaction / transfer_in: the
/// post-persistence balance for the currency plus the recorded operation.
#[derive(Debug, PartialEq, Clone)]
pub enum FundsOutcome {
    Done {
        balance: Amount,
        operation: Operation,
    },
    Denied {
        reason: String,
        balance: Amount,
        operation: Operation,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub enum TransferOutcome {
    Done {
        balance: Amount,
        operation: Operation,
        recipient_operation: Operation,
    },
    Denied {
        reason: String,
        balance: Amount,
        operation: Operation,
    },
}

/// Recipient operations come back in the order the recipients were supplied.
#[derive(Debug, PartialEq, Clone)]
pub enum SplitTransferOutcome {
    Done {
        balance: Amount,
        operations: Vec<Operation>,
        recipient_operations: Vec<Operation>,
    },
    Denied {
        reason: String,
        balance: Amount,
        operation: Operation,
    },
}

/// A refund precondition failure registers nothing; it comes back as the
/// `Error` variant rather than an infrastructure error.
#[derive(Debug, PartialEq, Clone)]
pub enum RefundOutcome {
    Done {
        balances: BTreeMap<Currency, Amount>,
        operation: Operation,
    },
    Error {
        reason: String,
        balances: BTreeMap<Currency, Amount>,
    },
}

/// Balances cover the two currencies involved in the swap.
#[derive(Debug, PartialEq, Clone)]
pub enum ExchangeOutcome {
    Done {
        balances: BTreeMap<Currency, Amount>,
        operation: Operation,
    },
    Denied {
        reason: String,
        balances: BTreeMap<Currency, Amount>,
        operation: Operation,
    },
}

pub(crate) enum Command {
    Deposit {
        amount: Amount,
        currency: Currency,
        envelope: Envelope,
        reply: Reply<FundsOutcome>,
    },
    Withdraw {
        amount: Amount,
        currency: Currency,
        envelope: Envelope,
        reply: Reply<FundsOutcome>,
    },
    CardTransaction {
        amount: Amount,
        currency: Currency,
        card_id: CardId,
        envelope: Envelope,
        reply: Reply<FundsOutcome>,
    },
    TransferOut {
        amount: Amount,
        currency: Currency,
        recipient_account_id: AccountId,
        envelope: Envelope,
        reply: Reply<TransferOutcome>,
    },
    TransferOutSplit {
        amount: Amount,
        currency: Currency,
        recipients: Vec<SplitRecipient>,
        envelope: Envelope,
        reply: Reply<SplitTransferOutcome>,
    },
    TransferIn {
        amount: Amount,
        currency: Currency,
        sender_account_id: AccountId,
        envelope: Envelope,
        reply: Reply<FundsOutcome>,
    },
    Refund {
        operation_to_refund_id: OperationId,
        envelope: Envelope,
        reply: Reply<RefundOutcome>,
    },
    Exchange {
        current_amount: Amount,
        current_currency: Currency,
        new_currency: Currency,
        envelope: Envelope,
        reply: Reply<ExchangeOutcome>,
    },
    Balance {
        currency: Currency,
        reply: Reply<Amount>,
    },
    Balances {
        reply: Reply<BTreeMap<Currency, Amount>>,
    },
    Operation {
        operation_id: OperationId,
        reply: Reply<Option<Operation>>,
    },
    Operations {
        from: NaiveDate,
        to: NaiveDate,
        reply: Reply<Vec<Operation>>,
    },
}

pub(crate) fn spawn(
    account_id: AccountId,
    generation: u64,
    inbox: mpsc::Receiver<Command>,
    registry: AccountRegistry,
    initial_args: InitialArgs,
) {
    tokio::spawn(
        AccountWorker {
            account_id,
            generation,
            inbox,
            registry,
            initial_args,
            transactor: SimpleAccountTransactor::new(),
        }
        .run(),
    );
}

/// One worker task per account id. Owns the account value, serves its inbox
/// strictly in arrival order, and writes every accepted mutation through
/// storage before publishing the new state or replying.
struct AccountWorker {
    account_id: AccountId,
    generation: u64,
    inbox: mpsc::Receiver<Command>,
    registry: AccountRegistry,
    initial_args: InitialArgs,
    transactor: SimpleAccountTransactor,
}

impl AccountWorker {
    async fn run(mut self) {
        let mut account = match self.rehydrate().await {
            Ok(account) => account,
            Err(err) => {
                tracing::error!(
                    account_id = self.account_id,
                    error = %err,
                    "rehydration failed, refusing queued requests"
                );
                self.registry.deregister(self.account_id, self.generation);
                self.inbox.close();
                while let Some(command) = self.inbox.recv().await {
                    fail(command, err.clone());
                }
                return;
            }
        };

        let idle_timeout = self.registry.idle_timeout();
        loop {
            let command = tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = tokio::time::sleep(idle_timeout) => {
                    tracing::debug!(account_id = self.account_id, "idle timeout reached");
                    break;
                }
            };
            self.handle(&mut account, command).await;
        }

        // Deregister first so new callers spawn a replacement, then serve
        // whatever raced in against the old handle before exiting.
        self.registry.deregister(self.account_id, self.generation);
        self.inbox.close();
        while let Some(command) = self.inbox.recv().await {
            self.handle(&mut account, command).await;
        }
        tracing::debug!(account_id = self.account_id, "account worker stopped");
    }

    /// Adopts the stored account if one exists, otherwise opens a fresh one
    /// from the initial args and writes it through before serving anything.
    async fn rehydrate(&self) -> Result<Account, BankError> {
        let key = self.account_id.to_string();
        if let Some(account) = self
            .registry
            .storage()
            .get::<Account>(ACCOUNTS_FOLDER, &key)
            .await?
        {
            tracing::debug!(account_id = self.account_id, "account rehydrated");
            return Ok(account);
        }

        let (default_currency, default_limit) = self.registry.account_defaults();
        let account = Account::open(
            self.account_id,
            self.initial_args
                .default_currency
                .clone()
                .unwrap_or_else(|| default_currency.to_string()),
            self.initial_args.limit.unwrap_or(default_limit),
            self.initial_args.balances.clone().unwrap_or_default(),
        );
        self.registry
            .storage()
            .store_sync(ACCOUNTS_FOLDER, &key, &account)
            .await?;
        Ok(account)
    }

    async fn persist(&self, account: &Account) -> Result<(), BankError> {
        self.registry
            .storage()
            .store_sync(ACCOUNTS_FOLDER, &account.id().to_string(), account)
            .await?;
        Ok(())
    }

    async fn handle(&self, account: &mut Account, command: Command) {
        match command {
            Command::Deposit {
                amount,
                currency,
                envelope,
                reply,
            } => {
                let mut next = account.clone();
                let operation = self.transactor.deposit(&mut next, amount, &currency, &envelope);
                let _ = reply.send(
                    self.publish(account, next)
                        .await
                        .map(|account| FundsOutcome::Done {
                            balance: account.balance(&currency),
                            operation,
                        }),
                );
            }
            Command::TransferIn {
                amount,
                currency,
                sender_account_id,
                envelope,
                reply,
            } => {
                let mut next = account.clone();
                let operation = self.transactor.transfer_in(
                    &mut next,
                    amount,
                    &currency,
                    sender_account_id,
                    &envelope,
                );
                let _ = reply.send(
                    self.publish(account, next)
                        .await
                        .map(|account| FundsOutcome::Done {
                            balance: account.balance(&currency),
                            operation,
                        }),
                );
            }
            Command::Withdraw {
                amount,
                currency,
                envelope,
                reply,
            } => {
                let mut next = account.clone();
                let outcome = self.transactor.withdraw(&mut next, amount, &currency, &envelope);
                let _ = reply.send(self.publish_debit(account, next, &currency, outcome).await);
            }
            Command::CardTransaction {
                amount,
                currency,
                card_id,
                envelope,
                reply,
            } => {
                let mut next = account.clone();
                let outcome = self.transactor.card_transaction(
                    &mut next,
                    amount,
                    &currency,
                    card_id,
                    &envelope,
                );
                let _ = reply.send(self.publish_debit(account, next, &currency, outcome).await);
            }
            Command::TransferOut {
                amount,
                currency,
                recipient_account_id,
                envelope,
                reply,
            } => {
                self.transfer_out(account, amount, currency, recipient_account_id, envelope, reply)
                    .await;
            }
            Command::TransferOutSplit {
                amount,
                currency,
                recipients,
                envelope,
                reply,
            } => {
                self.transfer_out_split(account, amount, currency, recipients, envelope, reply)
                    .await;
            }
            Command::Refund {
                operation_to_refund_id,
                envelope,
                reply,
            } => {
                let mut next = account.clone();
                match self
                    .transactor
                    .refund(&mut next, operation_to_refund_id, &envelope)
                {
                    Ok(operation) => {
                        let _ = reply.send(self.publish(account, next).await.map(|account| {
                            RefundOutcome::Done {
                                balances: account.balances(),
                                operation,
                            }
                        }));
                    }
                    Err(err) => {
                        let _ = reply.send(Ok(RefundOutcome::Error {
                            reason: err.to_string(),
                            balances: account.balances(),
                        }));
                    }
                }
            }
            Command::Exchange {
                current_amount,
                current_currency,
                new_currency,
                envelope,
                reply,
            } => {
                let conversion = match self.registry.rates().convert(
                    current_amount,
                    &current_currency,
                    &new_currency,
                ) {
                    Ok(conversion) => conversion,
                    Err(err) => {
                        let _ = reply.send(Err(err.into()));
                        return;
                    }
                };
                let mut next = account.clone();
                let outcome = self.transactor.exchange(
                    &mut next,
                    current_amount,
                    &current_currency,
                    &new_currency,
                    conversion.amount,
                    conversion.rate,
                    &envelope,
                );
                let _ = reply.send(self.publish(account, next).await.map(|account| {
                    let balances = account.pair_balances(&current_currency, &new_currency);
                    match outcome {
                        Debited::Done(operation) => ExchangeOutcome::Done { balances, operation },
                        Debited::Denied { reason, operation } => ExchangeOutcome::Denied {
                            reason,
                            balances,
                            operation,
                        },
                    }
                }));
            }
            Command::Balance { currency, reply } => {
                let _ = reply.send(Ok(account.balance(&currency)));
            }
            Command::Balances { reply } => {
                let _ = reply.send(Ok(account.balances()));
            }
            Command::Operation {
                operation_id,
                reply,
            } => {
                let _ = reply.send(Ok(account.operation(operation_id).cloned()));
            }
            Command::Operations { from, to, reply } => {
                let _ = reply.send(Ok(account.operations_between(from, to)));
            }
        }
    }

    /// Write-through: the scratch copy only becomes the served state once the
    /// store succeeded. On failure the reply carries the error and the
    /// in-memory state stays where it was.
    async fn publish<'a>(
        &self,
        account: &'a mut Account,
        next: Account,
    ) -> Result<&'a Account, BankError> {
        self.persist(&next).await?;
        *account = next;
        Ok(account)
    }

    async fn publish_debit(
        &self,
        account: &mut Account,
        next: Account,
        currency: &str,
        outcome: Debited,
    ) -> Result<FundsOutcome, BankError> {
        let account = self.publish(account, next).await?;
        Ok(match outcome {
            Debited::Done(operation) => FundsOutcome::Done {
                balance: account.balance(currency),
                operation,
            },
            Debited::Denied { reason, operation } => FundsOutcome::Denied {
                reason,
                balance: account.balance(currency),
                operation,
            },
        })
    }

    /// Single transfer: debit and persist locally, then run the recipient
    /// leg from a short-lived task so this worker keeps serving. Two workers
    /// transferring to each other therefore cannot deadlock. The recipient
    /// leg failing after the local debit persisted is surfaced as an error
    /// without rollback.
    async fn transfer_out(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: Currency,
        recipient_account_id: AccountId,
        envelope: Envelope,
        reply: Reply<TransferOutcome>,
    ) {
        let mut next = account.clone();
        let outcome =
            self.transactor
                .transfer_out(&mut next, amount, &currency, recipient_account_id, &envelope);
        let account = match self.publish(account, next).await {
            Ok(account) => account,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let balance = account.balance(&currency);

        match outcome {
            Debited::Denied { reason, operation } => {
                let _ = reply.send(Ok(TransferOutcome::Denied {
                    reason,
                    balance,
                    operation,
                }));
            }
            Debited::Done(operation) => {
                let recipient = self.registry.client(recipient_account_id);
                let sender_account_id = self.account_id;
                let deadline = self.registry.idle_timeout();
                tokio::spawn(async move {
                    let leg = tokio::time::timeout(
                        deadline,
                        recipient.transfer_in(amount, &currency, sender_account_id, envelope),
                    )
                    .await;
                    let _ = reply.send(conclude_leg(leg, recipient_account_id).map(
                        |recipient_operation| TransferOutcome::Done {
                            balance,
                            operation,
                            recipient_operation,
                        },
                    ));
                });
            }
        }
    }

    /// Split transfer: debit the whole total and persist, then fan the
    /// recipient legs out in parallel and join them in supply order.
    async fn transfer_out_split(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: Currency,
        recipients: Vec<SplitRecipient>,
        envelope: Envelope,
        reply: Reply<SplitTransferOutcome>,
    ) {
        let mut next = account.clone();
        let outcome = self.transactor.transfer_out_split(
            &mut next,
            amount,
            &currency,
            &recipients,
            &envelope,
        );
        let account = match self.publish(account, next).await {
            Ok(account) => account,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let balance = account.balance(&currency);

        match outcome {
            SplitDebited::Denied { reason, operation } => {
                let _ = reply.send(Ok(SplitTransferOutcome::Denied {
                    reason,
                    balance,
                    operation,
                }));
            }
            SplitDebited::Done(operations) => {
                let registry = self.registry.clone();
                let sender_account_id = self.account_id;
                let deadline = self.registry.idle_timeout();
                tokio::spawn(async move {
                    let mut legs = Vec::with_capacity(recipients.len());
                    for (recipient, operation) in recipients.iter().zip(&operations) {
                        let client = registry.client(recipient.recipient_account_id);
                        let share = operation.amount().unwrap_or(0);
                        let currency = currency.clone();
                        let mut leg_envelope = envelope.clone();
                        for (key, value) in &recipient.meta {
                            leg_envelope.meta.insert(key.clone(), value.clone());
                        }
                        legs.push(tokio::spawn(async move {
                            tokio::time::timeout(
                                deadline,
                                client.transfer_in(share, &currency, sender_account_id, leg_envelope),
                            )
                            .await
                        }));
                    }

                    let mut recipient_operations = Vec::with_capacity(legs.len());
                    for (leg, recipient) in legs.into_iter().zip(&recipients) {
                        let concluded = match leg.await {
                            Ok(leg) => conclude_leg(leg, recipient.recipient_account_id),
                            Err(err) => Err(BankError::RecipientFailed {
                                recipient: recipient.recipient_account_id,
                                reason: err.to_string(),
                            }),
                        };
                        match concluded {
                            Ok(operation) => recipient_operations.push(operation),
                            Err(err) => {
                                let _ = reply.send(Err(err));
                                return;
                            }
                        }
                    }
                    let _ = reply.send(Ok(SplitTransferOutcome::Done {
                        balance,
                        operations,
                        recipient_operations,
                    }));
                });
            }
        }
    }
}

/// Maps one awaited recipient leg to its recorded operation or the typed
/// error the initiating caller sees.
fn conclude_leg(
    leg: Result<Result<FundsOutcome, BankError>, tokio::time::error::Elapsed>,
    recipient: AccountId,
) -> Result<Operation, BankError> {
    match leg {
        Ok(Ok(FundsOutcome::Done { operation, .. })) => Ok(operation),
        Ok(Ok(FundsOutcome::Denied { reason, .. })) => {
            Err(BankError::RecipientFailed { recipient, reason })
        }
        Ok(Err(err)) => {
            tracing::warn!(recipient, error = %err, "recipient leg failed after local debit");
            Err(BankError::RecipientFailed {
                recipient,
                reason: err.to_string(),
            })
        }
        Err(_) => Err(BankError::RecipientTimeout(recipient)),
    }
}

fn fail(command: Command, err: BankError) {
    match command {
        Command::Deposit { reply, .. } => drop(reply.send(Err(err))),
        Command::Withdraw { reply, .. } => drop(reply.send(Err(err))),
        Command::CardTransaction { reply, .. } => drop(reply.send(Err(err))),
        Command::TransferOut { reply, .. } => drop(reply.send(Err(err))),
        Command::TransferOutSplit { reply, .. } => drop(reply.send(Err(err))),
        Command::TransferIn { reply, .. } => drop(reply.send(Err(err))),
        Command::Refund { reply, .. } => drop(reply.send(Err(err))),
        Command::Exchange { reply, .. } => drop(reply.send(Err(err))),
        Command::Balance { reply, .. } => drop(reply.send(Err(err))),
        Command::Balances { reply, .. } => drop(reply.send(Err(err))),
        Command::Operation { reply, .. } => drop(reply.send(Err(err))),
        Command::Operations { reply, .. } => drop(reply.send(Err(err))),
    }
}

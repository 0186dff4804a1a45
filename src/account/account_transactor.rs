use rust_decimal::Decimal;

use crate::{
    account::Account,
    model::{AccountId, Amount, CardId, Envelope, OperationId, SplitRecipient},
};

use super::{
    operation::Operation,
    transactors::{
        depositor::{Depositor, SimpleDepositor},
        exchanger::{Exchanger, SimpleExchanger},
        refunder::{Refunder, RefunderError, SimpleRefunder},
        transferrer::{SimpleTransferrer, Transferrer},
        withdrawer::{SimpleWithdrawer, Withdrawer},
    },
};

/// Outcome of a debit-shaped transaction. A denial leaves the balances
/// untouched but still registers the attempt on the ledger.
#[derive(Debug, PartialEq, Clone)]
pub enum Debited {
    Done(Operation),
    Denied { reason: String, operation: Operation },
}

/// Outcome of a split transfer: one operation per recipient on success, a
/// single denied operation otherwise.
#[derive(Debug, PartialEq, Clone)]
pub enum SplitDebited {
    Done(Vec<Operation>),
    Denied { reason: String, operation: Operation },
}

/// Applies typed requests to an account by delegating to one transactor per
/// operation family.
pub struct SimpleAccountTransactor {
    depositor: Box<dyn Depositor + Send + Sync>,
    withdrawer: Box<dyn Withdrawer + Send + Sync>,
    transferrer: Box<dyn Transferrer + Send + Sync>,
    refunder: Box<dyn Refunder + Send + Sync>,
    exchanger: Box<dyn Exchanger + Send + Sync>,
}

impl SimpleAccountTransactor {
    pub fn new() -> Self {
        Self {
            depositor: Box::new(SimpleDepositor),
            withdrawer: Box::new(SimpleWithdrawer),
            transferrer: Box::new(SimpleTransferrer),
            refunder: Box::new(SimpleRefunder),
            exchanger: Box::new(SimpleExchanger),
        }
    }

    pub fn deposit(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        envelope: &Envelope,
    ) -> Operation {
        self.depositor.deposit(account, amount, currency, envelope)
    }

    pub fn transfer_in(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        sender_account_id: AccountId,
        envelope: &Envelope,
    ) -> Operation {
        self.depositor
            .transfer_in(account, amount, currency, sender_account_id, envelope)
    }

    pub fn withdraw(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        envelope: &Envelope,
    ) -> Debited {
        self.withdrawer.withdraw(account, amount, currency, envelope)
    }

    pub fn card_transaction(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        card_id: CardId,
        envelope: &Envelope,
    ) -> Debited {
        self.withdrawer
            .card_transaction(account, amount, currency, card_id, envelope)
    }

    pub fn transfer_out(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        recipient_account_id: AccountId,
        envelope: &Envelope,
    ) -> Debited {
        self.withdrawer
            .transfer_out(account, amount, currency, recipient_account_id, envelope)
    }

    pub fn transfer_out_split(
        &self,
        account: &mut Account,
        total: Amount,
        currency: &str,
        recipients: &[SplitRecipient],
        envelope: &Envelope,
    ) -> SplitDebited {
        self.transferrer
            .transfer_out_split(account, total, currency, recipients, envelope)
    }

    pub fn refund(
        &self,
        account: &mut Account,
        operation_to_refund_id: OperationId,
        envelope: &Envelope,
    ) -> Result<Operation, RefunderError> {
        self.refunder
            .refund(account, operation_to_refund_id, envelope)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn exchange(
        &self,
        account: &mut Account,
        current_amount: Amount,
        current_currency: &str,
        new_currency: &str,
        new_amount: Amount,
        exchange_rate: Decimal,
        envelope: &Envelope,
    ) -> Debited {
        self.exchanger.exchange(
            account,
            current_amount,
            current_currency,
            new_currency,
            new_amount,
            exchange_rate,
            envelope,
        )
    }
}

impl Default for SimpleAccountTransactor {
    fn default() -> Self {
        Self::new()
    }
}

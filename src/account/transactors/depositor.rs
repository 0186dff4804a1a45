use serde_json::json;

use crate::{
    account::{Account, Operation, OperationKind, OperationStatus},
    model::{AccountId, Amount, Envelope},
};

pub(crate) trait Depositor {
    fn deposit(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        envelope: &Envelope,
    ) -> Operation;

    fn transfer_in(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        sender_account_id: AccountId,
        envelope: &Envelope,
    ) -> Operation;
}

pub(crate) struct SimpleDepositor;

impl Depositor for SimpleDepositor {
    fn deposit(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        envelope: &Envelope,
    ) -> Operation {
        account.credit(currency, amount);
        let mut data = envelope.meta.clone();
        data.insert("amount".to_string(), json!(amount));
        data.insert("currency".to_string(), json!(currency));
        account.register(
            envelope.timestamp(),
            OperationKind::Deposit,
            OperationStatus::Done,
            data,
        )
    }

    fn transfer_in(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        sender_account_id: AccountId,
        envelope: &Envelope,
    ) -> Operation {
        account.credit(currency, amount);
        let mut data = envelope.meta.clone();
        data.insert("amount".to_string(), json!(amount));
        data.insert("currency".to_string(), json!(currency));
        data.insert("sender_account_id".to_string(), json!(sender_account_id));
        account.register(
            envelope.timestamp(),
            OperationKind::TransferIn,
            OperationStatus::Done,
            data,
        )
    }
}

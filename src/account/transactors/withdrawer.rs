use serde_json::{json, Map, Value};

use crate::{
    account::{account_transactor::Debited, Account, OperationKind, OperationStatus},
    model::{AccountId, Amount, CardId, Envelope},
};

pub(crate) trait Withdrawer {
    fn withdraw(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        envelope: &Envelope,
    ) -> Debited;

    fn card_transaction(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        card_id: CardId,
        envelope: &Envelope,
    ) -> Debited;

    fn transfer_out(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        recipient_account_id: AccountId,
        envelope: &Envelope,
    ) -> Debited;
}

pub(crate) struct SimpleWithdrawer;

impl Withdrawer for SimpleWithdrawer {
    fn withdraw(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        envelope: &Envelope,
    ) -> Debited {
        let data = envelope.meta.clone();
        debit(account, amount, currency, OperationKind::Withdraw, data, envelope)
    }

    fn card_transaction(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        card_id: CardId,
        envelope: &Envelope,
    ) -> Debited {
        let mut data = envelope.meta.clone();
        data.insert("card_id".to_string(), json!(card_id));
        debit(
            account,
            amount,
            currency,
            OperationKind::CardTransaction,
            data,
            envelope,
        )
    }

    fn transfer_out(
        &self,
        account: &mut Account,
        amount: Amount,
        currency: &str,
        recipient_account_id: AccountId,
        envelope: &Envelope,
    ) -> Debited {
        let mut data = envelope.meta.clone();
        data.insert(
            "recipient_account_id".to_string(),
            json!(recipient_account_id),
        );
        debit(
            account,
            amount,
            currency,
            OperationKind::TransferOut,
            data,
            envelope,
        )
    }
}

/// The shared debit rule: the post-debit balance must stay at or above the
/// currency's floor. A denial still registers the attempt, balances
/// untouched.
pub(crate) fn debit(
    account: &mut Account,
    amount: Amount,
    currency: &str,
    kind: OperationKind,
    mut data: Map<String, Value>,
    envelope: &Envelope,
) -> Debited {
    data.insert("amount".to_string(), json!(amount));
    data.insert("currency".to_string(), json!(currency));
    if account.balance(currency) - amount >= account.floor(currency) {
        account.credit(currency, -amount);
        Debited::Done(account.register(
            envelope.timestamp(),
            kind,
            OperationStatus::Done,
            data,
        ))
    } else {
        let reason = format!("No {currency} funds");
        data.insert("message".to_string(), json!(reason));
        Debited::Denied {
            reason,
            operation: account.register(
                envelope.timestamp(),
                kind,
                OperationStatus::Denied,
                data,
            ),
        }
    }
}

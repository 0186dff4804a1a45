use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    account::{account_transactor::Debited, Account, OperationKind, OperationStatus},
    model::{Amount, Envelope},
};

pub(crate) trait Exchanger {
    #[allow(clippy::too_many_arguments)]
    fn exchange(
        &self,
        account: &mut Account,
        current_amount: Amount,
        current_currency: &str,
        new_currency: &str,
        new_amount: Amount,
        exchange_rate: Decimal,
        envelope: &Envelope,
    ) -> Debited;
}

pub(crate) struct SimpleExchanger;

impl Exchanger for SimpleExchanger {
    /// An internal cross-currency swap. The conversion itself is computed
    /// upstream against the rates table; here the debit is gated by the
    /// floor rule and both legs are applied together.
    fn exchange(
        &self,
        account: &mut Account,
        current_amount: Amount,
        current_currency: &str,
        new_currency: &str,
        new_amount: Amount,
        exchange_rate: Decimal,
        envelope: &Envelope,
    ) -> Debited {
        let mut data = envelope.meta.clone();
        data.insert("current_amount".to_string(), json!(current_amount));
        data.insert(
            "current_currency".to_string(),
            json!(current_currency),
        );
        data.insert("new_amount".to_string(), json!(new_amount));
        data.insert("new_currency".to_string(), json!(new_currency));
        data.insert("exchange_rate".to_string(), json!(exchange_rate));

        if account.balance(current_currency) - current_amount
            < account.floor(current_currency)
        {
            let reason = format!("No {current_currency} funds");
            data.insert("message".to_string(), json!(reason));
            return Debited::Denied {
                reason,
                operation: account.register(
                    envelope.timestamp(),
                    OperationKind::Exchange,
                    OperationStatus::Denied,
                    data,
                ),
            };
        }

        account.credit(current_currency, -current_amount);
        account.credit(new_currency, new_amount);
        Debited::Done(account.register(
            envelope.timestamp(),
            OperationKind::Exchange,
            OperationStatus::Done,
            data,
        ))
    }
}

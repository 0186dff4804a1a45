use serde_json::{json, Map, Value};

use crate::{
    account::{account_transactor::SplitDebited, Account, OperationKind, OperationStatus},
    model::{Amount, Envelope, SplitRecipient},
};

pub(crate) trait Transferrer {
    fn transfer_out_split(
        &self,
        account: &mut Account,
        total: Amount,
        currency: &str,
        recipients: &[SplitRecipient],
        envelope: &Envelope,
    ) -> SplitDebited;
}

pub(crate) struct SimpleTransferrer;

impl Transferrer for SimpleTransferrer {
    /// Debits the full total and registers one transfer_out per recipient
    /// carrying `round(total * percentage)` (half away from zero).
    /// Percentages are taken as supplied; when the rounded shares do not sum
    /// to the total, the residual stays debited from this account.
    fn transfer_out_split(
        &self,
        account: &mut Account,
        total: Amount,
        currency: &str,
        recipients: &[SplitRecipient],
        envelope: &Envelope,
    ) -> SplitDebited {
        if account.balance(currency) - total < account.floor(currency) {
            let reason = format!("No {currency} funds");
            let mut data = envelope.meta.clone();
            data.insert("amount".to_string(), json!(total));
            data.insert("currency".to_string(), json!(currency));
            data.insert("recipients_data".to_string(), recipients_data(recipients));
            data.insert("message".to_string(), json!(reason));
            let operation = account.register(
                envelope.timestamp(),
                OperationKind::TransferOut,
                OperationStatus::Denied,
                data,
            );
            return SplitDebited::Denied { reason, operation };
        }

        account.credit(currency, -total);
        let operations = recipients
            .iter()
            .map(|recipient| {
                let share = share_of(total, recipient.percentage);
                let mut data = envelope.meta.clone();
                for (key, value) in &recipient.meta {
                    data.insert(key.clone(), value.clone());
                }
                data.insert("amount".to_string(), json!(share));
                data.insert("currency".to_string(), json!(currency));
                data.insert("percentage".to_string(), json!(recipient.percentage));
                data.insert(
                    "recipient_account_id".to_string(),
                    json!(recipient.recipient_account_id),
                );
                account.register(
                    envelope.timestamp(),
                    OperationKind::TransferOut,
                    OperationStatus::Done,
                    data,
                )
            })
            .collect();
        SplitDebited::Done(operations)
    }
}

/// Round half away from zero, which `f64::round` implements.
pub(crate) fn share_of(total: Amount, percentage: f64) -> Amount {
    (total as f64 * percentage).round() as Amount
}

fn recipients_data(recipients: &[SplitRecipient]) -> Value {
    Value::Array(
        recipients
            .iter()
            .map(|recipient| {
                let mut entry: Map<String, Value> = recipient.meta.clone();
                entry.insert("percentage".to_string(), json!(recipient.percentage));
                entry.insert(
                    "recipient_account_id".to_string(),
                    json!(recipient.recipient_account_id),
                );
                Value::Object(entry)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;
    use serde_json::{json, Map};

    use crate::{
        account::{account_transactor::SplitDebited, Account, OperationKind, OperationStatus},
        model::{Amount, Envelope, SplitRecipient},
    };

    use super::{share_of, SimpleTransferrer, Transferrer};

    fn brl_account(balance: Amount) -> Account {
        Account::open(
            1,
            "BRL".to_string(),
            -500,
            [("BRL".to_string(), balance)].into_iter().collect(),
        )
    }

    fn recipient(percentage: f64, account_id: u64) -> SplitRecipient {
        SplitRecipient::new(percentage, account_id)
    }

    #[rstest]
    //     total, percentage, expected_share
    #[case(1000,  0.7,         700)]
    #[case(1000,  0.2,         200)]
    #[case(1000,  0.1,         100)]
    #[case(1001,  0.5,         501)]
    #[case(  33,  0.333,        11)]
    #[case( 100,  0.005,         1)]
    #[case( 100,  0.0,           0)]
    fn shares_round_half_away_from_zero(
        #[case] total: Amount,
        #[case] percentage: f64,
        #[case] expected: Amount,
    ) {
        assert_eq!(share_of(total, percentage), expected);
    }

    #[test]
    fn split_debits_the_total_and_registers_one_operation_per_recipient() {
        let mut account = brl_account(10_000);
        let recipients = vec![recipient(0.7, 2), recipient(0.2, 3), recipient(0.1, 4)];

        let outcome = SimpleTransferrer.transfer_out_split(
            &mut account,
            1000,
            "BRL",
            &recipients,
            &Envelope::default(),
        );

        assert_eq!(account.balance("BRL"), 9000);
        assert_matches!(outcome, SplitDebited::Done(operations) => {
            assert_eq!(operations.len(), 3);
            let amounts: Vec<_> = operations.iter().map(|op| op.amount().unwrap()).collect();
            assert_eq!(amounts, vec![700, 200, 100]);
            for operation in &operations {
                assert_eq!(operation.kind, OperationKind::TransferOut);
                assert_eq!(operation.status, OperationStatus::Done);
            }
            assert_eq!(operations[0].data.get("recipient_account_id"), Some(&json!(2)));
        });
    }

    #[test]
    fn recipient_meta_overrides_the_general_meta() {
        let mut account = brl_account(10_000);
        let mut general = Map::new();
        general.insert("campaign".to_string(), json!("general"));
        general.insert("note".to_string(), json!("shared"));
        let mut specific = Map::new();
        specific.insert("campaign".to_string(), json!("override"));
        let recipients = vec![
            SplitRecipient {
                percentage: 0.5,
                recipient_account_id: 2,
                meta: specific,
            },
            recipient(0.5, 3),
        ];

        let outcome = SimpleTransferrer.transfer_out_split(
            &mut account,
            1000,
            "BRL",
            &recipients,
            &Envelope::with_meta(general),
        );

        assert_matches!(outcome, SplitDebited::Done(operations) => {
            assert_eq!(operations[0].data.get("campaign"), Some(&json!("override")));
            assert_eq!(operations[0].data.get("note"), Some(&json!("shared")));
            assert_eq!(operations[1].data.get("campaign"), Some(&json!("general")));
        });
    }

    #[test]
    fn unnormalized_percentages_leave_the_residual_with_the_sender() {
        let mut account = brl_account(1000);
        let recipients = vec![recipient(0.3, 2), recipient(0.3, 3)];

        let outcome = SimpleTransferrer.transfer_out_split(
            &mut account,
            1000,
            "BRL",
            &recipients,
            &Envelope::default(),
        );

        // the full total leaves the account even though only 600 is distributed
        assert_eq!(account.balance("BRL"), 0);
        assert_matches!(outcome, SplitDebited::Done(operations) => {
            assert_eq!(operations.iter().map(|op| op.amount().unwrap()).sum::<Amount>(), 600);
        });
    }

    #[test]
    fn insufficient_funds_registers_a_single_denied_operation() {
        let mut account = brl_account(100);
        let recipients = vec![recipient(0.7, 2), recipient(0.3, 3)];

        let outcome = SimpleTransferrer.transfer_out_split(
            &mut account,
            1000,
            "BRL",
            &recipients,
            &Envelope::default(),
        );

        assert_eq!(account.balance("BRL"), 100);
        assert_matches!(outcome, SplitDebited::Denied { reason, operation } => {
            assert_eq!(reason, "No BRL funds");
            assert_eq!(operation.status, OperationStatus::Denied);
            assert_eq!(operation.amount(), Some(1000));
            let recipients_data = operation.data.get("recipients_data").unwrap();
            assert_eq!(recipients_data.as_array().unwrap().len(), 2);
        });
        // no per-recipient operation was registered
        assert_eq!(account.next_operation_id, 2);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{Amount, OperationId};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Deposit,
    Withdraw,
    TransferIn,
    TransferOut,
    CardTransaction,
    Refund,
    Exchange,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// The mutation was applied.
    Done,

    /// The mutation was refused by a business rule; the attempt is still
    /// recorded on the ledger, balances untouched.
    Denied,

    /// A done card transaction that has since been refunded. The only legal
    /// status transition is `Done -> Refunded`.
    Refunded,
}

/// An immutable ledger record describing one attempted account mutation.
///
/// Identity and kind never change after registration. `data` starts from the
/// caller-supplied meta fields and the engine writes its own fields (amount,
/// currency, counterparty ids, denial message) over them.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub date_time: DateTime<Utc>,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub data: Map<String, Value>,
}

impl Operation {
    pub fn amount(&self) -> Option<Amount> {
        self.data.get("amount").and_then(Value::as_i64)
    }

    pub fn currency(&self) -> Option<&str> {
        self.data.get("currency").and_then(Value::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn operation_round_trips_through_json_with_arbitrary_data() {
        let mut data = Map::new();
        data.insert("amount".to_string(), json!(3000));
        data.insert("currency".to_string(), json!("BRL"));
        data.insert("customer_note".to_string(), json!({"tag": ["a", "b"]}));
        let operation = Operation {
            id: 7,
            date_time: "2020-05-03T14:00:00Z".parse().unwrap(),
            kind: OperationKind::CardTransaction,
            status: OperationStatus::Done,
            data,
        };

        let bytes = serde_json::to_vec(&operation).unwrap();
        let decoded: Operation = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, operation);
        assert_eq!(decoded.amount(), Some(3000));
        assert_eq!(decoded.currency(), Some("BRL"));
    }
}

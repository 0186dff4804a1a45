pub(crate) mod account_transactor;
pub mod operation;
mod transactors;

pub use account_transactor::{Debited, SimpleAccountTransactor, SplitDebited};
pub use operation::{Operation, OperationKind, OperationStatus};
pub use transactors::refunder::RefunderError;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::{AccountId, Amount, Currency, OperationId};

/// A customer account: multi-currency balances in minor units plus the
/// ledger of every attempted mutation, successful or denied.
///
/// The default-currency balance may run down to `limit` (a negative floor);
/// every other currency floors at zero. Operation ids are dense, starting at
/// 1, and a denied attempt consumes an id like any other.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Account {
    pub(crate) id: AccountId,
    pub(crate) default_currency: Currency,
    pub(crate) limit: Amount,
    pub(crate) balances: BTreeMap<Currency, Amount>,
    pub(crate) operations: BTreeMap<OperationId, Operation>,
    pub(crate) next_operation_id: OperationId,
}

impl Account {
    pub(crate) fn open(
        id: AccountId,
        default_currency: Currency,
        limit: Amount,
        balances: BTreeMap<Currency, Amount>,
    ) -> Self {
        Account {
            id,
            default_currency,
            limit,
            balances,
            operations: BTreeMap::new(),
            next_operation_id: 1,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self, currency: &str) -> Amount {
        self.balances.get(currency).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> BTreeMap<Currency, Amount> {
        self.balances.clone()
    }

    /// Balances restricted to the two currencies involved in a swap.
    pub(crate) fn pair_balances(
        &self,
        current_currency: &str,
        new_currency: &str,
    ) -> BTreeMap<Currency, Amount> {
        [current_currency, new_currency]
            .into_iter()
            .map(|currency| (currency.to_string(), self.balance(currency)))
            .collect()
    }

    pub fn operation(&self, operation_id: OperationId) -> Option<&Operation> {
        self.operations.get(&operation_id)
    }

    pub fn operations_on(&self, date: NaiveDate) -> Vec<Operation> {
        self.operations_between(date, date)
    }

    /// Operations whose date falls in `[from, to]`, inclusive on both
    /// endpoints, most recent first.
    pub fn operations_between(&self, from: NaiveDate, to: NaiveDate) -> Vec<Operation> {
        let mut operations: Vec<Operation> = self
            .operations
            .values()
            .filter(|operation| {
                let date = operation.date_time.date_naive();
                date >= from && date <= to
            })
            .cloned()
            .collect();
        operations.sort_by(|a, b| b.date_time.cmp(&a.date_time));
        operations
    }

    /// The lowest value the given currency's balance may reach.
    pub(crate) fn floor(&self, currency: &str) -> Amount {
        if currency == self.default_currency {
            self.limit
        } else {
            0
        }
    }

    pub(crate) fn credit(&mut self, currency: &str, amount: Amount) {
        *self.balances.entry(currency.to_string()).or_insert(0) += amount;
    }

    /// Registers a ledger record under the next dense id.
    pub(crate) fn register(
        &mut self,
        date_time: DateTime<Utc>,
        kind: OperationKind,
        status: OperationStatus,
        data: Map<String, Value>,
    ) -> Operation {
        let operation = Operation {
            id: self.next_operation_id,
            date_time,
            kind,
            status,
            data,
        };
        self.next_operation_id += 1;
        self.operations.insert(operation.id, operation.clone());
        operation
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rstest::rstest;
    use serde_json::Map;

    use super::*;

    fn brl_account(limit: Amount, balances: Vec<(&str, Amount)>) -> Account {
        Account::open(
            1234,
            "BRL".to_string(),
            limit,
            balances
                .into_iter()
                .map(|(currency, amount)| (currency.to_string(), amount))
                .collect(),
        )
    }

    #[rstest]
    //     limit, balances,             currency, expected_floor
    #[case(-500, vec![],                "BRL",    -500)]
    #[case(-500, vec![],                "USD",       0)]
    #[case(0,    vec![("BRL", 100)],    "BRL",       0)]
    #[case(-500, vec![("USD", 100)],    "EUR",       0)]
    fn floor_applies_the_limit_only_to_the_default_currency(
        #[case] limit: Amount,
        #[case] balances: Vec<(&'static str, Amount)>,
        #[case] currency: &str,
        #[case] expected: Amount,
    ) {
        assert_eq!(brl_account(limit, balances).floor(currency), expected);
    }

    #[test]
    fn missing_currency_reads_as_zero() {
        let account = brl_account(-500, vec![("BRL", 100)]);
        assert_eq!(account.balance("BRL"), 100);
        assert_eq!(account.balance("USD"), 0);
    }

    #[test]
    fn register_assigns_dense_ids_starting_at_one() {
        let mut account = brl_account(0, vec![]);
        let now = Utc::now();
        for expected_id in 1..=5 {
            let operation = account.register(
                now,
                OperationKind::Deposit,
                OperationStatus::Done,
                Map::new(),
            );
            assert_eq!(operation.id, expected_id);
        }
        assert_eq!(account.next_operation_id, 6);
        assert_eq!(account.operations.len(), 5);
        for (key, operation) in &account.operations {
            assert_eq!(*key, operation.id);
        }
    }

    #[test]
    fn date_range_query_is_inclusive_and_newest_first() {
        let mut account = brl_account(0, vec![]);
        let days = [
            "2020-05-01T10:00:00Z",
            "2020-05-02T10:00:00Z",
            "2020-05-03T10:00:00Z",
            "2020-05-04T10:00:00Z",
        ];
        for instant in days {
            account.register(
                instant.parse().unwrap(),
                OperationKind::Deposit,
                OperationStatus::Done,
                Map::new(),
            );
        }

        let from = NaiveDate::from_ymd_opt(2020, 5, 2).unwrap();
        let to = NaiveDate::from_ymd_opt(2020, 5, 3).unwrap();
        let found = account.operations_between(from, to);
        assert_eq!(
            found.iter().map(|operation| operation.id).collect::<Vec<_>>(),
            vec![3, 2]
        );

        let single_day = account.operations_on(from);
        assert_eq!(
            single_day
                .iter()
                .map(|operation| operation.id)
                .collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn account_round_trips_through_json() {
        let mut account = brl_account(-500, vec![("BRL", 5000), ("USD", 10)]);
        account.register(
            "2020-05-03T14:00:00Z".parse().unwrap(),
            OperationKind::Withdraw,
            OperationStatus::Done,
            Map::new(),
        );

        let bytes = serde_json::to_vec(&account).unwrap();
        let decoded: Account = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded, account);
    }
}

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use chrono::Utc;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    model::{Amount, Currency},
    storage::{StoragePool, EXCHANGE_FOLDER},
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RatesError {
    #[error("currency '{0}' is not supported")]
    UnknownCurrency(Currency),

    #[error("currency '{0}' has an unusable rate")]
    InvalidRate(Currency),

    #[error("conversion of {0} overflowed")]
    Overflow(Amount),

    #[error("rates table lock poisoned")]
    LockPoisoned,
}

/// A conversion result: the rounded target amount and the effective rate.
#[derive(Debug, PartialEq, Clone)]
pub struct Conversion {
    pub amount: Amount,
    pub rate: Decimal,
}

/// Process-wide table of currency rates expressed against a pivot currency.
///
/// Read-mostly: a lookup holds the read lock for a single access. The
/// refresher task is the single writer and replaces entries per key.
#[derive(Clone)]
pub struct RatesTable {
    table: Arc<RwLock<BTreeMap<Currency, Decimal>>>,
}

impl RatesTable {
    pub fn new(seed: BTreeMap<Currency, Decimal>) -> Self {
        RatesTable {
            table: Arc::new(RwLock::new(seed)),
        }
    }

    /// Cross-rate conversion: `rate = table[new] / table[current]`,
    /// `new_amount = round(amount * rate)` half away from zero.
    pub fn convert(
        &self,
        amount: Amount,
        current_currency: &str,
        new_currency: &str,
    ) -> Result<Conversion, RatesError> {
        let (current, new) = {
            let table = self.table.read().map_err(|_| RatesError::LockPoisoned)?;
            let current = *table
                .get(current_currency)
                .ok_or_else(|| RatesError::UnknownCurrency(current_currency.to_string()))?;
            let new = *table
                .get(new_currency)
                .ok_or_else(|| RatesError::UnknownCurrency(new_currency.to_string()))?;
            (current, new)
        };
        if current.is_zero() {
            return Err(RatesError::InvalidRate(current_currency.to_string()));
        }

        let rate = new / current;
        let converted = (Decimal::from(amount) * rate)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let new_amount = converted.to_i64().ok_or(RatesError::Overflow(amount))?;
        Ok(Conversion {
            amount: new_amount,
            rate,
        })
    }

    pub fn snapshot(&self) -> Result<BTreeMap<Currency, Decimal>, RatesError> {
        Ok(self
            .table
            .read()
            .map_err(|_| RatesError::LockPoisoned)?
            .clone())
    }

    /// Single-writer refresh: replaces entries per key.
    fn replace_all(&self, entries: &BTreeMap<Currency, Decimal>) -> Result<(), RatesError> {
        let mut table = self.table.write().map_err(|_| RatesError::LockPoisoned)?;
        for (currency, rate) in entries {
            table.insert(currency.clone(), *rate);
        }
        Ok(())
    }

    /// Spawns the refresh ticker. Every tick re-asserts the source table and
    /// appends the current snapshot under `exchange/{YYYYMMDDHH}`. The first
    /// tick fires immediately so a fresh process leaves a startup snapshot.
    pub fn spawn_refresher(
        &self,
        storage: StoragePool,
        source: BTreeMap<Currency, Decimal>,
        every: Duration,
    ) -> JoinHandle<()> {
        let rates = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(err) = rates.replace_all(&source) {
                    tracing::error!(error = %err, "rates refresh failed");
                    continue;
                }
                let snapshot = match rates.snapshot() {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        tracing::error!(error = %err, "rates snapshot failed");
                        continue;
                    }
                };
                let bucket = Utc::now().format("%Y%m%d%H").to_string();
                if let Err(err) = storage.store_async(EXCHANGE_FOLDER, &bucket, &snapshot).await {
                    tracing::warn!(%bucket, error = %err, "failed to persist rates snapshot");
                } else {
                    tracing::debug!(%bucket, "rates snapshot persisted");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use assert_matches::assert_matches;
    use rstest::rstest;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{RatesError, RatesTable};

    fn table() -> RatesTable {
        let mut seed = BTreeMap::new();
        seed.insert("USD".to_string(), dec!(1));
        seed.insert("BRL".to_string(), dec!(5.45));
        seed.insert("EUR".to_string(), dec!(0.92));
        RatesTable::new(seed)
    }

    #[rstest]
    //     amount, from,  to,    expected_amount, expected_rate
    #[case(100,    "USD", "BRL", 545,             dec!(5.45))]
    #[case(545,    "BRL", "USD", 100,             Decimal::ONE / dec!(5.45))]
    #[case(100,    "USD", "USD", 100,             dec!(1))]
    #[case(0,      "USD", "BRL", 0,               dec!(5.45))]
    fn convert_applies_the_cross_rate(
        #[case] amount: i64,
        #[case] from: &str,
        #[case] to: &str,
        #[case] expected_amount: i64,
        #[case] expected_rate: Decimal,
    ) {
        let conversion = table().convert(amount, from, to).unwrap();
        assert_eq!(conversion.amount, expected_amount);
        assert_eq!(conversion.rate, expected_rate);
    }

    #[test]
    fn conversion_rounds_half_away_from_zero() {
        // 110 BRL -> USD at 1/5.45 = 20.183..., rounds to 20
        assert_eq!(table().convert(110, "BRL", "USD").unwrap().amount, 20);
        // 103 USD -> EUR = 94.76, rounds to 95
        assert_eq!(table().convert(103, "USD", "EUR").unwrap().amount, 95);
    }

    #[test]
    fn unknown_currencies_are_rejected() {
        assert_matches!(
            table().convert(100, "GBP", "BRL"),
            Err(RatesError::UnknownCurrency(currency)) if currency == "GBP"
        );
        assert_matches!(
            table().convert(100, "USD", "GBP"),
            Err(RatesError::UnknownCurrency(currency)) if currency == "GBP"
        );
    }

    #[test]
    fn round_trip_is_exact_up_to_rounding() {
        let rates = table();
        let there = rates.convert(1000, "USD", "BRL").unwrap();
        let back = rates.convert(there.amount, "BRL", "USD").unwrap();
        assert!((back.amount - 1000).abs() <= 1);
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

pub type AccountId = u64;
pub type OperationId = u64;
pub type CardId = u64;

/// Amounts are integer minor units (cents). Signed so that the default
/// currency can run below zero down to the account's limit.
pub type Amount = i64;

pub type Currency = String;

/// Fields common to every request: an optional caller-supplied timestamp
/// (the operation is stamped "now" at registration when absent) and freeform
/// key/value pairs preserved verbatim in the recorded operation's data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub date_time: Option<DateTime<Utc>>,
    pub meta: Map<String, Value>,
}

impl Envelope {
    pub fn at(date_time: DateTime<Utc>) -> Self {
        Envelope {
            date_time: Some(date_time),
            meta: Map::new(),
        }
    }

    pub fn with_meta(meta: Map<String, Value>) -> Self {
        Envelope {
            date_time: None,
            meta,
        }
    }

    /// The instant the operation will be registered at.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.date_time.unwrap_or_else(Utc::now)
    }
}

/// One leg of a split transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitRecipient {
    pub percentage: f64,
    pub recipient_account_id: AccountId,
    /// Recipient-specific fields; these override the request's general meta
    /// in the per-recipient operation record.
    pub meta: Map<String, Value>,
}

impl SplitRecipient {
    pub fn new(percentage: f64, recipient_account_id: AccountId) -> Self {
        SplitRecipient {
            percentage,
            recipient_account_id,
            meta: Map::new(),
        }
    }
}

/// Arguments honored when a worker opens a brand-new account (first access
/// for an id with no stored state). Ignored when the account already exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialArgs {
    pub default_currency: Option<Currency>,
    pub limit: Option<Amount>,
    pub balances: Option<BTreeMap<Currency, Amount>>,
}

impl InitialArgs {
    pub fn with_balances(balances: BTreeMap<Currency, Amount>) -> Self {
        InitialArgs {
            balances: Some(balances),
            ..InitialArgs::default()
        }
    }
}

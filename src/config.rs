use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Amount, Currency};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BankConfig {
    pub storage: StorageConfig,
    pub actor: ActorConfig,
    pub rates: RatesConfig,
    pub account: AccountConfig,
}

impl BankConfig {
    /// Loads the config from a JSON file. A missing file yields the
    /// defaults; absent sections and fields fall back individually.
    pub fn load(path: &Path) -> Result<BankConfig, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(BankConfig::default())
            }
            Err(err) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    reason: err.to_string(),
                })
            }
        };
        serde_json::from_str(&content).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of pool slots; all I/O for one key funnels through one slot.
    pub workers: usize,
    /// Root under which the `accounts/` and `exchange/` folders live.
    pub base_folder: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            workers: 3,
            base_folder: PathBuf::from("bank-data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Seconds without a message before an account worker shuts down. Also
    /// bounds how long a cross-account call is waited on.
    pub idle_timeout_secs: u64,
}

impl Default for ActorConfig {
    fn default() -> Self {
        ActorConfig {
            idle_timeout_secs: 240,
        }
    }
}

impl ActorConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    pub refresh_interval_secs: u64,
    /// Currency -> rate against the pivot currency.
    pub seed_table: BTreeMap<Currency, Decimal>,
}

impl Default for RatesConfig {
    fn default() -> Self {
        let mut seed_table = BTreeMap::new();
        seed_table.insert("USD".to_string(), dec!(1));
        seed_table.insert("BRL".to_string(), dec!(5.45));
        seed_table.insert("EUR".to_string(), dec!(0.92));
        RatesConfig {
            refresh_interval_secs: 3600,
            seed_table,
        }
    }
}

impl RatesConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub default_currency: Currency,
    /// Floor the default-currency balance may reach.
    pub default_limit: Amount,
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            default_currency: "BRL".to_string(),
            default_limit: -500,
        }
    }
}

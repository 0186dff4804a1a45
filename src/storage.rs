use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::config::StorageConfig;

/// Folder holding one entry per account, keyed by account id.
pub const ACCOUNTS_FOLDER: &str = "accounts";

/// Folder holding one rates snapshot per refresh bucket (`YYYYMMDDHH`).
pub const EXCHANGE_FOLDER: &str = "exchange";

const SLOT_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StorageError {
    #[error("failed to encode value for {folder}/{key}: {reason}")]
    Encode {
        folder: String,
        key: String,
        reason: String,
    },

    #[error("failed to decode value at {folder}/{key}: {reason}")]
    Decode {
        folder: String,
        key: String,
        reason: String,
    },

    #[error("i/o failure at {folder}/{key}: {reason}")]
    Io {
        folder: String,
        key: String,
        reason: String,
    },

    #[error("storage worker is gone")]
    WorkerGone,
}

enum Job {
    Store {
        folder: String,
        key: String,
        bytes: Vec<u8>,
        ack: Option<oneshot::Sender<Result<(), StorageError>>>,
    },
    Get {
        folder: String,
        key: String,
        reply: oneshot::Sender<Result<Option<Vec<u8>>, StorageError>>,
    },
}

/// A fixed set of worker slots over one base folder. A stable hash of the
/// key picks the slot, so all I/O for one key funnels through a single
/// worker and executes in the order it arrived at the pool.
#[derive(Clone)]
pub struct StoragePool {
    slots: Arc<Vec<mpsc::Sender<Job>>>,
}

impl StoragePool {
    /// Spawns the worker slots. Must be called from within a tokio runtime.
    pub fn start(config: &StorageConfig) -> StoragePool {
        let slots = (0..config.workers.max(1))
            .map(|slot| {
                let (sender, jobs) = mpsc::channel(SLOT_QUEUE_DEPTH);
                tokio::spawn(run_slot(slot, config.base_folder.clone(), jobs));
                sender
            })
            .collect();
        StoragePool {
            slots: Arc::new(slots),
        }
    }

    /// Blocks until the value is durably written under `folder/key`.
    pub async fn store_sync<T: Serialize>(
        &self,
        folder: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = encode(folder, key, value)?;
        let (ack, done) = oneshot::channel();
        self.slot(key)
            .send(Job::Store {
                folder: folder.to_string(),
                key: key.to_string(),
                bytes,
                ack: Some(ack),
            })
            .await
            .map_err(|_| StorageError::WorkerGone)?;
        done.await.map_err(|_| StorageError::WorkerGone)?
    }

    /// Enqueues the write and returns as soon as it is queued. Per-key FIFO
    /// is the only delivery guarantee; meant for collector-style sinks,
    /// never for authoritative account state.
    pub async fn store_async<T: Serialize>(
        &self,
        folder: &str,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let bytes = encode(folder, key, value)?;
        self.slot(key)
            .send(Job::Store {
                folder: folder.to_string(),
                key: key.to_string(),
                bytes,
                ack: None,
            })
            .await
            .map_err(|_| StorageError::WorkerGone)
    }

    /// The latest value visible to the key's slot, or `None` when no record
    /// exists.
    pub async fn get<T: DeserializeOwned>(
        &self,
        folder: &str,
        key: &str,
    ) -> Result<Option<T>, StorageError> {
        let (reply, response) = oneshot::channel();
        self.slot(key)
            .send(Job::Get {
                folder: folder.to_string(),
                key: key.to_string(),
                reply,
            })
            .await
            .map_err(|_| StorageError::WorkerGone)?;
        match response.await.map_err(|_| StorageError::WorkerGone)?? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|err| StorageError::Decode {
                    folder: folder.to_string(),
                    key: key.to_string(),
                    reason: err.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn slot(&self, key: &str) -> &mpsc::Sender<Job> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.slots[(hasher.finish() % self.slots.len() as u64) as usize]
    }
}

fn encode<T: Serialize>(folder: &str, key: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|err| StorageError::Encode {
        folder: folder.to_string(),
        key: key.to_string(),
        reason: err.to_string(),
    })
}

async fn run_slot(slot: usize, base: PathBuf, mut jobs: mpsc::Receiver<Job>) {
    tracing::debug!(slot, "storage slot started");
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Store {
                folder,
                key,
                bytes,
                ack,
            } => {
                let result = write_bytes(&base, &folder, &key, &bytes).await;
                if let Err(err) = &result {
                    tracing::warn!(slot, %folder, %key, error = %err, "store failed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(result);
                }
            }
            Job::Get { folder, key, reply } => {
                let _ = reply.send(read_bytes(&base, &folder, &key).await);
            }
        }
    }
    tracing::debug!(slot, "storage slot stopped");
}

async fn write_bytes(
    base: &Path,
    folder: &str,
    key: &str,
    bytes: &[u8],
) -> Result<(), StorageError> {
    let io_error = |err: io::Error| StorageError::Io {
        folder: folder.to_string(),
        key: key.to_string(),
        reason: err.to_string(),
    };
    let dir = base.join(folder);
    tokio::fs::create_dir_all(&dir).await.map_err(io_error)?;
    tokio::fs::write(dir.join(key), bytes).await.map_err(io_error)
}

async fn read_bytes(base: &Path, folder: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
    match tokio::fs::read(base.join(folder).join(key)).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::Io {
            folder: folder.to_string(),
            key: key.to_string(),
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    use crate::config::StorageConfig;

    use super::{StoragePool, ACCOUNTS_FOLDER};

    #[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
    struct Record {
        value: u64,
        note: String,
    }

    fn pool_in(dir: &TempDir, workers: usize) -> StoragePool {
        StoragePool::start(&StorageConfig {
            workers,
            base_folder: dir.path().to_path_buf(),
        })
    }

    #[tokio::test]
    async fn stored_values_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, 3);
        let record = Record {
            value: 42,
            note: "hello".to_string(),
        };

        pool.store_sync(ACCOUNTS_FOLDER, "7", &record).await.unwrap();

        let loaded: Option<Record> = pool.get(ACCOUNTS_FOLDER, "7").await.unwrap();
        assert_eq!(loaded, Some(record));
    }

    #[tokio::test]
    async fn absent_keys_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, 3);

        let loaded: Option<Record> = pool.get(ACCOUNTS_FOLDER, "missing").await.unwrap();
        assert_eq!(loaded, None);
    }

    #[tokio::test]
    async fn same_key_writes_apply_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, 3);

        for value in 0..100u64 {
            pool.store_async(
                ACCOUNTS_FOLDER,
                "contended",
                &Record {
                    value,
                    note: String::new(),
                },
            )
            .await
            .unwrap();
        }
        pool.store_sync(
            ACCOUNTS_FOLDER,
            "contended",
            &Record {
                value: 100,
                note: String::new(),
            },
        )
        .await
        .unwrap();

        // the synchronous write queued last, so FIFO makes it the survivor
        let loaded: Option<Record> = pool.get(ACCOUNTS_FOLDER, "contended").await.unwrap();
        assert_eq!(loaded.unwrap().value, 100);
    }

    #[tokio::test]
    async fn keys_spread_over_folders_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, 1);
        let account = Record {
            value: 1,
            note: "account".to_string(),
        };
        let snapshot = Record {
            value: 2,
            note: "snapshot".to_string(),
        };

        pool.store_sync("accounts", "k", &account).await.unwrap();
        pool.store_sync("exchange", "k", &snapshot).await.unwrap();

        let a: Option<Record> = pool.get("accounts", "k").await.unwrap();
        let b: Option<Record> = pool.get("exchange", "k").await.unwrap();
        assert_eq!(a, Some(account));
        assert_eq!(b, Some(snapshot));
    }

    #[tokio::test]
    async fn undecodable_bytes_surface_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_in(&dir, 2);

        pool.store_sync(ACCOUNTS_FOLDER, "clash", &"just a string")
            .await
            .unwrap();

        let loaded: Result<Option<Record>, _> = pool.get(ACCOUNTS_FOLDER, "clash").await;
        assert_matches!(loaded, Err(super::StorageError::Decode { .. }));
    }
}

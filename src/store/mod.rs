//! Session-scoped key/value storage.
//!
//! Values are tagged with the browser-session epoch they were written in.
//! Switching to a new epoch purges everything older, so state survives a host
//! restart while the browser keeps running but not a browser restart.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, RwLock},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::oneshot;

mod schema;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "store";

use crate::{log_debug, log_error, log_info};

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                log_error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                log_error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
    epoch: Arc<RwLock<String>>,
    path: Arc<PathBuf>,
}

impl SessionStore {
    /// Open (creating if needed) the store at `path` and adopt `epoch`,
    /// purging rows written under any other epoch.
    pub async fn open(path: PathBuf, epoch: impl Into<String>) -> Result<Self> {
        let store = Self::start(path)?;
        let purged = store.begin_epoch(epoch).await?;
        log_info!(
            "Session store ready at {} ({} stale rows purged)",
            store.path().display(),
            purged
        );
        Ok(store)
    }

    /// Open the store and keep whatever epoch wrote last. Used at host start,
    /// before any browser has said which session it belongs to.
    pub async fn resume(path: PathBuf) -> Result<Self> {
        let store = Self::start(path)?;
        let latest = store
            .execute(|conn| {
                conn.query_row(
                    "SELECT epoch FROM session_values ORDER BY updated_at DESC LIMIT 1",
                    [],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .context("failed to read latest epoch")
            })
            .await?;

        if let Some(epoch) = latest {
            match store.epoch.write() {
                Ok(mut guard) => *guard = epoch,
                Err(poisoned) => *poisoned.into_inner() = epoch,
            }
        }
        log_info!(
            "Session store resumed at {} (epoch {:?})",
            store.path().display(),
            store.epoch()
        );
        Ok(store)
    }

    fn start(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = path.clone();

        let worker = thread::Builder::new()
            .name("cyberpet-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    log_error!("Failed to enable WAL mode: {err}");
                }

                let init_result = schema::upgrade(&mut conn).context("failed to prepare store schema");
                if ready_tx.send(init_result).is_err() {
                    log_error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                log_info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            epoch: Arc::new(RwLock::new(String::new())),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub fn epoch(&self) -> String {
        match self.epoch.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Switch to `epoch`. Returns the number of rows purged; adopting the
    /// current epoch again is a no-op.
    pub async fn begin_epoch(&self, epoch: impl Into<String>) -> Result<usize> {
        let epoch = epoch.into();
        if self.epoch() == epoch {
            return Ok(0);
        }

        let epoch_for_task = epoch.clone();
        let purged = self
            .execute(move |conn| {
                conn.execute(
                    "DELETE FROM session_values WHERE epoch != ?1",
                    params![epoch_for_task],
                )
                .context("failed to purge stale session values")
            })
            .await?;

        match self.epoch.write() {
            Ok(mut guard) => *guard = epoch.clone(),
            Err(poisoned) => *poisoned.into_inner() = epoch.clone(),
        }
        log_debug!("adopted epoch {} ({} rows purged)", epoch, purged);
        Ok(purged)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                log_error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    pub async fn put(&self, scope: &str, key: &str, value: String) -> Result<()> {
        let scope = scope.to_string();
        let key = key.to_string();
        let epoch = self.epoch();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_values (scope, key, value, epoch, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(scope, key) DO UPDATE SET
                     value = excluded.value,
                     epoch = excluded.epoch,
                     updated_at = excluded.updated_at",
                params![scope, key, value, epoch, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write {scope}/{key}"))?;
            Ok(())
        })
        .await
    }

    /// Reads only see values written in the current epoch.
    pub async fn get(&self, scope: &str, key: &str) -> Result<Option<String>> {
        let scope = scope.to_string();
        let key = key.to_string();
        let epoch = self.epoch();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT value FROM session_values
                 WHERE scope = ?1 AND key = ?2 AND epoch = ?3",
                params![scope, key, epoch],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read {scope}/{key}"))
        })
        .await
    }

    pub async fn put_json<T: Serialize>(&self, scope: &str, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)
            .with_context(|| format!("failed to encode {scope}/{key}"))?;
        self.put(scope, key, encoded).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, scope: &str, key: &str) -> Result<Option<T>> {
        match self.get(scope, key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .with_context(|| format!("failed to decode {scope}/{key}")),
            None => Ok(None),
        }
    }

    pub async fn remove_scope(&self, scope: &str) -> Result<usize> {
        let scope = scope.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM session_values WHERE scope = ?1", params![scope])
                .context("failed to clear scope")
        })
        .await
    }
}

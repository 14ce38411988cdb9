use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tokio::sync::broadcast;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use super::store::{CHANGE_CHANNEL_CAPACITY, DurableStore, StorageChange};

/// SQLite-backed durable store.
///
/// Several processes may open the same database file. Writes made through
/// this instance are announced immediately; writes made by other processes
/// are only seen by [`poll_changes`](Self::poll_changes).
pub struct SqliteStore {
    /// Path to the SQLite database file
    db_path: PathBuf,
    changes: broadcast::Sender<StorageChange>,
    /// Values this instance wrote lately, per key; the poller skips them
    own_writes: Arc<Mutex<OwnWrites>>,
}

/// Recent values per key, newest last
type OwnWrites = HashMap<String, VecDeque<Option<String>>>;

const OWN_WRITES_PER_KEY: usize = 16;

/// Open a SQLite connection with standard pragmas (busy_timeout).
fn open_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    conn.execute_batch("PRAGMA busy_timeout=5000;")
        .context("failed to set busy_timeout")?;
    Ok(conn)
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

impl SqliteStore {
    /// Create a new SQLite store at the given path
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create directory: {}", parent.display())
                })?;
            }
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let store = Self {
            db_path,
            changes,
            own_writes: Arc::default(),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Create a store at the default location (~/.cart-session/store.db)
    pub fn default_location() -> Result<Self> {
        Self::new(Self::default_path()?)
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".cart-session").join("store.db"))
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> Result<()> {
        let conn = open_connection(&self.db_path)?;

        // WAL lets a watching process read while another writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("failed to set WAL mode")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("failed to create kv table")?;

        debug!(path = %self.db_path.display(), "initialized SQLite store");

        Ok(())
    }

    fn remember_write(&self, key: &str, value: Option<&str>) {
        let mut own = self.own_writes.lock().unwrap_or_else(PoisonError::into_inner);
        let recent = own.entry(key.to_string()).or_default();
        if recent.len() == OWN_WRITES_PER_KEY {
            recent.pop_front();
        }
        recent.push_back(value.map(str::to_string));
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        let _ = self.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
        });
    }

    /// Watch `keys` for writes made by other processes.
    ///
    /// Every `interval` the current values are compared against the last
    /// ones seen and differences are broadcast to subscribers. Values this
    /// instance wrote itself were already announced and are skipped. The
    /// task runs until the returned handle is aborted.
    pub fn poll_changes(&self, keys: &[&str], interval: Duration) -> JoinHandle<()> {
        let db_path = self.db_path.clone();
        let sender = self.changes.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let own_writes = Arc::clone(&self.own_writes);

        tokio::spawn(async move {
            let mut seen: HashMap<String, Option<String>> = HashMap::new();
            let mut primed = false;

            loop {
                let path = db_path.clone();
                let wanted = keys.clone();
                let current = task::spawn_blocking(move || {
                    let conn = open_connection(&path)?;
                    let mut values = HashMap::new();
                    for key in wanted {
                        let value = read_value(&conn, &key)?;
                        values.insert(key, value);
                    }
                    Ok::<_, anyhow::Error>(values)
                })
                .await;

                match current {
                    Ok(Ok(values)) => {
                        for (key, value) in values {
                            let previous = seen.insert(key.clone(), value.clone());
                            if !primed || previous.as_ref() == Some(&value) {
                                continue;
                            }
                            let own = own_writes
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get(&key)
                                .is_some_and(|recent| recent.contains(&value));
                            if !own {
                                debug!(key = %key, "detected foreign write");
                                let _ = sender.send(StorageChange {
                                    key,
                                    new_value: value,
                                });
                            }
                        }
                        primed = true;
                    }
                    Ok(Err(e)) => warn!(error = %e, "failed to poll SQLite store"),
                    Err(e) => warn!(error = %e, "SQLite poll task failed"),
                }

                tokio::time::sleep(interval).await;
            }
        })
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let db_path = self.db_path.clone();

        task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            read_value(&conn, &key)
        })
        .await
        .context("spawn_blocking failed")?
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.remember_write(key, Some(value));
        let owned_key = key.to_string();
        let owned_value = value.to_string();
        let db_path = self.db_path.clone();

        task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![owned_key, owned_value, Utc::now().to_rfc3339()],
            )?;
            debug!(key = %owned_key, "stored value");
            Ok::<_, anyhow::Error>(())
        })
        .await
        .context("spawn_blocking failed")??;

        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.remember_write(key, None);
        let owned_key = key.to_string();
        let db_path = self.db_path.clone();

        let changes = task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;
            conn.execute("DELETE FROM kv WHERE key = ?1", [&owned_key])?;
            Ok::<_, anyhow::Error>(conn.changes())
        })
        .await
        .context("spawn_blocking failed")??;

        if changes > 0 {
            debug!(key, "removed value");
            self.notify(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let db_path = tmp_dir.path().join("store.db");

        {
            let store = SqliteStore::new(&db_path).expect("create store");
            store.set("cart_token", "tok1").await.expect("set");
        }

        let store = SqliteStore::new(&db_path).expect("reopen store");
        assert_eq!(
            store.get("cart_token").await.expect("get").as_deref(),
            Some("tok1")
        );
    }

    #[tokio::test]
    async fn test_remove_notifies_only_when_present() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::new(tmp_dir.path().join("store.db")).expect("create store");
        let mut rx = store.subscribe();

        store.remove("missing").await.expect("remove missing");
        store.set("k", "v").await.expect("set");
        store.remove("k").await.expect("remove");

        assert_eq!(
            rx.recv().await.expect("set event").new_value.as_deref(),
            Some("v")
        );
        assert_eq!(rx.recv().await.expect("remove event").new_value, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_poll_changes_sees_other_instance_writes() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let db_path = tmp_dir.path().join("store.db");
        let watcher = SqliteStore::new(&db_path).expect("create watcher");
        let writer = SqliteStore::new(&db_path).expect("create writer");

        let mut rx = watcher.subscribe();
        let poller = watcher.poll_changes(&["cart_last_update"], Duration::from_millis(10));

        // Let the poller record the initial (absent) value
        tokio::time::sleep(Duration::from_millis(50)).await;
        writer.set("cart_last_update", "42").await.expect("set");

        let change = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("change before timeout")
            .expect("change received");
        assert_eq!(change.key, "cart_last_update");
        assert_eq!(change.new_value.as_deref(), Some("42"));

        poller.abort();
    }

    #[tokio::test]
    async fn test_poll_changes_skips_own_earlier_writes() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let store = SqliteStore::new(tmp_dir.path().join("store.db")).expect("create store");

        let mut rx = store.subscribe();
        let poller = store.poll_changes(&["cart_last_update"], Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        store.set("cart_last_update", "100").await.expect("first stamp");
        store.set("cart_last_update", "101").await.expect("second stamp");
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Only the direct announcements, never a re-broadcast from the poller
        assert_eq!(
            rx.recv().await.expect("first").new_value.as_deref(),
            Some("100")
        );
        assert_eq!(
            rx.recv().await.expect("second").new_value.as_deref(),
            Some("101")
        );
        assert!(rx.try_recv().is_err());

        poller.abort();
    }
}

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Key holding the persisted cart token
pub const TOKEN_KEY: &str = "cart_token";

/// Key holding the millisecond timestamp of the latest successful mutation
pub const LAST_UPDATE_KEY: &str = "cart_last_update";

/// Buffered change notifications per subscriber
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Notification that a durable key changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed
    pub new_value: Option<String>,
}

/// Durable key/value storage shared by every cart session of a profile.
///
/// Values outlive the process. Every write is announced to all
/// subscribers, the writer included.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, overwriting any previous one
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value (no-op if absent)
    async fn remove(&self, key: &str) -> Result<()>;

    /// Subscribe to change notifications
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

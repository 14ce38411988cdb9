use std::sync::Arc;

use tracing::debug;

use crate::config::StoreConfig;
use crate::error::CartError;
use crate::event::EventSender;
use crate::session::CartSession;
use crate::storage::{DurableStore, MemoryStore, SqliteStore};
use crate::transport::{ReqwestTransport, Transport};

/// Builder for constructing a [`CartSession`].
///
/// # Example
///
/// ```no_run
/// # use cart_session::CartSession;
/// # async fn example() -> Result<(), cart_session::CartError> {
/// let session = CartSession::builder()
///     .from_config()?
///     .sqlite_store()?
///     .build()?;
/// session.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct CartSessionBuilder {
    config: StoreConfig,
    transport: Option<Box<dyn Transport>>,
    store: Option<Arc<dyn DurableStore>>,
    events: EventSender,
}

impl CartSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
            transport: None,
            store: None,
            events: EventSender::noop(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the store API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    /// Set a custom transport (defaults to reqwest).
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Set the durable store owned by this session.
    pub fn store(mut self, store: impl DurableStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Share a durable store with other sessions.
    pub fn shared_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use SQLite storage at the configured path, or ~/.cart-session/store.db.
    pub fn sqlite_store(mut self) -> Result<Self, CartError> {
        let store = match self.config.storage_path {
            Some(ref path) => SqliteStore::new(path),
            None => SqliteStore::default_location(),
        }
        .map_err(|e| CartError::Storage(format!("failed to initialize SQLite store: {:#}", e)))?;
        self.store = Some(Arc::new(store));
        Ok(self)
    }

    /// Receive session events on this sender.
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    /// Apply settings from config files and environment.
    ///
    /// Settings applied here can still be overridden by subsequent builder calls.
    pub fn from_config(mut self) -> Result<Self, CartError> {
        let loaded = StoreConfig::load()
            .map_err(|e| CartError::Config(format!("failed to load configuration: {:#}", e)))?;
        debug!("loaded store configuration");
        self.config = loaded.merge(self.config);
        Ok(self)
    }

    /// Build the [`CartSession`].
    ///
    /// Fails if no base URL has been configured. Without an explicit store
    /// the session keeps its token in memory only.
    pub fn build(self) -> Result<CartSession, CartError> {
        let base_url = self.config.require_base_url()?.to_string();

        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(
                ReqwestTransport::new(
                    self.config.request_timeout(),
                    self.config.user_agent.as_deref(),
                )
                .map_err(|e| CartError::Config(format!("{:#}", e)))?,
            ),
        };

        let store = self.store.unwrap_or_else(|| {
            debug!("no durable store configured, cart token will not survive restarts");
            Arc::new(MemoryStore::new())
        });

        Ok(CartSession::from_parts(
            base_url,
            transport,
            store,
            self.events,
        ))
    }
}

impl Default for CartSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_without_base_url_fails() {
        let err = CartSessionBuilder::new().build().unwrap_err();
        assert!(matches!(err, CartError::Config(_)));
    }

    #[test]
    fn test_build_with_base_url() {
        let session = CartSessionBuilder::new()
            .base_url("https://shop.test/wp-json/wc/store/v1")
            .build()
            .expect("build session");
        assert_eq!(session.base_url(), "https://shop.test/wp-json/wc/store/v1");
        assert!(session.cart().is_none());
        assert!(!session.is_loading());
    }
}

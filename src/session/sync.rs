use std::sync::{Arc, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CartSession;
use crate::error::CartError;
use crate::event::Event;
use crate::storage::{LAST_UPDATE_KEY, StorageChange};

/// Handle to a running sync task.
///
/// Dropping the handle stops the task.
#[must_use = "sync stops as soon as the handle is dropped"]
#[derive(Debug)]
pub struct SyncHandle {
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl CartSession {
    /// React to a durable storage change.
    ///
    /// Only the last-update key matters. A value equal to this session's own
    /// last write is ignored; anything else refetches the cart once.
    /// Returns whether a refetch happened.
    pub async fn handle_storage_change(&self, change: &StorageChange) -> Result<bool, CartError> {
        if change.key != LAST_UPDATE_KEY {
            return Ok(false);
        }
        let Some(value) = change.new_value.as_deref() else {
            return Ok(false);
        };

        if self.lock_state().is_own_update(value) {
            debug!(session = %self.id, stamp = value, "ignoring own update signal");
            return Ok(false);
        }

        info!(session = %self.id, stamp = value, "cart updated elsewhere, refetching");
        self.initialize().await?;
        self.events.emit(Event::SyncRefreshed);
        Ok(true)
    }

    /// Start watching durable storage for updates made by other sessions.
    ///
    /// The task holds only a weak reference, so it also ends once the last
    /// `Arc` to the session is gone.
    pub fn spawn_sync(self: &Arc<Self>) -> SyncHandle {
        let mut changes = self.store.subscribe();
        let session = Arc::downgrade(self);

        let task = tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => Some(change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "storage notifications lagged, refetching once");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(session) = session.upgrade() else {
                    break;
                };

                let result = match change {
                    Some(change) => session.handle_storage_change(&change).await.map(|_| ()),
                    None => session.initialize().await.map(|()| {
                        session.events.emit(Event::SyncRefreshed);
                    }),
                };
                if let Err(e) = result {
                    warn!(session = %session.id, error = %e, "sync refresh failed");
                }
            }
            debug!("sync task finished");
        });

        let abort = task.abort_handle();
        let previous = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(abort);
        if let Some(previous) = previous {
            previous.abort();
        }

        SyncHandle { task }
    }

    /// End the session's lifecycle: stop syncing.
    ///
    /// The remote cart and the stored token are left alone, so a new session
    /// picks up where this one stopped.
    pub fn dispose(&self) {
        let handle = self
            .sync_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!(session = %self.id, "sync stopped");
        }
    }
}

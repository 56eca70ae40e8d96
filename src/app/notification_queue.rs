use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::warn;

use crate::domain::notification::QueuedEvent;
use crate::infra::list_store::ListStore;

const QUEUE_KEY_PREFIX: &str = "notifications";

/// Per-recipient FIFO of pending live notifications.
///
/// Every call round-trips through the shared list store; nothing is cached in
/// process, so several API instances can serve the same recipient.
#[derive(Clone)]
pub struct NotificationQueue {
    store: Arc<dyn ListStore>,
    max_len: Option<usize>,
}

impl NotificationQueue {
    /// `max_len == 0` leaves the queue unbounded.
    pub fn new(store: Arc<dyn ListStore>, max_len: usize) -> Self {
        Self {
            store,
            max_len: (max_len > 0).then_some(max_len),
        }
    }

    pub fn key_for(recipient_id: i64) -> String {
        format!("{}:{}", QUEUE_KEY_PREFIX, recipient_id)
    }

    /// Appends the event at the tail and returns the queue length.
    pub async fn push(&self, recipient_id: i64, event: &QueuedEvent) -> Result<usize> {
        let key = Self::key_for(recipient_id);
        let payload = serde_json::to_string(event)?;
        let pushed = self.store.push_back(&key, payload, self.max_len).await?;

        if pushed.evicted > 0 {
            warn!(
                recipient_id,
                evicted = pushed.evicted,
                max_len = ?self.max_len,
                "notification queue full, dropped oldest events"
            );
        }

        Ok(pushed.len)
    }

    /// Removes and returns the oldest event, or `None` when the queue is
    /// empty. Entries that no longer parse are consumed and skipped.
    pub async fn pop(&self, recipient_id: i64) -> Result<Option<QueuedEvent>> {
        let key = Self::key_for(recipient_id);
        loop {
            let Some(payload) = self.store.pop_front(&key).await? else {
                return Ok(None);
            };
            match serde_json::from_str::<QueuedEvent>(&payload) {
                Ok(event) => return Ok(Some(event)),
                Err(err) => {
                    warn!(error = ?err, recipient_id, "dropping malformed queued notification");
                }
            }
        }
    }

    pub async fn peek(&self, recipient_id: i64) -> Result<Option<QueuedEvent>> {
        let key = Self::key_for(recipient_id);
        let Some(payload) = self.store.peek_front(&key).await? else {
            return Ok(None);
        };
        let event = serde_json::from_str(&payload)
            .with_context(|| format!("malformed queued notification for {}", recipient_id))?;
        Ok(Some(event))
    }

    pub async fn size(&self, recipient_id: i64) -> Result<usize> {
        self.store.len(&Self::key_for(recipient_id)).await
    }

    pub async fn is_empty(&self, recipient_id: i64) -> Result<bool> {
        Ok(self.size(recipient_id).await? == 0)
    }

    pub async fn exists(&self, recipient_id: i64) -> Result<bool> {
        self.store.exists(&Self::key_for(recipient_id)).await
    }

    pub async fn clear(&self, recipient_id: i64) -> Result<bool> {
        self.store.delete(&Self::key_for(recipient_id)).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

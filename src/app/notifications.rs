use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::app::notification_queue::NotificationQueue;
use crate::domain::engagement::PostLike;
use crate::domain::notification::{
    NewNotification, Notification, NotificationKind, NotificationSubject, QueuedEvent,
};
use crate::domain::social_graph::Follow;
use crate::infra::db::Db;

/// Relational side of notifications.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, new: NewNotification) -> Result<Notification>;

    async fn get(&self, notification_id: i64) -> Result<Option<Notification>>;

    async fn get_by_follow_id(&self, follow_id: i64) -> Result<Option<Notification>>;

    async fn get_by_post_like_id(&self, post_like_id: i64) -> Result<Option<Notification>>;

    /// Newest first: `created_at DESC, id DESC`.
    async fn list_by_recipient(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// Sets `read` when it is still false. Returns the row as stored
    /// afterwards, or `None` if the id is unknown.
    async fn mark_read(&self, notification_id: i64) -> Result<Option<Notification>>;

    async fn ping(&self) -> Result<()>;
}

const NOTIFICATION_COLUMNS: &str =
    "id, notification_type, follow_id, post_like_id, notified_user_id, read, created_at, updated_at";

#[derive(Clone)]
pub struct PgNotificationStore {
    db: Db,
}

impl PgNotificationStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    let id: i64 = row.try_get("id")?;
    let kind: String = row.try_get("notification_type")?;
    let kind = NotificationKind::from_db(&kind)
        .ok_or_else(|| anyhow!("unknown notification type {} on notification {}", kind, id))?;
    let subject = NotificationSubject::from_columns(
        kind,
        row.try_get("follow_id")?,
        row.try_get("post_like_id")?,
    )
    .ok_or_else(|| anyhow!("notification {} references do not match its type", id))?;

    Ok(Notification {
        id,
        subject,
        notified_user_id: row.try_get("notified_user_id")?,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn create(&self, new: NewNotification) -> Result<Notification> {
        let row = sqlx::query(&format!(
            "INSERT INTO notifications (notification_type, follow_id, post_like_id, notified_user_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            NOTIFICATION_COLUMNS
        ))
        .bind(new.subject.kind().as_db())
        .bind(new.subject.follow_id())
        .bind(new.subject.post_like_id())
        .bind(new.notified_user_id)
        .fetch_one(self.db.pool())
        .await?;

        notification_from_row(&row)
    }

    async fn get(&self, notification_id: i64) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(notification_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn get_by_follow_id(&self, follow_id: i64) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE follow_id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(follow_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn get_by_post_like_id(&self, post_like_id: i64) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE post_like_id = $1",
            NOTIFICATION_COLUMNS
        ))
        .bind(post_like_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn list_by_recipient(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications \
             WHERE notified_user_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_read(&self, notification_id: i64) -> Result<Option<Notification>> {
        let row = sqlx::query(&format!(
            "UPDATE notifications \
             SET read = true, updated_at = now() \
             WHERE id = $1 AND read = false \
             RETURNING {}",
            NOTIFICATION_COLUMNS
        ))
        .bind(notification_id)
        .fetch_optional(self.db.pool())
        .await?;

        match row {
            Some(row) => Ok(Some(notification_from_row(&row)?)),
            None => self.get(notification_id).await,
        }
    }

    async fn ping(&self) -> Result<()> {
        self.db.ping().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkReadOutcome {
    Marked(Notification),
    NotFound,
    Forbidden,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreHealth {
    pub relational: bool,
    pub queue: bool,
}

/// Ties the relational record and the live queue together.
#[derive(Clone)]
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    queue: NotificationQueue,
    page_size: i64,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, queue: NotificationQueue, page_size: i64) -> Self {
        Self {
            store,
            queue,
            page_size,
        }
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    /// Records and queues the notification for a new follow. Calling it again
    /// for the same follow reuses the stored row.
    pub async fn notify_follow(&self, follow: &Follow) -> Result<Notification> {
        let notification = match self.store.get_by_follow_id(follow.id).await? {
            Some(existing) => existing,
            None => {
                self.store
                    .create(NewNotification {
                        subject: NotificationSubject::Follow {
                            follow_id: follow.id,
                        },
                        notified_user_id: follow.following_id,
                    })
                    .await?
            }
        };

        let event = QueuedEvent::for_follow(&notification, follow);
        self.deliver(&notification, &event).await?;
        Ok(notification)
    }

    /// Records and queues the notification for a new post like. Liking one's
    /// own post yields `None`.
    pub async fn notify_post_like(&self, like: &PostLike) -> Result<Option<Notification>> {
        if like.user_id == like.post_writer_id {
            return Ok(None);
        }

        let notification = match self.store.get_by_post_like_id(like.id).await? {
            Some(existing) => existing,
            None => {
                self.store
                    .create(NewNotification {
                        subject: NotificationSubject::PostLike {
                            post_like_id: like.id,
                        },
                        notified_user_id: like.post_writer_id,
                    })
                    .await?
            }
        };

        let event = QueuedEvent::for_post_like(&notification, like);
        self.deliver(&notification, &event).await?;
        Ok(Some(notification))
    }

    /// The row is already committed here, so a failed push leaves the two
    /// stores out of step. One retry, then the failure goes to the caller.
    async fn deliver(&self, notification: &Notification, event: &QueuedEvent) -> Result<()> {
        let recipient_id = notification.notified_user_id;
        if let Err(first) = self.queue.push(recipient_id, event).await {
            tracing::warn!(error = ?first, notification_id = notification.id, recipient_id, "queue push failed, retrying");
            if let Err(err) = self.queue.push(recipient_id, event).await {
                tracing::error!(
                    error = ?err,
                    notification_id = notification.id,
                    recipient_id,
                    "notification stored but not queued for live delivery"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// One page of the recipient's notifications, newest first. Pages start
    /// at 1.
    pub async fn list_page(&self, user_id: i64, page: i64) -> Result<Vec<Notification>> {
        if page < 1 {
            return Err(anyhow!("page must be at least 1"));
        }
        let offset = (page - 1).saturating_mul(self.page_size);
        self.store
            .list_by_recipient(user_id, offset, self.page_size)
            .await
    }

    pub async fn mark_as_read(&self, notification_id: i64, caller_id: i64) -> Result<MarkReadOutcome> {
        let Some(notification) = self.store.get(notification_id).await? else {
            return Ok(MarkReadOutcome::NotFound);
        };
        if notification.notified_user_id != caller_id {
            return Ok(MarkReadOutcome::Forbidden);
        }
        if notification.read {
            return Ok(MarkReadOutcome::Marked(notification));
        }

        match self.store.mark_read(notification_id).await? {
            Some(updated) => Ok(MarkReadOutcome::Marked(updated)),
            None => Ok(MarkReadOutcome::NotFound),
        }
    }

    pub async fn health(&self) -> StoreHealth {
        StoreHealth {
            relational: self.store.ping().await.is_ok(),
            queue: self.queue.ping().await.is_ok(),
        }
    }
}

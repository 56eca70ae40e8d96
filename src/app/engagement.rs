use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::app::notifications::NotificationService;
use crate::domain::engagement::PostLike;
use crate::infra::db::Db;

#[derive(Debug, Clone, PartialEq)]
pub enum LikeOutcome {
    Created(PostLike),
    AlreadyLiked,
    UnknownPost,
}

#[async_trait]
pub trait EngagementStore: Send + Sync {
    async fn like_post(&self, user_id: i64, post_id: i64) -> Result<LikeOutcome>;

    /// Removes the like and, through the cascade, its notification.
    async fn unlike_post(&self, user_id: i64, post_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgEngagementStore {
    db: Db,
}

impl PgEngagementStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EngagementStore for PgEngagementStore {
    async fn like_post(&self, user_id: i64, post_id: i64) -> Result<LikeOutcome> {
        let writer_id: Option<i64> = sqlx::query_scalar("SELECT writer_id FROM posts WHERE id = $1")
            .bind(post_id)
            .fetch_optional(self.db.pool())
            .await?;
        let Some(writer_id) = writer_id else {
            return Ok(LikeOutcome::UnknownPost);
        };

        let row = sqlx::query(
            "INSERT INTO post_likes (user_id, post_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING id, user_id, post_id, created_at",
        )
        .bind(user_id)
        .bind(post_id)
        .fetch_optional(self.db.pool())
        .await?;

        let outcome = match row {
            Some(row) => LikeOutcome::Created(PostLike {
                id: row.get("id"),
                user_id: row.get("user_id"),
                post_id: row.get("post_id"),
                post_writer_id: writer_id,
                created_at: row.get("created_at"),
            }),
            None => LikeOutcome::AlreadyLiked,
        };
        Ok(outcome)
    }

    async fn unlike_post(&self, user_id: i64, post_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM post_likes WHERE user_id = $1 AND post_id = $2")
            .bind(user_id)
            .bind(post_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone)]
pub struct EngagementService {
    store: Arc<dyn EngagementStore>,
    notifications: NotificationService,
}

impl EngagementService {
    pub fn new(store: Arc<dyn EngagementStore>, notifications: NotificationService) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Likes the post and notifies its writer. As with follows, the like is
    /// removed again when its notification cannot be delivered.
    pub async fn like_post(&self, user_id: i64, post_id: i64) -> Result<LikeOutcome> {
        let outcome = self.store.like_post(user_id, post_id).await?;

        if let LikeOutcome::Created(like) = &outcome {
            if let Err(err) = self.notifications.notify_post_like(like).await {
                if let Err(undo) = self.store.unlike_post(user_id, post_id).await {
                    tracing::error!(
                        error = ?undo,
                        post_like_id = like.id,
                        "failed to remove like after notification failure"
                    );
                }
                return Err(err.context("failed to notify post writer"));
            }
        }

        Ok(outcome)
    }

    pub async fn unlike_post(&self, user_id: i64, post_id: i64) -> Result<bool> {
        self.store.unlike_post(user_id, post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::notification_queue::NotificationQueue;
    use crate::infra::list_store::FlakyListStore;
    use crate::infra::memory::MemoryRepository;

    #[tokio::test]
    async fn undelivered_like_is_undone_so_a_retry_notifies() {
        let repo = MemoryRepository::new();
        repo.insert_user(1).await;
        repo.insert_user(2).await;
        let post_id = repo.insert_post(2).await;
        let queue = NotificationQueue::new(Arc::new(FlakyListStore::failing_pushes(2)), 0);
        let notifications = NotificationService::new(Arc::new(repo.clone()), queue.clone(), 10);
        let engagement = EngagementService::new(Arc::new(repo.clone()), notifications);

        assert!(engagement.like_post(1, post_id).await.is_err());
        assert!(!engagement.unlike_post(1, post_id).await.unwrap());

        assert!(matches!(
            engagement.like_post(1, post_id).await.unwrap(),
            LikeOutcome::Created(_)
        ));
        assert_eq!(queue.size(2).await.unwrap(), 1);
        assert_eq!(engagement.like_post(1, post_id).await.unwrap(), LikeOutcome::AlreadyLiked);
        assert_eq!(queue.size(2).await.unwrap(), 1);
    }
}

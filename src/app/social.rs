use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

use crate::app::notifications::NotificationService;
use crate::domain::social_graph::Follow;
use crate::infra::db::Db;

#[derive(Debug, Clone, PartialEq)]
pub enum FollowOutcome {
    Created(Follow),
    AlreadyFollowing,
    SelfFollow,
    UnknownUser,
}

#[async_trait]
pub trait SocialStore: Send + Sync {
    async fn follow(&self, follower_id: i64, following_id: i64) -> Result<FollowOutcome>;

    /// Removes the follow edge and, through the cascade, its notification.
    async fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct PgSocialStore {
    db: Db,
}

impl PgSocialStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SocialStore for PgSocialStore {
    async fn follow(&self, follower_id: i64, following_id: i64) -> Result<FollowOutcome> {
        if follower_id == following_id {
            return Ok(FollowOutcome::SelfFollow);
        }

        let mut tx = self.db.pool().begin().await?;

        let exists = sqlx::query("SELECT id FROM users WHERE id = $1")
            .bind(following_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            tx.rollback().await?;
            return Ok(FollowOutcome::UnknownUser);
        }

        let row = sqlx::query(
            "INSERT INTO follows (follower_id, following_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING \
             RETURNING id, follower_id, following_id, created_at",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        let outcome = match row {
            Some(row) => FollowOutcome::Created(Follow {
                id: row.get("id"),
                follower_id: row.get("follower_id"),
                following_id: row.get("following_id"),
                created_at: row.get("created_at"),
            }),
            None => FollowOutcome::AlreadyFollowing,
        };
        Ok(outcome)
    }

    async fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
                .bind(follower_id)
                .bind(following_id)
                .execute(self.db.pool())
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Follows and their notifications.
#[derive(Clone)]
pub struct SocialService {
    store: Arc<dyn SocialStore>,
    notifications: NotificationService,
}

impl SocialService {
    pub fn new(store: Arc<dyn SocialStore>, notifications: NotificationService) -> Self {
        Self {
            store,
            notifications,
        }
    }

    /// Creates the follow and notifies the followee. A follow whose
    /// notification could not be recorded or queued is removed again, so a
    /// retried request starts from scratch.
    pub async fn follow(&self, follower_id: i64, following_id: i64) -> Result<FollowOutcome> {
        let outcome = self.store.follow(follower_id, following_id).await?;

        if let FollowOutcome::Created(follow) = &outcome {
            if let Err(err) = self.notifications.notify_follow(follow).await {
                if let Err(undo) = self.store.unfollow(follower_id, following_id).await {
                    tracing::error!(
                        error = ?undo,
                        follow_id = follow.id,
                        "failed to remove follow after notification failure"
                    );
                }
                return Err(err.context("failed to notify followee"));
            }
        }

        Ok(outcome)
    }

    pub async fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        self.store.unfollow(follower_id, following_id).await
    }
}

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use crate::app::engagement::{EngagementStore, LikeOutcome};
use crate::app::notifications::NotificationStore;
use crate::app::social::{FollowOutcome, SocialStore};
use crate::domain::engagement::PostLike;
use crate::domain::notification::{NewNotification, Notification};
use crate::domain::social_graph::Follow;

/// Process-local stand-in for the relational schema, used by tests and local
/// runs without Postgres. Mirrors the foreign keys: removing a follow or a
/// like removes the notification that points at it.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    users: HashSet<i64>,
    posts: HashMap<i64, i64>,
    follows: BTreeMap<i64, Follow>,
    likes: BTreeMap<i64, PostLike>,
    notifications: BTreeMap<i64, Notification>,
    next_id: i64,
    last_timestamp: Option<OffsetDateTime>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Microsecond precision like `timestamptz`, and strictly increasing so
    /// rows created back to back still order deterministically.
    fn now(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        let mut now = now
            .replace_nanosecond(now.microsecond() * 1_000)
            .unwrap_or(now);
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user_id: i64) {
        let mut state = self.state.lock().await;
        state.users.insert(user_id);
        state.next_id = state.next_id.max(user_id);
    }

    /// Returns the new post id.
    pub async fn insert_post(&self, writer_id: i64) -> i64 {
        let mut state = self.state.lock().await;
        let post_id = state.next_id();
        state.posts.insert(post_id, writer_id);
        post_id
    }
}

#[async_trait]
impl NotificationStore for MemoryRepository {
    async fn create(&self, new: NewNotification) -> Result<Notification> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let now = state.now();
        let notification = Notification {
            id,
            subject: new.subject,
            notified_user_id: new.notified_user_id,
            read: false,
            created_at: now,
            updated_at: now,
        };
        state.notifications.insert(id, notification.clone());
        Ok(notification)
    }

    async fn get(&self, notification_id: i64) -> Result<Option<Notification>> {
        let state = self.state.lock().await;
        Ok(state.notifications.get(&notification_id).cloned())
    }

    async fn get_by_follow_id(&self, follow_id: i64) -> Result<Option<Notification>> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .values()
            .find(|n| n.subject.follow_id() == Some(follow_id))
            .cloned())
    }

    async fn get_by_post_like_id(&self, post_like_id: i64) -> Result<Option<Notification>> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .values()
            .find(|n| n.subject.post_like_id() == Some(post_like_id))
            .cloned())
    }

    async fn list_by_recipient(
        &self,
        user_id: i64,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.notified_user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn mark_read(&self, notification_id: i64) -> Result<Option<Notification>> {
        let mut state = self.state.lock().await;
        let now = state.now();
        let Some(notification) = state.notifications.get_mut(&notification_id) else {
            return Ok(None);
        };
        if !notification.read {
            notification.read = true;
            notification.updated_at = now;
        }
        Ok(Some(notification.clone()))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl SocialStore for MemoryRepository {
    async fn follow(&self, follower_id: i64, following_id: i64) -> Result<FollowOutcome> {
        if follower_id == following_id {
            return Ok(FollowOutcome::SelfFollow);
        }

        let mut state = self.state.lock().await;
        if !state.users.contains(&following_id) {
            return Ok(FollowOutcome::UnknownUser);
        }
        let exists = state
            .follows
            .values()
            .any(|f| f.follower_id == follower_id && f.following_id == following_id);
        if exists {
            return Ok(FollowOutcome::AlreadyFollowing);
        }

        let id = state.next_id();
        let follow = Follow {
            id,
            follower_id,
            following_id,
            created_at: state.now(),
        };
        state.follows.insert(id, follow.clone());
        Ok(FollowOutcome::Created(follow))
    }

    async fn unfollow(&self, follower_id: i64, following_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let found = state
            .follows
            .values()
            .find(|f| f.follower_id == follower_id && f.following_id == following_id)
            .map(|f| f.id);
        let Some(follow_id) = found else {
            return Ok(false);
        };

        state.follows.remove(&follow_id);
        state
            .notifications
            .retain(|_, n| n.subject.follow_id() != Some(follow_id));
        Ok(true)
    }
}

#[async_trait]
impl EngagementStore for MemoryRepository {
    async fn like_post(&self, user_id: i64, post_id: i64) -> Result<LikeOutcome> {
        let mut state = self.state.lock().await;
        let Some(&writer_id) = state.posts.get(&post_id) else {
            return Ok(LikeOutcome::UnknownPost);
        };
        let exists = state
            .likes
            .values()
            .any(|l| l.user_id == user_id && l.post_id == post_id);
        if exists {
            return Ok(LikeOutcome::AlreadyLiked);
        }

        let id = state.next_id();
        let like = PostLike {
            id,
            user_id,
            post_id,
            post_writer_id: writer_id,
            created_at: state.now(),
        };
        state.likes.insert(id, like.clone());
        Ok(LikeOutcome::Created(like))
    }

    async fn unlike_post(&self, user_id: i64, post_id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        let found = state
            .likes
            .values()
            .find(|l| l.user_id == user_id && l.post_id == post_id)
            .map(|l| l.id);
        let Some(like_id) = found else {
            return Ok(false);
        };

        state.likes.remove(&like_id);
        state
            .notifications
            .retain(|_, n| n.subject.post_like_id() != Some(like_id));
        Ok(true)
    }
}

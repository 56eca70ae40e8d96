use std::fmt;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::engagement::PostLike;
use crate::domain::social_graph::Follow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Follow,
    PostLike,
}

impl NotificationKind {
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "follow" => Some(Self::Follow),
            "post_like" => Some(Self::PostLike),
            _ => None,
        }
    }

    pub fn as_db(&self) -> &'static str {
        match self {
            Self::Follow => "follow",
            Self::PostLike => "post_like",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follow => f.write_str("Follow"),
            Self::PostLike => f.write_str("PostLike"),
        }
    }
}

/// What a notification points at. Exactly one parent reference exists per
/// notification, and its variant decides the notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationSubject {
    Follow { follow_id: i64 },
    PostLike { post_like_id: i64 },
}

impl NotificationSubject {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Follow { .. } => NotificationKind::Follow,
            Self::PostLike { .. } => NotificationKind::PostLike,
        }
    }

    /// Rebuilds the subject from the nullable reference columns of a row.
    pub fn from_columns(
        kind: NotificationKind,
        follow_id: Option<i64>,
        post_like_id: Option<i64>,
    ) -> Option<Self> {
        match (kind, follow_id, post_like_id) {
            (NotificationKind::Follow, Some(follow_id), None) => Some(Self::Follow { follow_id }),
            (NotificationKind::PostLike, None, Some(post_like_id)) => {
                Some(Self::PostLike { post_like_id })
            }
            _ => None,
        }
    }

    pub fn follow_id(&self) -> Option<i64> {
        match self {
            Self::Follow { follow_id } => Some(*follow_id),
            Self::PostLike { .. } => None,
        }
    }

    pub fn post_like_id(&self) -> Option<i64> {
        match self {
            Self::Follow { .. } => None,
            Self::PostLike { post_like_id } => Some(*post_like_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    #[serde(flatten)]
    pub subject: NotificationSubject,
    pub notified_user_id: i64,
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub subject: NotificationSubject,
    pub notified_user_id: i64,
}

/// Domain payload carried by a queued event, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventDetail {
    Follow {
        follow_id: i64,
        follower_id: i64,
    },
    PostLike {
        post_like_id: i64,
        user_id_who_like: i64,
        liked_post_id: i64,
    },
}

/// Transient copy of a notification pushed onto the recipient's live queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub notification_id: i64,
    pub notified_user_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl QueuedEvent {
    pub fn for_follow(notification: &Notification, follow: &Follow) -> Self {
        Self {
            notification_id: notification.id,
            notified_user_id: notification.notified_user_id,
            created_at: notification.created_at,
            detail: EventDetail::Follow {
                follow_id: follow.id,
                follower_id: follow.follower_id,
            },
        }
    }

    pub fn for_post_like(notification: &Notification, like: &PostLike) -> Self {
        Self {
            notification_id: notification.id,
            notified_user_id: notification.notified_user_id,
            created_at: notification.created_at,
            detail: EventDetail::PostLike {
                post_like_id: like.id,
                user_id_who_like: like.user_id,
                liked_post_id: like.post_id,
            },
        }
    }

    pub fn kind(&self) -> NotificationKind {
        match self.detail {
            EventDetail::Follow { .. } => NotificationKind::Follow,
            EventDetail::PostLike { .. } => NotificationKind::PostLike,
        }
    }

    /// Client-visible cursor: the RFC 3339 creation timestamp.
    pub fn cursor(&self) -> String {
        self.created_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.created_at.unix_timestamp().to_string())
    }
}

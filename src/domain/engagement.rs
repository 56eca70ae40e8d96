use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostLike {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    /// Writer of the liked post, the recipient of the like notification.
    pub post_writer_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

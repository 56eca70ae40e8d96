use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::Response,
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::app::engagement::LikeOutcome;
use crate::app::notifications::MarkReadOutcome;
use crate::app::social::FollowOutcome;
use crate::domain::notification::Notification;
use crate::http::{AppError, AuthUser};
use crate::AppState;

const LAST_EVENT_ID: HeaderName = HeaderName::from_static("last-event-id");
// Header name used by older clients.
const LEGACY_LAST_EVENT_ID: HeaderName = HeaderName::from_static("lasteventid");
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.notifications.health().await;
    let status = if health.relational && health.queue {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse { status })
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

#[derive(Serialize)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub page: i64,
    pub page_size: i64,
}

pub async fn list_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<NotificationPage>, AppError> {
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(AppError::bad_request("page must be at least 1"));
    }

    let items = state
        .notifications
        .list_page(auth.user_id, page)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = auth.user_id, page, "failed to list notifications");
            AppError::internal("failed to list notifications")
        })?;

    Ok(Json(NotificationPage {
        items,
        page,
        page_size: state.notifications.page_size(),
    }))
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub notification: Notification,
}

pub async fn mark_notification_read(
    auth: AuthUser,
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let outcome = state
        .notifications
        .mark_as_read(id, auth.user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, notification_id = id, user_id = auth.user_id, "failed to mark notification read");
            AppError::internal("failed to mark notification read")
        })?;

    match outcome {
        MarkReadOutcome::Marked(notification) => Ok(Json(MarkReadResponse {
            status: "success",
            message: "notification marked as read",
            notification,
        })),
        MarkReadOutcome::NotFound => {
            Err(AppError::not_found("notification not found").with_code("NOTIFICATION_NOT_FOUND"))
        }
        MarkReadOutcome::Forbidden => {
            tracing::warn!(notification_id = id, user_id = auth.user_id, "mark-as-read by non-recipient");
            Err(AppError::forbidden("notification belongs to another user")
                .with_code("NOTIFICATION_FORBIDDEN"))
        }
    }
}

pub async fn stream_notifications(
    auth: AuthUser,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let last_event_id = headers
        .get(LAST_EVENT_ID)
        .or_else(|| headers.get(LEGACY_LAST_EVENT_ID))
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let frames = state
        .streamer
        .open(auth.user_id, last_event_id)
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame.encode())));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(X_ACCEL_BUFFERING, "no")
        .body(Body::from_stream(frames))
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = auth.user_id, "failed to build notification stream response");
            AppError::internal("failed to open notification stream")
        })
}

#[derive(Serialize)]
pub struct FollowResponse {
    pub followed: bool,
}

pub async fn follow_user(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<FollowResponse>, AppError> {
    let outcome = state.social.follow(auth.user_id, id).await.map_err(|err| {
        tracing::error!(error = ?err, follower_id = auth.user_id, following_id = id, "failed to follow user");
        AppError::internal("failed to follow user")
    })?;

    match outcome {
        FollowOutcome::Created(_) => Ok(Json(FollowResponse { followed: true })),
        FollowOutcome::AlreadyFollowing => Ok(Json(FollowResponse { followed: false })),
        FollowOutcome::SelfFollow => Err(AppError::bad_request("cannot follow yourself")),
        FollowOutcome::UnknownUser => Err(AppError::not_found("user not found")),
    }
}

#[derive(Serialize)]
pub struct UnfollowResponse {
    pub unfollowed: bool,
}

pub async fn unfollow_user(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UnfollowResponse>, AppError> {
    if auth.user_id == id {
        return Err(AppError::bad_request("cannot unfollow yourself"));
    }

    let unfollowed = state.social.unfollow(auth.user_id, id).await.map_err(|err| {
        tracing::error!(error = ?err, follower_id = auth.user_id, following_id = id, "failed to unfollow user");
        AppError::internal("failed to unfollow user")
    })?;

    Ok(Json(UnfollowResponse { unfollowed }))
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub created: bool,
}

pub async fn like_post(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<LikeResponse>, AppError> {
    let outcome = state
        .engagement
        .like_post(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = auth.user_id, post_id = id, "failed to like post");
            AppError::internal("failed to like post")
        })?;

    match outcome {
        LikeOutcome::Created(_) => Ok(Json(LikeResponse { created: true })),
        LikeOutcome::AlreadyLiked => Ok(Json(LikeResponse { created: false })),
        LikeOutcome::UnknownPost => Err(AppError::not_found("post not found")),
    }
}

pub async fn unlike_post(
    Path(id): Path<i64>,
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .engagement
        .unlike_post(auth.user_id, id)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, user_id = auth.user_id, post_id = id, "failed to unlike post");
            AppError::internal("failed to unlike post")
        })?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("like not found"))
    }
}

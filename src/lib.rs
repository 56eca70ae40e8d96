pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use crate::app::auth::AuthService;
use crate::app::engagement::EngagementService;
use crate::app::notification_stream::NotificationStreamer;
use crate::app::notifications::NotificationService;
use crate::app::social::SocialService;

#[derive(Clone)]
pub struct AppState {
    pub notifications: NotificationService,
    pub streamer: NotificationStreamer,
    pub social: SocialService,
    pub engagement: EngagementService,
    pub auth: AuthService,
}

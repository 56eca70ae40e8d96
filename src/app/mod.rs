pub mod auth;
pub mod engagement;
pub mod notification_queue;
pub mod notification_stream;
pub mod notifications;
pub mod social;

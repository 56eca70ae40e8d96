use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sns::app::auth::AuthService;
use sns::app::engagement::{EngagementService, PgEngagementStore};
use sns::app::notification_queue::NotificationQueue;
use sns::app::notification_stream::{shutdown_channel, NotificationStreamer, ShutdownTrigger};
use sns::app::notifications::{NotificationService, PgNotificationStore};
use sns::app::social::{PgSocialStore, SocialService};
use sns::config::AppConfig;
use sns::infra::{cache::RedisCache, db::Db};
use sns::{http, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let db = Db::connect(&config.database_url, &config.db_pool.pool_settings()).await?;
    let cache = RedisCache::connect(&config.redis_url).await?;

    let queue = NotificationQueue::new(Arc::new(cache), config.notifications.queue_max_len);
    let (trigger, shutdown) = shutdown_channel();

    let notifications = NotificationService::new(
        Arc::new(PgNotificationStore::new(db.clone())),
        queue.clone(),
        config.notifications.page_size,
    );

    let state = AppState {
        social: SocialService::new(Arc::new(PgSocialStore::new(db.clone())), notifications.clone()),
        engagement: EngagementService::new(Arc::new(PgEngagementStore::new(db)), notifications.clone()),
        notifications,
        streamer: NotificationStreamer::new(
            queue,
            config.notifications.stream_settings(),
            shutdown,
        ),
        auth: AuthService::new(config.paseto_access_key, config.access_ttl_minutes),
    };

    let cors = http::cors_layer(&config.cors_allowed_origins)?;
    let app = http::app(state, cors);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(
        poll_interval_ms = config.notifications.poll_interval_ms,
        cursor_mode = ?config.notifications.cursor_mode,
        "listening on {}",
        config.http_addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(trigger))
        .await?;

    Ok(())
}

/// Waits for Ctrl+C or SIGTERM, then ends open notification streams so the
/// graceful shutdown is not held up by them.
async fn shutdown_signal(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
    trigger.fire();
}

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::app::notification_stream::{CursorMode, StreamSettings};
use crate::infra::db::PoolSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub database_url: String,
    pub redis_url: String,
    pub db_pool: DbPoolConfig,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub cors_allowed_origins: Vec<String>,
    pub notifications: NotificationConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DbPoolConfig {
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 25,
            connect_timeout_seconds: 5,
            idle_timeout_seconds: 300,
            max_lifetime_seconds: 1800,
        }
    }
}

impl DbPoolConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
        };
        if config.max_connections == 0 {
            return Err(anyhow!("invalid DB_MAX_CONNECTIONS: must be positive"));
        }
        Ok(config)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.connect_timeout_seconds),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            max_lifetime: Duration::from_secs(self.max_lifetime_seconds),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotificationConfig {
    pub poll_interval_ms: u64,
    pub retry_ms: u64,
    /// 0 keeps idle streams open.
    pub idle_timeout_seconds: u64,
    /// 0 leaves queues unbounded.
    pub queue_max_len: usize,
    pub page_size: i64,
    pub cursor_mode: CursorMode,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            retry_ms: 3000,
            idle_timeout_seconds: 0,
            queue_max_len: 1000,
            page_size: 10,
            cursor_mode: CursorMode::Echo,
        }
    }
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            poll_interval_ms: env_or_parse("NOTIFICATION_POLL_INTERVAL_MS", "1000")?,
            retry_ms: env_or_parse("NOTIFICATION_RETRY_MS", "3000")?,
            idle_timeout_seconds: env_or_parse("NOTIFICATION_IDLE_TIMEOUT_SECONDS", "0")?,
            queue_max_len: env_or_parse("NOTIFICATION_QUEUE_MAX_LEN", "1000")?,
            page_size: env_or_parse("NOTIFICATIONS_PAGE_SIZE", "10")?,
            cursor_mode: env_or_parse("NOTIFICATION_CURSOR_MODE", "echo")?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("invalid NOTIFICATION_POLL_INTERVAL_MS: must be positive"));
        }
        if self.page_size < 1 {
            return Err(anyhow!("invalid NOTIFICATIONS_PAGE_SIZE: must be positive"));
        }
        Ok(())
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry: Duration::from_millis(self.retry_ms),
            idle_timeout: (self.idle_timeout_seconds > 0)
                .then(|| Duration::from_secs(self.idle_timeout_seconds)),
            cursor_mode: self.cursor_mode,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        Ok(Self {
            http_addr,
            database_url: env_or_err("DATABASE_URL")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            db_pool: DbPoolConfig::from_env()?,
            paseto_access_key: env_key_32("PASETO_ACCESS_KEY")?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "15")?,
            cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
            notifications: NotificationConfig::from_env()?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

/// Comma separated; empty entries are ignored.
fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}

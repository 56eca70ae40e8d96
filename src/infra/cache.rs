use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use crate::infra::list_store::{ListStore, Pushed};

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ListStore for RedisCache {
    async fn push_back(&self, key: &str, value: String, max_len: Option<usize>) -> Result<Pushed> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let Some(max_len) = max_len else {
            let len: usize = conn.rpush(key, value).await?;
            return Ok(Pushed { len, evicted: 0 });
        };

        // RPUSH + LTRIM run inside MULTI/EXEC so a concurrent LPOP never
        // observes the list above its cap.
        let keep_from = -(max_len as isize);
        let (pushed_len, len): (usize, usize) = redis::pipe()
            .atomic()
            .rpush(key, value)
            .ltrim(key, keep_from, -1)
            .ignore()
            .llen(key)
            .query_async(&mut conn)
            .await?;

        Ok(Pushed {
            len,
            evicted: pushed_len.saturating_sub(len),
        })
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value = redis::cmd("LPOP")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.lindex(key, 0).await?;
        Ok(value)
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

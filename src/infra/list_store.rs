use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

/// Result of appending to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed {
    /// Length of the list after the push (and after trimming).
    pub len: usize,
    /// Number of entries dropped from the head to respect the cap.
    pub evicted: usize,
}

/// Atomic list operations keyed by string.
///
/// Each call must be atomic per key at the store level; callers add no
/// locking of their own. Entries are appended at the tail and consumed from
/// the head.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Append `value` to the tail of `key`, creating the list if needed.
    /// With `max_len`, the oldest entries beyond the cap are removed in the
    /// same atomic step.
    async fn push_back(&self, key: &str, value: String, max_len: Option<usize>) -> Result<Pushed>;

    async fn pop_front(&self, key: &str) -> Result<Option<String>>;

    async fn peek_front(&self, key: &str) -> Result<Option<String>>;

    async fn len(&self, key: &str) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Returns whether a list was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn ping(&self) -> Result<()>;
}

/// Process-local list store with Redis list semantics: a list that becomes
/// empty stops existing.
#[derive(Clone, Default)]
pub struct MemoryListStore {
    lists: Arc<Mutex<HashMap<String, VecDeque<String>>>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn push_back(&self, key: &str, value: String, max_len: Option<usize>) -> Result<Pushed> {
        let mut lists = self.lists.lock().await;
        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value);

        let mut evicted = 0;
        if let Some(max_len) = max_len {
            while list.len() > max_len {
                list.pop_front();
                evicted += 1;
            }
        }
        let len = list.len();
        if len == 0 {
            lists.remove(key);
        }

        Ok(Pushed { len, evicted })
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut lists = self.lists.lock().await;
        let Some(list) = lists.get_mut(key) else {
            return Ok(None);
        };
        let value = list.pop_front();
        if list.is_empty() {
            lists.remove(key);
        }
        Ok(value)
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>> {
        let lists = self.lists.lock().await;
        Ok(lists.get(key).and_then(|list| list.front().cloned()))
    }

    async fn len(&self, key: &str) -> Result<usize> {
        let lists = self.lists.lock().await;
        Ok(lists.get(key).map_or(0, VecDeque::len))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let lists = self.lists.lock().await;
        Ok(lists.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut lists = self.lists.lock().await;
        Ok(lists.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Memory store whose first `n` pushes fail, for exercising producer
/// retries.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct FlakyListStore {
    inner: MemoryListStore,
    failing_pushes: Arc<std::sync::atomic::AtomicUsize>,
}

#[cfg(test)]
impl FlakyListStore {
    pub(crate) fn failing_pushes(n: usize) -> Self {
        Self {
            inner: MemoryListStore::new(),
            failing_pushes: Arc::new(std::sync::atomic::AtomicUsize::new(n)),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl ListStore for FlakyListStore {
    async fn push_back(&self, key: &str, value: String, max_len: Option<usize>) -> Result<Pushed> {
        use std::sync::atomic::Ordering;

        let failed = self
            .failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow::anyhow!("connection reset"));
        }
        self.inner.push_back(key, value, max_len).await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.inner.pop_front(key).await
    }

    async fn peek_front(&self, key: &str) -> Result<Option<String>> {
        self.inner.peek_front(key).await
    }

    async fn len(&self, key: &str) -> Result<usize> {
        self.inner.len(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

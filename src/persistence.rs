//! Durable mirror of conversation logs
//!
//! Each conversation is stored under one key derived from its slug. The
//! adapter never originates changes except when hydrating a fresh engine.

mod sqlite;

pub use sqlite::SqliteKv;

use crate::message::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to serialize conversation: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] KvError),
}

/// String key/value surface backing persistence.
///
/// Every operation fails with `KvError` when the backing storage does.
pub trait KvStore: Send + Sync {
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    /// # Errors
    ///
    /// Fails if the backing storage rejects the write.
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    /// Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Fails if the backing storage rejects the delete.
    fn remove(&self, key: &str) -> Result<(), KvError>;
    /// Every stored key starting with `prefix`
    ///
    /// # Errors
    ///
    /// Fails if the backing storage cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        (**self).remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        (**self).keys_with_prefix(prefix)
    }
}

/// Process-local key/value store
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, KvError> {
        self.entries
            .lock()
            .map_err(|_| KvError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .entries()?
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

const KEY_PREFIX: &str = "chat_";

/// Key under which a conversation's log is stored
pub fn storage_key(slug: &str) -> String {
    format!("{KEY_PREFIX}{slug}")
}

/// Serializes conversation logs into a `KvStore`
#[derive(Clone)]
pub struct Persistence {
    kv: Arc<dyn KvStore>,
}

impl Persistence {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    /// Load the stored log for `slug`.
    ///
    /// Missing, unreadable or schema-mismatched data yields an empty log.
    /// Messages persisted mid-stream are closed: a stored stream is never
    /// still in flight.
    pub fn load(&self, slug: &str) -> Vec<Message> {
        let key = storage_key(slug);
        let raw = match self.kv.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(slug = %slug, error = %e, "Failed to read stored conversation");
                return Vec::new();
            }
        };

        let mut messages: Vec<Message> = match serde_json::from_str(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(
                    slug = %slug,
                    error = %e,
                    "Discarding unreadable stored conversation"
                );
                return Vec::new();
            }
        };

        let mut closed = 0usize;
        for message in messages.iter_mut().filter(|m| m.streaming) {
            message.streaming = false;
            closed += 1;
        }
        if closed > 0 {
            tracing::info!(
                slug = %slug,
                closed,
                "Closed messages left streaming by a previous session"
            );
        }

        messages
    }

    /// Store the full log for `slug`. An empty log removes the entry.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be serialized or the backing store rejects
    /// the write.
    pub fn save(&self, slug: &str, messages: &[Message]) -> Result<(), PersistenceError> {
        if messages.is_empty() {
            return self.remove(slug);
        }
        let raw = serde_json::to_string(messages)?;
        self.kv.set(&storage_key(slug), &raw)?;
        Ok(())
    }

    /// Remove the stored log for `slug`.
    ///
    /// # Errors
    ///
    /// Fails if the backing store cannot delete the entry.
    pub fn remove(&self, slug: &str) -> Result<(), PersistenceError> {
        self.kv.remove(&storage_key(slug))?;
        Ok(())
    }

    /// Slugs with a stored conversation, sorted. Unreadable storage yields none.
    pub fn stored_slugs(&self) -> Vec<String> {
        let keys = match self.kv.keys_with_prefix(KEY_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list stored conversations");
                return Vec::new();
            }
        };
        let mut slugs: Vec<String> = keys
            .iter()
            .filter_map(|key| key.strip_prefix(KEY_PREFIX))
            .map(str::to_string)
            .collect();
        slugs.sort();
        slugs
    }
}

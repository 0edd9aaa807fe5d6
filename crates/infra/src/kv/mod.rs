//! Durable key-value store seam.
//!
//! The job state store only needs a handful of Redis-shaped primitives. They
//! are expressed as an async trait so the same state machine runs against
//! Redis in production and an in-process map in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use in_memory::InMemoryKeyValueStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisKeyValueStore;

/// Key-value store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    /// The store could not be reached; nothing can be assumed about the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store rejected the command (e.g. wrong value type for a key).
    #[error("store command failed: {0}")]
    Command(String),
    /// A stored value could not be interpreted.
    #[error("could not decode stored value for {key}: {reason}")]
    Decode { key: String, reason: String },
}

impl KvError {
    pub fn decode(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Primitives the job state store is built on.
///
/// Implementations must be safe for concurrent use from many tasks and
/// processes; every method is a single atomic store operation.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` only if it does not exist. Returns whether the value was set.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    /// Delete `key` (string or hash). Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Delete `key` only while it still holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;

    /// All fields of a hash; empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError>;

    /// Field names of a hash; empty when the key does not exist.
    async fn hash_keys(&self, key: &str) -> Result<Vec<String>, KvError>;
}

#[async_trait]
impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, KvError> {
        (**self).set_if_absent(key, value).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        (**self).set(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        (**self).delete(key).await
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, KvError> {
        (**self).delete_if_equals(key, expected).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        (**self).hash_set(key, field, value).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        (**self).hash_get_all(key).await
    }

    async fn hash_keys(&self, key: &str) -> Result<Vec<String>, KvError> {
        (**self).hash_keys(key).await
    }
}

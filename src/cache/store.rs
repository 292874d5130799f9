//! Backing key/sorted-set store contract.
//!
//! Structures never talk to Redis directly: they read through [`CacheStore`]
//! and stage every mutation into a [`WriteBatch`], which the backend applies
//! atomically. Seeders rely on that to commit only fully scanned pages.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of a sorted-set traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    /// Lowest score first.
    Ascending,
    /// Highest score first (newest for time scores).
    Descending,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("value stored at `{key}` has the wrong type")]
    WrongType { key: String },
}

/// A single staged mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// Ordered list of mutations applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.ops.push(WriteOp::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
    }

    pub fn delete(&mut self, key: impl Into<String>) {
        self.ops.push(WriteOp::Delete { key: key.into() });
    }

    pub fn zadd(&mut self, key: impl Into<String>, member: impl Into<String>, score: f64) {
        self.ops.push(WriteOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.ops.push(WriteOp::ZRem {
            key: key.into(),
            member: member.into(),
        });
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) {
        self.ops.push(WriteOp::Expire {
            key: key.into(),
            ttl,
        });
    }

    pub fn append(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Key/value and sorted-set operations the cache structures depend on.
///
/// Ranks and range bounds are zero-based and inclusive, matching Redis.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Reset a key's TTL. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;

    async fn zrank(&self, key: &str, member: &str, order: Order)
    -> Result<Option<u64>, StoreError>;

    async fn zrange(
        &self,
        key: &str,
        order: Order,
        start: u64,
        stop: u64,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    async fn zrange_by_score(
        &self,
        key: &str,
        order: Order,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_staging_order() {
        let mut batch = WriteBatch::new();
        batch.set("ticket:a", "{}", Duration::from_secs(5));
        batch.zadd("ticket-timeline", "a", 1.0);
        batch.expire("ticket-timeline", Duration::from_secs(5));

        let mut tail = WriteBatch::new();
        tail.zrem("ticket-timeline", "b");
        batch.append(tail);

        assert_eq!(batch.len(), 4);
        assert!(matches!(batch.ops()[0], WriteOp::Set { .. }));
        assert!(matches!(batch.ops()[3], WriteOp::ZRem { .. }));
    }
}

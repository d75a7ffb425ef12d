//! Hot-path state store (spec.md §4.1) and the other cache-resident
//! concerns of §6's key layout: sessions, market prices, the fan-out ring
//! membership set, and the persistence-worker DLQ.
//!
//! `Cache` is an `async_trait` port (SPEC_FULL.md §B) with one production
//! adapter over `redis::aio::ConnectionManager`, which reconnects
//! transparently -- the same reason the teacher's scraper modules favor
//! connection-managed clients over raw sockets. Sets are full-blob
//! `SET key value` writes (single-write atomic replace per spec.md §4.1);
//! no field-level mutation is ever issued against a snapshot key.

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

use crate::domain::{HotSnapshot, RulesSnapshot};

pub mod keys;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: String, ttl_secs: Option<u64>) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Append to the right of a list, used by the persistence worker's DLQ
    /// (spec.md §4.10).
    async fn list_push(&self, key: &str, value: String, ttl_secs: Option<u64>) -> anyhow::Result<()>;
    async fn list_len(&self, key: &str) -> anyhow::Result<i64>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>>;

    /// All keys matching a glob pattern, used by the per-assessment worker
    /// sweeps (`assessment:*:state`, `assessment:*:rules`).
    async fn scan_keys(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()>;

    /// Set membership, used only for `websocket:nodes` (spec.md §6's fan-out
    /// node registration set).
    async fn set_add(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()>;
    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>>;
}

/// Plain JSON helpers over a `&dyn Cache`, kept as free functions (rather
/// than generic trait methods) so the `Cache` port itself stays object-safe
/// and every call site can hold `Arc<dyn Cache>` uniformly.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match cache.get_raw(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + Sync>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    cache.set_raw(key, raw, None).await
}

pub async fn get_snapshot(cache: &dyn Cache, assessment_id: Uuid) -> anyhow::Result<Option<HotSnapshot>> {
    get_json(cache, &keys::assessment_state(assessment_id)).await
}

pub async fn set_snapshot(
    cache: &dyn Cache,
    assessment_id: Uuid,
    snapshot: &HotSnapshot,
) -> anyhow::Result<()> {
    set_json(cache, &keys::assessment_state(assessment_id), snapshot).await
}

pub async fn delete_snapshot(cache: &dyn Cache, assessment_id: Uuid) -> anyhow::Result<()> {
    cache.delete(&keys::assessment_state(assessment_id)).await
}

pub async fn get_funded_snapshot(
    cache: &dyn Cache,
    funded_id: Uuid,
) -> anyhow::Result<Option<HotSnapshot>> {
    get_json(cache, &keys::funded_state(funded_id)).await
}

pub async fn set_funded_snapshot(
    cache: &dyn Cache,
    funded_id: Uuid,
    snapshot: &HotSnapshot,
) -> anyhow::Result<()> {
    set_json(cache, &keys::funded_state(funded_id), snapshot).await
}

pub async fn delete_funded_snapshot(cache: &dyn Cache, funded_id: Uuid) -> anyhow::Result<()> {
    cache.delete(&keys::funded_state(funded_id)).await
}

pub async fn get_rules(cache: &dyn Cache, assessment_id: Uuid) -> anyhow::Result<Option<RulesSnapshot>> {
    get_json(cache, &keys::assessment_rules(assessment_id)).await
}

pub async fn set_rules(
    cache: &dyn Cache,
    assessment_id: Uuid,
    rules: &RulesSnapshot,
) -> anyhow::Result<()> {
    set_json(cache, &keys::assessment_rules(assessment_id), rules).await
}

pub async fn get_funded_rules(cache: &dyn Cache, funded_id: Uuid) -> anyhow::Result<Option<RulesSnapshot>> {
    get_json(cache, &keys::funded_rules(funded_id)).await
}

pub async fn set_funded_rules(
    cache: &dyn Cache,
    funded_id: Uuid,
    rules: &RulesSnapshot,
) -> anyhow::Result<()> {
    set_json(cache, &keys::funded_rules(funded_id), rules).await
}

/// Production adapter over Redis.
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_raw(&self, key: &str, value: String, ttl_secs: Option<u64>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        match ttl_secs {
            Some(ttl) => conn.set_ex(key, value, ttl).await?,
            None => conn.set(key, value).await?,
        };
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn list_push(&self, key: &str, value: String, ttl_secs: Option<u64>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(key, value).await?;
        if let Some(ttl) = ttl_secs {
            let _: bool = conn.expire(key, ttl as i64).await?;
        }
        Ok(())
    }

    async fn list_len(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(key).await?)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn scan_keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            out.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, message).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }
}

/// In-memory fake used by saga/worker unit tests (SPEC_FULL.md §A.5),
/// matching the teacher's preference for substituting fakes behind a trait
/// rather than spinning up real Redis in tests.
#[cfg(any(test, feature = "test-fakes"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeCache {
        strings: Mutex<HashMap<String, String>>,
        lists: Mutex<HashMap<String, Vec<String>>>,
        sets: Mutex<HashMap<String, std::collections::HashSet<String>>>,
        published: Mutex<Vec<(String, String)>>,
    }

    impl FakeCache {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published_messages(&self) -> Vec<(String, String)> {
            self.published.lock().clone()
        }
    }

    #[async_trait]
    impl Cache for FakeCache {
        async fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>> {
            Ok(self.strings.lock().get(key).cloned())
        }

        async fn set_raw(
            &self,
            key: &str,
            value: String,
            _ttl_secs: Option<u64>,
        ) -> anyhow::Result<()> {
            self.strings.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.strings.lock().remove(key);
            Ok(())
        }

        async fn list_push(
            &self,
            key: &str,
            value: String,
            _ttl_secs: Option<u64>,
        ) -> anyhow::Result<()> {
            self.lists.lock().entry(key.to_string()).or_default().push(value);
            Ok(())
        }

        async fn list_len(&self, key: &str) -> anyhow::Result<i64> {
            Ok(self.lists.lock().get(key).map(|v| v.len()).unwrap_or(0) as i64)
        }

        async fn list_range(
            &self,
            key: &str,
            _start: isize,
            _stop: isize,
        ) -> anyhow::Result<Vec<String>> {
            Ok(self.lists.lock().get(key).cloned().unwrap_or_default())
        }

        async fn scan_keys(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
            let prefix = pattern.trim_end_matches('*');
            Ok(self
                .strings
                .lock()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn publish(&self, channel: &str, message: String) -> anyhow::Result<()> {
            self.published.lock().push((channel.to_string(), message));
            Ok(())
        }

        async fn set_add(&self, key: &str, member: &str) -> anyhow::Result<()> {
            self.sets
                .lock()
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string());
            Ok(())
        }

        async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
            if let Some(members) = self.sets.lock().get_mut(key) {
                members.remove(member);
            }
            Ok(())
        }

        async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>> {
            Ok(self
                .sets
                .lock()
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        }
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::keyed::{
    KeyedStore, StoreResult, StoreStatus, bump_error, bump_usage, token_cas_allows,
};

#[derive(Debug, Default)]
struct Tables {
    kv: HashMap<String, (String, Option<Instant>)>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl Tables {
    fn live_kv(&mut self, key: &str) -> Option<&String> {
        if let Some((_, Some(deadline))) = self.kv.get(key)
            && *deadline <= Instant::now()
        {
            self.kv.remove(key);
            return None;
        }
        self.kv.get(key).map(|(value, _)| value)
    }
}

/// In-process [`KeyedStore`]. Backs tests and redis-less deployments; all
/// compound operations run under one lock so per-key linearizability holds
/// trivially.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.tables.lock().unwrap().live_kv(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()> {
        let deadline = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        self.tables
            .lock()
            .unwrap()
            .kv
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.tables.lock().unwrap().kv.remove(key);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.tables
            .lock()
            .unwrap()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(hash) = tables.hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                tables.hashes.remove(key);
            }
        }
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.tables
            .lock()
            .unwrap()
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        if let Some(set) = self.tables.lock().unwrap().sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn atomic_usage_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.lock().unwrap();
        let Some(raw) = tables.hashes.get(pool_key).and_then(|hash| hash.get(uuid)) else {
            return Err(crate::keyed::StoreError::Missing(format!(
                "{pool_key}/{uuid}"
            )));
        };
        let (updated, count) = bump_usage(raw, timestamp)?;
        tables
            .hashes
            .get_mut(pool_key)
            .unwrap()
            .insert(uuid.to_string(), updated);
        Ok(count)
    }

    async fn atomic_error_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
        message: &str,
        mark_unhealthy: bool,
    ) -> StoreResult<u32> {
        let mut tables = self.tables.lock().unwrap();
        let Some(raw) = tables.hashes.get(pool_key).and_then(|hash| hash.get(uuid)) else {
            return Err(crate::keyed::StoreError::Missing(format!(
                "{pool_key}/{uuid}"
            )));
        };
        let (updated, count) = bump_error(raw, timestamp, message, mark_unhealthy)?;
        tables
            .hashes
            .get_mut(pool_key)
            .unwrap()
            .insert(uuid.to_string(), updated);
        Ok(count)
    }

    async fn atomic_token_update(
        &self,
        token_key: &str,
        new_token: &str,
        expected_refresh_token: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().unwrap();
        let current = tables.live_kv(token_key).cloned();
        if !token_cas_allows(current.as_deref(), expected_refresh_token) {
            return Ok(false);
        }
        let deadline = ttl_seconds.map(|ttl| Instant::now() + Duration::from_secs(ttl));
        tables
            .kv
            .insert(token_key.to_string(), (new_token.to_string(), deadline));
        Ok(true)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn status(&self) -> StoreStatus {
        StoreStatus {
            connected: true,
            queued_writes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn usage_updates_are_atomic_under_contention() {
        let store = Arc::new(MemoryStore::new());
        store
            .hash_set("pools:x", "u1", r#"{"usageCount":0}"#)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .atomic_usage_update("pools:x", "u1", "2026-01-01T00:00:00Z")
                    .await
                    .unwrap()
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        // Every increment observed exactly once.
        assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn token_cas_rejects_stale_writer() {
        let store = MemoryStore::new();
        store
            .set("tokens:a", r#"{"accessToken":"1","refreshToken":"r1"}"#, None)
            .await
            .unwrap();

        // B refreshes first and rotates the refresh token.
        assert!(
            store
                .atomic_token_update(
                    "tokens:a",
                    r#"{"accessToken":"2","refreshToken":"r2"}"#,
                    Some("r1"),
                    None,
                )
                .await
                .unwrap()
        );
        // A still expects r1; its write must be rejected.
        assert!(
            !store
                .atomic_token_update(
                    "tokens:a",
                    r#"{"accessToken":"3","refreshToken":"r3"}"#,
                    Some("r1"),
                    None,
                )
                .await
                .unwrap()
        );
        let raw = store.get("tokens:a").await.unwrap().unwrap();
        assert!(raw.contains("\"accessToken\":\"2\""));
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(0)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}

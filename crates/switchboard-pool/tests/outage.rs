use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use switchboard_common::{Credential, ProviderType};
use switchboard_pool::{PoolManager, PoolSettings};
use switchboard_storage::{KeyedStore, MemoryStore, Storage, StoreError, StoreResult, StoreStatus};

/// Delegates to a [`MemoryStore`] but fails every call while `down`.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyedStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()> {
        self.check()?;
        self.inner.set(key, value, ttl_seconds).await
    }
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.delete(key).await
    }
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.check()?;
        self.inner.hash_get_all(key).await
    }
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.check()?;
        self.inner.hash_get(key, field).await
    }
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.hash_set(key, field, value).await
    }
    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.hash_delete(key, field).await
    }
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.set_add(key, member).await
    }
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        self.inner.set_members(key).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.check()?;
        self.inner.set_remove(key, member).await
    }
    async fn atomic_usage_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
    ) -> StoreResult<u64> {
        self.check()?;
        self.inner.atomic_usage_update(pool_key, uuid, timestamp).await
    }
    async fn atomic_error_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
        message: &str,
        mark_unhealthy: bool,
    ) -> StoreResult<u32> {
        self.check()?;
        self.inner
            .atomic_error_update(pool_key, uuid, timestamp, message, mark_unhealthy)
            .await
    }
    async fn atomic_token_update(
        &self,
        token_key: &str,
        new_token: &str,
        expected_refresh_token: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner
            .atomic_token_update(token_key, new_token, expected_refresh_token, ttl_seconds)
            .await
    }
    async fn ping(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }
    fn status(&self) -> StoreStatus {
        StoreStatus {
            connected: !self.down.load(Ordering::SeqCst),
            queued_writes: 0,
        }
    }
}

#[tokio::test]
async fn transient_outage_does_not_lose_credentials() {
    let dir = tempfile::tempdir().unwrap();
    let flaky = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        down: AtomicBool::new(false),
    });
    let storage = Storage::with_store(flaky.clone(), "test:", dir.path().to_str().unwrap());
    let manager = Arc::new(PoolManager::new(storage, PoolSettings::default()));

    for uuid in ["a", "b", "c"] {
        manager
            .add(Credential::new(uuid, ProviderType::ClaudeKiroOauth))
            .await
            .unwrap();
    }
    let mut before: Vec<String> = manager.snapshot().await[&ProviderType::ClaudeKiroOauth]
        .iter()
        .map(|c| c.uuid.clone())
        .collect();
    before.sort();

    // Outage: reload fails, the cached pool must survive untouched.
    flaky.down.store(true, Ordering::SeqCst);
    assert!(manager.reload().await.is_err());
    let mut during: Vec<String> = manager.snapshot().await[&ProviderType::ClaudeKiroOauth]
        .iter()
        .map(|c| c.uuid.clone())
        .collect();
    during.sort();
    assert_eq!(before, during);

    // Selection keeps working off the cache (usage write fails, so the
    // select itself errors, but membership is intact).
    let _ = manager.select(ProviderType::ClaudeKiroOauth, None, &[]).await;

    // Recovery: the store still has every credential.
    flaky.down.store(false, Ordering::SeqCst);
    manager.reload().await.unwrap();
    let mut after: Vec<String> = manager.snapshot().await[&ProviderType::ClaudeKiroOauth]
        .iter()
        .map(|c| c.uuid.clone())
        .collect();
    after.sort();
    assert_eq!(before, after);
}

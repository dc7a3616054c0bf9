use std::collections::HashMap;

use async_trait::async_trait;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Both the primary store and the in-process cache miss.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("missing entry: {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStatus {
    pub connected: bool,
    pub queued_writes: usize,
}

/// Concurrent keyed blob store.
///
/// Plain keys hold JSON blobs (optionally with a TTL), hash keys back the
/// provider pools (field per credential uuid), and set keys enumerate pool
/// types without a keyspace scan. The three `atomic_*` compound operations
/// are linearizable per key.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    async fn hash_delete(&self, key: &str, field: &str) -> StoreResult<()>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Increment `usageCount` and stamp `lastUsed` on one credential hash
    /// field in a single step. Returns the new count.
    async fn atomic_usage_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
    ) -> StoreResult<u64>;

    /// Increment `errorCount`, stamp `lastErrorTime`/`lastUsed`, record the
    /// message and conditionally clear `isHealthy`, in a single step.
    /// Returns the new error count.
    async fn atomic_error_update(
        &self,
        pool_key: &str,
        uuid: &str,
        timestamp: &str,
        message: &str,
        mark_unhealthy: bool,
    ) -> StoreResult<u32>;

    /// Compare-and-set a token blob: the write succeeds only when the
    /// stored token's `refreshToken` matches `expected_refresh_token`
    /// (`None` skips the guard). Returns whether the write happened.
    async fn atomic_token_update(
        &self,
        token_key: &str,
        new_token: &str,
        expected_refresh_token: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<()>;
    fn status(&self) -> StoreStatus;
}

/// Shared JSON mutation used by both store implementations so the Lua path
/// and the in-process path stay field-compatible.
pub(crate) fn bump_usage(raw: &str, timestamp: &str) -> StoreResult<(String, u64)> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    let count = value
        .get("usageCount")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0)
        + 1;
    value["usageCount"] = count.into();
    value["lastUsed"] = timestamp.into();
    Ok((value.to_string(), count))
}

pub(crate) fn bump_error(
    raw: &str,
    timestamp: &str,
    message: &str,
    mark_unhealthy: bool,
) -> StoreResult<(String, u32)> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    let count = value
        .get("errorCount")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0) as u32
        + 1;
    value["errorCount"] = count.into();
    value["lastErrorTime"] = timestamp.into();
    value["lastErrorMessage"] = message.into();
    // Failures advance the LRU clock too, so a broken credential does not
    // stay the "least recently used" pick.
    value["lastUsed"] = timestamp.into();
    if mark_unhealthy {
        value["isHealthy"] = false.into();
    }
    Ok((value.to_string(), count))
}

pub(crate) fn token_cas_allows(current: Option<&str>, expected_refresh_token: Option<&str>) -> bool {
    let Some(expected) = expected_refresh_token else {
        return true;
    };
    let Some(raw) = current else {
        // Nothing stored yet; first writer wins.
        return true;
    };
    let stored = serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| {
            value
                .get("refreshToken")
                .and_then(|token| token.as_str().map(str::to_string))
        });
    match stored {
        Some(stored) => stored == expected,
        None => true,
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};

use switchboard_common::{Credential, CredentialPatch, ProviderType, Token};

use crate::backup::{Debouncer, FileBackup};
use crate::keyed::{KeyedStore, StoreError, StoreResult, StoreStatus};
use crate::memory::MemoryStore;
use crate::redis_store::RedisStore;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub redis_url: Option<String>,
    pub prefix: String,
    /// Fail construction instead of degrading when the primary store is
    /// not reachable.
    pub strict: bool,
    pub data_dir: String,
    pub save_debounce: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            prefix: "aiclient:".to_string(),
            strict: false,
            data_dir: "configs".to_string(),
            save_debounce: Duration::from_secs(1),
        }
    }
}

struct Inner {
    store: Arc<dyn KeyedStore>,
    backup: Arc<FileBackup>,
    prefix: String,
    strict: bool,
    dirty_tokens: std::sync::Mutex<HashSet<(ProviderType, String)>>,
    dirty_config: std::sync::atomic::AtomicBool,
}

/// Facade over the keyed store and the file backup.
///
/// All pool, token and config access goes through here; token and config
/// writes additionally mark the backup dirty, flushed together after a
/// quiet period.
#[derive(Clone)]
pub struct Storage {
    inner: Arc<Inner>,
    debouncer: Arc<Debouncer>,
}

impl Storage {
    pub async fn connect(config: StorageConfig) -> StoreResult<Self> {
        let store: Arc<dyn KeyedStore> = match &config.redis_url {
            Some(url) => match RedisStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(err) if config.strict => return Err(err),
                Err(err) => {
                    warn!(error = %err, "primary store unreachable, using in-memory store");
                    Arc::new(MemoryStore::new())
                }
            },
            None if config.strict => {
                return Err(StoreError::Unavailable(
                    "strict storage mode requires a primary store".to_string(),
                ));
            }
            None => Arc::new(MemoryStore::new()),
        };

        let inner = Arc::new(Inner {
            store,
            backup: Arc::new(FileBackup::new(&config.data_dir)),
            prefix: config.prefix,
            strict: config.strict,
            dirty_tokens: std::sync::Mutex::new(HashSet::new()),
            dirty_config: std::sync::atomic::AtomicBool::new(false),
        });

        let flush_inner = inner.clone();
        let debouncer = Arc::new(Debouncer::spawn(config.save_debounce, move || {
            let inner = flush_inner.clone();
            async move {
                flush_backup(&inner).await;
            }
        }));

        let storage = Self { inner, debouncer };
        storage.import_backup().await;
        Ok(storage)
    }

    /// Test constructor over an explicit store, no backup directory churn.
    pub fn with_store(store: Arc<dyn KeyedStore>, prefix: &str, data_dir: &str) -> Self {
        let inner = Arc::new(Inner {
            store,
            backup: Arc::new(FileBackup::new(data_dir)),
            prefix: prefix.to_string(),
            strict: false,
            dirty_tokens: std::sync::Mutex::new(HashSet::new()),
            dirty_config: std::sync::atomic::AtomicBool::new(false),
        });
        let flush_inner = inner.clone();
        let debouncer = Arc::new(Debouncer::spawn(Duration::from_millis(50), move || {
            let inner = flush_inner.clone();
            async move {
                flush_backup(&inner).await;
            }
        }));
        Self { inner, debouncer }
    }

    fn pool_key(&self, provider_type: ProviderType) -> String {
        format!("{}pools:{}", self.inner.prefix, provider_type)
    }

    fn pool_types_key(&self) -> String {
        format!("{}pool-types", self.inner.prefix)
    }

    fn token_key(&self, provider_type: ProviderType, uuid: &str) -> String {
        format!("{}tokens:{}:{}", self.inner.prefix, provider_type, uuid)
    }

    fn config_key(&self) -> String {
        format!("{}config", self.inner.prefix)
    }

    // -- providers ---------------------------------------------------------

    pub async fn get_provider_pool(
        &self,
        provider_type: ProviderType,
    ) -> StoreResult<Vec<Credential>> {
        let raw = self
            .inner
            .store
            .hash_get_all(&self.pool_key(provider_type))
            .await?;
        let mut pool = Vec::with_capacity(raw.len());
        for (uuid, blob) in raw {
            match serde_json::from_str::<Credential>(&blob) {
                Ok(credential) => pool.push(credential),
                Err(err) => warn!(%uuid, error = %err, "skipping unparsable credential row"),
            }
        }
        Ok(pool)
    }

    pub async fn get_all_provider_pools(
        &self,
    ) -> StoreResult<HashMap<ProviderType, Vec<Credential>>> {
        let mut pools = HashMap::new();
        for member in self.inner.store.set_members(&self.pool_types_key()).await? {
            let Some(provider_type) = ProviderType::parse(&member) else {
                continue;
            };
            pools.insert(provider_type, self.get_provider_pool(provider_type).await?);
        }
        Ok(pools)
    }

    /// Upsert one credential row. Used both for admin creation and for
    /// write-through persistence of field mutations.
    pub async fn put_provider(&self, credential: &Credential) -> StoreResult<()> {
        let blob = serde_json::to_string(credential)?;
        self.inner
            .store
            .hash_set(&self.pool_key(credential.provider_type), &credential.uuid, &blob)
            .await?;
        self.inner
            .store
            .set_add(&self.pool_types_key(), credential.provider_type.as_str())
            .await
    }

    pub async fn update_provider(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        patch: &CredentialPatch,
    ) -> StoreResult<Credential> {
        let key = self.pool_key(provider_type);
        let raw = self
            .inner
            .store
            .hash_get(&key, uuid)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("{key}/{uuid}")))?;
        let mut credential: Credential = serde_json::from_str(&raw)?;
        patch.apply(&mut credential);
        self.inner
            .store
            .hash_set(&key, uuid, &serde_json::to_string(&credential)?)
            .await?;
        Ok(credential)
    }

    pub async fn delete_provider(
        &self,
        provider_type: ProviderType,
        uuid: &str,
    ) -> StoreResult<()> {
        self.inner
            .store
            .hash_delete(&self.pool_key(provider_type), uuid)
            .await?;
        // Prune the orphaned token and its backup file.
        self.inner
            .store
            .delete(&self.token_key(provider_type, uuid))
            .await?;
        let _ = self
            .inner
            .backup
            .remove(&token_backup_path(provider_type, uuid))
            .await;
        Ok(())
    }

    // -- tokens ------------------------------------------------------------

    pub async fn get_token(
        &self,
        provider_type: ProviderType,
        uuid: &str,
    ) -> StoreResult<Option<Token>> {
        let raw = self
            .inner
            .store
            .get(&self.token_key(provider_type, uuid))
            .await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub async fn set_token(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        token: &Token,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<()> {
        self.inner
            .store
            .set(
                &self.token_key(provider_type, uuid),
                &serde_json::to_string(token)?,
                ttl_seconds,
            )
            .await?;
        self.mark_token_dirty(provider_type, uuid);
        Ok(())
    }

    /// CAS write guarded by the previous refresh token. Returns whether the
    /// write was applied.
    pub async fn atomic_token_update(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        token: &Token,
        expected_refresh_token: Option<&str>,
        ttl_seconds: Option<u64>,
    ) -> StoreResult<bool> {
        let written = self
            .inner
            .store
            .atomic_token_update(
                &self.token_key(provider_type, uuid),
                &serde_json::to_string(token)?,
                expected_refresh_token,
                ttl_seconds,
            )
            .await?;
        if written {
            self.mark_token_dirty(provider_type, uuid);
        }
        Ok(written)
    }

    // -- config ------------------------------------------------------------

    pub async fn get_config(&self) -> StoreResult<Option<Value>> {
        let raw = self.inner.store.get(&self.config_key()).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub async fn set_config(&self, config: &Value) -> StoreResult<()> {
        self.inner
            .store
            .set(&self.config_key(), &config.to_string(), None)
            .await?;
        self.inner
            .dirty_config
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.debouncer.signal();
        Ok(())
    }

    // -- counters ----------------------------------------------------------

    pub async fn increment_usage(
        &self,
        provider_type: ProviderType,
        uuid: &str,
    ) -> StoreResult<u64> {
        self.inner
            .store
            .atomic_usage_update(&self.pool_key(provider_type), uuid, &now_rfc3339())
            .await
    }

    pub async fn increment_error(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        message: &str,
        mark_unhealthy: bool,
    ) -> StoreResult<u32> {
        self.inner
            .store
            .atomic_error_update(
                &self.pool_key(provider_type),
                uuid,
                &now_rfc3339(),
                message,
                mark_unhealthy,
            )
            .await
    }

    pub async fn update_health_status(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        is_healthy: bool,
    ) -> StoreResult<Credential> {
        self.mutate_provider(provider_type, uuid, |credential| {
            credential.is_healthy = is_healthy;
            if is_healthy {
                credential.error_count = 0;
            }
            credential.last_health_check_time = Some(OffsetDateTime::now_utc());
        })
        .await
    }

    /// Read-modify-write of one credential row.
    pub async fn mutate_provider(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        mutate: impl FnOnce(&mut Credential),
    ) -> StoreResult<Credential> {
        let key = self.pool_key(provider_type);
        let raw = self
            .inner
            .store
            .hash_get(&key, uuid)
            .await?
            .ok_or_else(|| StoreError::Missing(format!("{key}/{uuid}")))?;
        let mut credential: Credential = serde_json::from_str(&raw)?;
        mutate(&mut credential);
        self.inner
            .store
            .hash_set(&key, uuid, &serde_json::to_string(&credential)?)
            .await?;
        Ok(credential)
    }

    // -- status / lifecycle --------------------------------------------------

    pub fn get_status(&self) -> StoreStatus {
        self.inner.store.status()
    }

    pub fn is_strict(&self) -> bool {
        self.inner.strict
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.inner.store.ping().await
    }

    /// Flush debounced backup writes immediately. Called on shutdown.
    pub async fn force_flush(&self) {
        self.debouncer.force_flush().await;
    }

    fn mark_token_dirty(&self, provider_type: ProviderType, uuid: &str) {
        self.inner
            .dirty_tokens
            .lock()
            .unwrap()
            .insert((provider_type, uuid.to_string()));
        self.debouncer.signal();
    }

    /// Bootstrap import: token files written by a previous run are loaded
    /// into the store when the store has no row for them yet.
    async fn import_backup(&self) {
        if let Ok(Some(config)) = self.inner.backup.read_json("config.json").await
            && matches!(self.get_config().await, Ok(None))
        {
            let _ = self.set_config(&config).await;
        }

        for provider_type in ProviderType::ALL {
            let Ok(files) = self.inner.backup.list_json(provider_type.family_dir()).await else {
                continue;
            };
            for file in files {
                let Some(uuid) = token_uuid_from_path(&file, provider_type) else {
                    continue;
                };
                if !matches!(self.get_token(provider_type, &uuid).await, Ok(None)) {
                    continue;
                }
                if let Ok(Some(value)) = self.inner.backup.read_json(&file).await
                    && let Ok(token) = serde_json::from_value::<Token>(value)
                {
                    info!(provider = %provider_type, %uuid, "importing token from file backup");
                    let _ = self.set_token(provider_type, &uuid, &token, None).await;
                }
            }
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn token_backup_path(provider_type: ProviderType, uuid: &str) -> String {
    format!(
        "{}/{}-{}.json",
        provider_type.family_dir(),
        provider_type,
        uuid
    )
}

fn token_uuid_from_path(path: &str, provider_type: ProviderType) -> Option<String> {
    let name = path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path);
    let name = name.strip_suffix(".json")?;
    let uuid = name.strip_prefix(&format!("{provider_type}-"))?;
    (!uuid.is_empty()).then(|| uuid.to_string())
}

async fn flush_backup(inner: &Inner) {
    let dirty_tokens: Vec<(ProviderType, String)> = {
        let mut guard = inner.dirty_tokens.lock().unwrap();
        guard.drain().collect()
    };
    for (provider_type, uuid) in dirty_tokens {
        let key = format!("{}tokens:{}:{}", inner.prefix, provider_type, uuid);
        let raw = match inner.store.get(&key).await {
            Ok(Some(raw)) => raw,
            _ => continue,
        };
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if let Err(err) = inner
            .backup
            .write_json(&token_backup_path(provider_type, &uuid), &value)
            .await
        {
            warn!(error = %err, provider = %provider_type, %uuid, "token backup write failed");
        }
    }

    if inner
        .dirty_config
        .swap(false, std::sync::atomic::Ordering::SeqCst)
    {
        let key = format!("{}config", inner.prefix);
        if let Ok(Some(raw)) = inner.store.get(&key).await
            && let Ok(value) = serde_json::from_str::<Value>(&raw)
            && let Err(err) = inner.backup.write_json("config.json", &value).await
        {
            warn!(error = %err, "config backup write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::with_store(
            Arc::new(MemoryStore::new()),
            "test:",
            dir.path().to_str().unwrap(),
        );
        (storage, dir)
    }

    #[tokio::test]
    async fn provider_crud_round_trip() {
        let (storage, _dir) = test_storage();
        let credential = Credential::new("u1", ProviderType::ClaudeKiroOauth);
        storage.put_provider(&credential).await.unwrap();

        let pool = storage
            .get_provider_pool(ProviderType::ClaudeKiroOauth)
            .await
            .unwrap();
        assert_eq!(pool.len(), 1);

        let all = storage.get_all_provider_pools().await.unwrap();
        assert!(all.contains_key(&ProviderType::ClaudeKiroOauth));

        let updated = storage
            .update_provider(
                ProviderType::ClaudeKiroOauth,
                "u1",
                &CredentialPatch {
                    custom_name: Some("main".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.custom_name.as_deref(), Some("main"));

        storage
            .delete_provider(ProviderType::ClaudeKiroOauth, "u1")
            .await
            .unwrap();
        assert!(
            storage
                .get_provider_pool(ProviderType::ClaudeKiroOauth)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn token_backup_flushes_to_disk() {
        let (storage, dir) = test_storage();
        let mut token = Token::new("at");
        token.refresh_token = Some("rt".to_string());
        storage
            .set_token(ProviderType::GeminiCliOauth, "u9", &token, None)
            .await
            .unwrap();
        storage.force_flush().await;

        let path = dir.path().join("gemini/gemini-cli-oauth-u9.json");
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("\"accessToken\""));
    }

    #[tokio::test]
    async fn delete_prunes_token() {
        let (storage, _dir) = test_storage();
        let credential = Credential::new("u1", ProviderType::OpenAiCodex);
        storage.put_provider(&credential).await.unwrap();
        storage
            .set_token(ProviderType::OpenAiCodex, "u1", &Token::new("x"), None)
            .await
            .unwrap();
        storage
            .delete_provider(ProviderType::OpenAiCodex, "u1")
            .await
            .unwrap();
        assert!(
            storage
                .get_token(ProviderType::OpenAiCodex, "u1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn usage_and_error_counters() {
        let (storage, _dir) = test_storage();
        let credential = Credential::new("u1", ProviderType::ClaudeCustom);
        storage.put_provider(&credential).await.unwrap();

        assert_eq!(
            storage
                .increment_usage(ProviderType::ClaudeCustom, "u1")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .increment_error(ProviderType::ClaudeCustom, "u1", "429", false)
                .await
                .unwrap(),
            1
        );
        let pool = storage
            .get_provider_pool(ProviderType::ClaudeCustom)
            .await
            .unwrap();
        assert!(pool[0].is_healthy);
        assert_eq!(pool[0].error_count, 1);
        assert!(pool[0].last_error_time.is_some());
    }
}

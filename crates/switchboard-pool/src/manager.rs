use std::collections::HashMap;

use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use switchboard_common::{Credential, CredentialPatch, ProviderType};
use switchboard_storage::{Storage, StoreError};

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unknown credential {provider_type}/{uuid}")]
    UnknownCredential {
        provider_type: ProviderType,
        uuid: String,
    },
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_error_count: u32,
    pub selection_cooldown_seconds: i64,
    pub fallback_chain: HashMap<ProviderType, Vec<ProviderType>>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_error_count: 3,
            selection_cooldown_seconds: 60,
            fallback_chain: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub credential: Credential,
    pub actual_type: ProviderType,
    pub is_fallback: bool,
}

/// Per-provider-type credential pools.
///
/// The in-memory map is a write-through cache over the storage facade: the
/// store is the source of truth, every mutation goes through the facade and
/// is applied to the cached copy before the call returns.
pub struct PoolManager {
    storage: Storage,
    settings: PoolSettings,
    pools: RwLock<HashMap<ProviderType, Vec<Credential>>>,
}

impl PoolManager {
    pub fn new(storage: Storage, settings: PoolSettings) -> Self {
        Self {
            storage,
            settings,
            pools: RwLock::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Rebuild the cache from the store. Called at startup and on demand.
    pub async fn reload(&self) -> PoolResult<()> {
        let pools = self.storage.get_all_provider_pools().await?;
        *self.pools.write().await = pools;
        Ok(())
    }

    // -- selection ---------------------------------------------------------

    /// LRU-with-usage-tiebreak selection.
    ///
    /// Candidates must be healthy, enabled, support the requested model and
    /// be outside the post-error cooldown window. Oldest `lastUsed` wins
    /// (never-used first), `usageCount` breaks ties, insertion order breaks
    /// the rest.
    pub async fn select(
        &self,
        provider_type: ProviderType,
        model: Option<&str>,
        exclude: &[String],
    ) -> PoolResult<Option<Credential>> {
        let now = OffsetDateTime::now_utc();
        let chosen = {
            let pools = self.pools.read().await;
            let Some(pool) = pools.get(&provider_type) else {
                return Ok(None);
            };
            let mut candidates: Vec<&Credential> = pool
                .iter()
                .filter(|credential| !exclude.contains(&credential.uuid))
                .filter(|credential| self.is_selectable(credential, model, now))
                .collect();
            candidates.sort_by(|a, b| {
                match (a.last_used, b.last_used) {
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (Some(a), Some(b)) => a.cmp(&b),
                }
                .then(a.usage_count.cmp(&b.usage_count))
            });
            candidates.first().map(|credential| credential.uuid.clone())
        };

        let Some(uuid) = chosen else {
            return Ok(None);
        };

        let count = self.storage.increment_usage(provider_type, &uuid).await?;
        let updated = self
            .apply_cached(provider_type, &uuid, |credential| {
                credential.usage_count = count;
                credential.last_used = Some(now);
            })
            .await;
        Ok(updated)
    }

    /// Selection with fallback-chain walk. Chain entries whose protocol
    /// prefix differs from the primary's are skipped.
    pub async fn select_with_fallback(
        &self,
        provider_type: ProviderType,
        model: Option<&str>,
        exclude: &[String],
    ) -> PoolResult<Option<Selection>> {
        if let Some(credential) = self.select(provider_type, model, exclude).await? {
            return Ok(Some(Selection {
                credential,
                actual_type: provider_type,
                is_fallback: false,
            }));
        }

        let chain = self
            .settings
            .fallback_chain
            .get(&provider_type)
            .cloned()
            .unwrap_or_default();
        for fallback_type in chain {
            if fallback_type.protocol_prefix() != provider_type.protocol_prefix() {
                debug!(
                    primary = %provider_type,
                    fallback = %fallback_type,
                    "skipping fallback with mismatched protocol prefix"
                );
                continue;
            }
            if let Some(credential) = self.select(fallback_type, model, exclude).await? {
                warn!(primary = %provider_type, fallback = %fallback_type,
                      "primary pool exhausted, using fallback provider");
                return Ok(Some(Selection {
                    credential,
                    actual_type: fallback_type,
                    is_fallback: true,
                }));
            }
        }
        Ok(None)
    }

    fn is_selectable(
        &self,
        credential: &Credential,
        model: Option<&str>,
        now: OffsetDateTime,
    ) -> bool {
        if credential.is_disabled || !credential.is_healthy {
            return false;
        }
        if let Some(model) = model
            && !credential.supports_model(model)
        {
            return false;
        }
        // Healing window: recent errors exclude a credential even while it
        // is still marked healthy.
        if let Some(last_error) = credential.last_error_time {
            let cooldown = time::Duration::seconds(self.settings.selection_cooldown_seconds);
            if now < last_error + cooldown {
                return false;
            }
        }
        true
    }

    // -- health bookkeeping ------------------------------------------------

    /// Record an upstream failure. Crossing `max_error_count` flips the
    /// credential to unhealthy; the cooldown window applies either way.
    /// Auth failures (401/403) must not come through here — they go to
    /// [`mark_needs_refresh`](Self::mark_needs_refresh) instead.
    pub async fn report_error(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        message: &str,
    ) -> PoolResult<u32> {
        let will_exceed = {
            let pools = self.pools.read().await;
            pools
                .get(&provider_type)
                .and_then(|pool| pool.iter().find(|c| c.uuid == uuid))
                .map(|c| c.error_count + 1 >= self.settings.max_error_count)
                .unwrap_or(false)
        };
        let count = self
            .storage
            .increment_error(provider_type, uuid, message, will_exceed)
            .await?;
        let now = OffsetDateTime::now_utc();
        self.apply_cached(provider_type, uuid, |credential| {
            credential.error_count = count;
            credential.last_error_time = Some(now);
            credential.last_error_message = Some(message.to_string());
            credential.last_used = Some(now);
            if will_exceed {
                credential.is_healthy = false;
            }
        })
        .await;
        Ok(count)
    }

    /// Flag for background refresh without touching health.
    pub async fn mark_needs_refresh(
        &self,
        provider_type: ProviderType,
        uuid: &str,
    ) -> PoolResult<()> {
        self.storage
            .mutate_provider(provider_type, uuid, |credential| {
                credential.needs_refresh = true;
            })
            .await?;
        self.apply_cached(provider_type, uuid, |credential| {
            credential.needs_refresh = true;
        })
        .await;
        Ok(())
    }

    pub async fn finish_refresh(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        success: bool,
    ) -> PoolResult<()> {
        self.storage
            .mutate_provider(provider_type, uuid, |credential| {
                if success {
                    credential.needs_refresh = false;
                    credential.refresh_count = 0;
                } else {
                    credential.refresh_count += 1;
                }
            })
            .await?;
        self.apply_cached(provider_type, uuid, |credential| {
            if success {
                credential.needs_refresh = false;
                credential.refresh_count = 0;
            } else {
                credential.refresh_count += 1;
            }
        })
        .await;
        Ok(())
    }

    /// Health-probe outcome or manual reset.
    pub async fn set_healthy(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        is_healthy: bool,
    ) -> PoolResult<()> {
        let updated = self
            .storage
            .update_health_status(provider_type, uuid, is_healthy)
            .await?;
        self.apply_cached(provider_type, uuid, |credential| {
            *credential = updated.clone();
        })
        .await;
        Ok(())
    }

    pub async fn record_probe(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        model: &str,
        success: bool,
        error: Option<&str>,
    ) -> PoolResult<()> {
        self.storage
            .mutate_provider(provider_type, uuid, |credential| {
                credential.last_health_check_time = Some(OffsetDateTime::now_utc());
                credential.last_health_check_model = Some(model.to_string());
            })
            .await?;
        self.apply_cached(provider_type, uuid, |credential| {
            credential.last_health_check_time = Some(OffsetDateTime::now_utc());
            credential.last_health_check_model = Some(model.to_string());
        })
        .await;
        if success {
            self.set_healthy(provider_type, uuid, true).await
        } else {
            self.report_error(provider_type, uuid, error.unwrap_or("health probe failed"))
                .await?;
            Ok(())
        }
    }

    // -- admin lifecycle ---------------------------------------------------

    pub async fn add(&self, credential: Credential) -> PoolResult<()> {
        self.storage.put_provider(&credential).await?;
        let mut pools = self.pools.write().await;
        let pool = pools.entry(credential.provider_type).or_default();
        match pool.iter_mut().find(|c| c.uuid == credential.uuid) {
            Some(existing) => *existing = credential,
            None => pool.push(credential),
        }
        Ok(())
    }

    pub async fn update(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        patch: &CredentialPatch,
    ) -> PoolResult<Credential> {
        let updated = self.storage.update_provider(provider_type, uuid, patch).await?;
        self.apply_cached(provider_type, uuid, |credential| {
            *credential = updated.clone();
        })
        .await;
        Ok(updated)
    }

    pub async fn delete(&self, provider_type: ProviderType, uuid: &str) -> PoolResult<()> {
        self.storage.delete_provider(provider_type, uuid).await?;
        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get_mut(&provider_type) {
            pool.retain(|credential| credential.uuid != uuid);
        }
        Ok(())
    }

    // -- views -------------------------------------------------------------

    pub async fn get(&self, provider_type: ProviderType, uuid: &str) -> Option<Credential> {
        let pools = self.pools.read().await;
        pools
            .get(&provider_type)?
            .iter()
            .find(|credential| credential.uuid == uuid)
            .cloned()
    }

    pub async fn snapshot(&self) -> HashMap<ProviderType, Vec<Credential>> {
        self.pools.read().await.clone()
    }

    /// `(healthy, total)` across all pools, for the health endpoint.
    pub async fn account_counts(&self) -> (usize, usize) {
        let pools = self.pools.read().await;
        let mut healthy = 0;
        let mut total = 0;
        for pool in pools.values() {
            for credential in pool {
                total += 1;
                if credential.is_healthy && !credential.is_disabled {
                    healthy += 1;
                }
            }
        }
        (healthy, total)
    }

    /// Credentials flagged for refresh, for startup re-scan.
    pub async fn needing_refresh(&self) -> Vec<(ProviderType, String)> {
        let pools = self.pools.read().await;
        pools
            .values()
            .flatten()
            .filter(|credential| credential.needs_refresh)
            .map(|credential| (credential.provider_type, credential.uuid.clone()))
            .collect()
    }

    async fn apply_cached(
        &self,
        provider_type: ProviderType,
        uuid: &str,
        mutate: impl FnOnce(&mut Credential),
    ) -> Option<Credential> {
        let mut pools = self.pools.write().await;
        let credential = pools
            .get_mut(&provider_type)?
            .iter_mut()
            .find(|credential| credential.uuid == uuid)?;
        mutate(credential);
        Some(credential.clone())
    }
}

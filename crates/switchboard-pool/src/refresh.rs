use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use switchboard_common::{Credential, ProviderType, Token};

use crate::manager::PoolManager;

/// Refresh attempts beyond this count stop being re-queued automatically.
const MAX_QUEUED_ATTEMPTS: u32 = 5;
/// Base delay of the re-queue backoff schedule.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
/// Workers draining the refresh queue.
const QUEUE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("credential {provider_type}/{uuid} not found")]
    UnknownCredential {
        provider_type: ProviderType,
        uuid: String,
    },
    #[error("no stored token for {provider_type}/{uuid}")]
    NoToken {
        provider_type: ProviderType,
        uuid: String,
    },
    #[error("upstream refresh failed: {0}")]
    Upstream(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Performs the vendor-specific refresh-token exchange. Implemented over
/// HTTP in the core crate and by mocks in tests.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential, token: &Token)
    -> Result<Token, RefreshError>;
}

type RefreshKey = (ProviderType, String);
type RefreshResult = Result<Token, RefreshError>;
type InflightMap = Arc<Mutex<HashMap<RefreshKey, watch::Receiver<Option<RefreshResult>>>>>;

/// Deduplicated, non-blocking token refresh.
///
/// Concurrent `refresh` calls for the same `(providerType, uuid)` share a
/// single in-flight task; waiters all observe its result. The task runs
/// detached, so the refreshed token is stored even if every waiter cancels.
/// Flagged credentials drain through a FIFO queue at bounded concurrency.
pub struct RefreshCoordinator {
    manager: Arc<PoolManager>,
    refresher: Arc<dyn TokenRefresher>,
    inflight: InflightMap,
    queue_tx: mpsc::UnboundedSender<RefreshKey>,
}

impl RefreshCoordinator {
    /// Creates the coordinator and spawns its queue workers.
    pub fn start(manager: Arc<PoolManager>, refresher: Arc<dyn TokenRefresher>) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            manager,
            refresher,
            inflight: Arc::new(Mutex::new(HashMap::new())),
            queue_tx,
        });

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker in 0..QUEUE_CONCURRENCY {
            let coordinator = coordinator.clone();
            let queue_rx = queue_rx.clone();
            tokio::spawn(async move {
                loop {
                    let key = {
                        let mut rx = queue_rx.lock().await;
                        rx.recv().await
                    };
                    let Some((provider_type, uuid)) = key else {
                        return;
                    };
                    debug!(%provider_type, %uuid, worker, "refresh worker picked up credential");
                    coordinator.run_queued(provider_type, uuid).await;
                }
            });
        }

        coordinator
    }

    /// Flag the credential and enqueue it; returns immediately.
    pub async fn enqueue(&self, provider_type: ProviderType, uuid: &str) {
        if let Err(err) = self.manager.mark_needs_refresh(provider_type, uuid).await {
            warn!(%provider_type, %uuid, error = %err, "failed to flag credential for refresh");
        }
        let _ = self.queue_tx.send((provider_type, uuid.to_string()));
    }

    /// Re-enqueue credentials still flagged from a previous run.
    pub async fn rescan(&self) {
        for (provider_type, uuid) in self.manager.needing_refresh().await {
            info!(%provider_type, %uuid, "re-enqueueing credential flagged needsRefresh");
            let _ = self.queue_tx.send((provider_type, uuid));
        }
    }

    /// Deduplicated refresh; waits for the shared in-flight attempt for
    /// this key to complete.
    pub async fn refresh(&self, provider_type: ProviderType, uuid: &str) -> RefreshResult {
        let key = (provider_type, uuid.to_string());

        let mut rx = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&key) {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx.clone());
                    let task = RefreshTask {
                        manager: self.manager.clone(),
                        refresher: self.refresher.clone(),
                        inflight: self.inflight.clone(),
                    };
                    let uuid = uuid.to_string();
                    tokio::spawn(async move {
                        task.run(provider_type, uuid, tx).await;
                    });
                    rx
                }
            }
        };

        loop {
            if let Some(result) = rx.borrow().clone() {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(RefreshError::Upstream("refresh task dropped".to_string()));
            }
        }
    }

    async fn run_queued(&self, provider_type: ProviderType, uuid: String) {
        if self.refresh(provider_type, &uuid).await.is_ok() {
            return;
        }
        let attempts = self
            .manager
            .get(provider_type, &uuid)
            .await
            .map(|credential| credential.refresh_count)
            .unwrap_or(u32::MAX);
        if attempts < MAX_QUEUED_ATTEMPTS {
            let delay = RETRY_BASE_DELAY * 2u32.saturating_pow(attempts.min(4));
            warn!(%provider_type, %uuid, attempts, "refresh failed, re-queueing after {delay:?}");
            let tx = self.queue_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send((provider_type, uuid));
            });
        } else {
            warn!(%provider_type, %uuid, "refresh retry budget exhausted");
        }
    }
}

struct RefreshTask {
    manager: Arc<PoolManager>,
    refresher: Arc<dyn TokenRefresher>,
    inflight: InflightMap,
}

impl RefreshTask {
    async fn run(
        &self,
        provider_type: ProviderType,
        uuid: String,
        tx: watch::Sender<Option<RefreshResult>>,
    ) {
        let result = self.do_refresh(provider_type, &uuid).await;
        if let Err(err) = self
            .manager
            .finish_refresh(provider_type, &uuid, result.is_ok())
            .await
        {
            warn!(%provider_type, %uuid, error = %err, "failed to record refresh outcome");
        }
        // Publish before deregistering so late subscribers of this round
        // still see the value; the next refresh() starts a fresh round.
        let _ = tx.send(Some(result));
        self.inflight
            .lock()
            .unwrap()
            .remove(&(provider_type, uuid));
    }

    async fn do_refresh(&self, provider_type: ProviderType, uuid: &str) -> RefreshResult {
        let credential =
            self.manager
                .get(provider_type, uuid)
                .await
                .ok_or(RefreshError::UnknownCredential {
                    provider_type,
                    uuid: uuid.to_string(),
                })?;

        let storage = self.manager.storage();
        let current = storage
            .get_token(provider_type, uuid)
            .await
            .map_err(|err| RefreshError::Store(err.to_string()))?
            .ok_or(RefreshError::NoToken {
                provider_type,
                uuid: uuid.to_string(),
            })?;

        let fresh = self.refresher.refresh(&credential, &current).await?;

        let written = storage
            .atomic_token_update(
                provider_type,
                uuid,
                &fresh,
                current.refresh_token.as_deref(),
                None,
            )
            .await
            .map_err(|err| RefreshError::Store(err.to_string()))?;

        if written {
            info!(%provider_type, %uuid, "token refreshed");
            return Ok(fresh);
        }

        // Someone else won the CAS race; adopt their token, drop ours.
        debug!(%provider_type, %uuid, "refresh CAS lost, adopting newer token");
        storage
            .get_token(provider_type, uuid)
            .await
            .map_err(|err| RefreshError::Store(err.to_string()))?
            .ok_or(RefreshError::NoToken {
                provider_type,
                uuid: uuid.to_string(),
            })
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use switchboard_common::{Credential, ProviderType};
use switchboard_pool::health::run_sweep;
use switchboard_pool::{HealthProber, PoolManager, PoolSettings};
use switchboard_storage::{MemoryStore, Storage};

struct ScriptedProber {
    calls: AtomicUsize,
    healthy: bool,
}

#[async_trait]
impl HealthProber for ScriptedProber {
    async fn probe(&self, _credential: &Credential, _model: &str) -> Result<(), String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy {
            Ok(())
        } else {
            Err("upstream 500".to_string())
        }
    }
}

fn test_manager() -> (Arc<PoolManager>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::with_store(
        Arc::new(MemoryStore::new()),
        "test:",
        dir.path().to_str().unwrap(),
    );
    (
        Arc::new(PoolManager::new(
            storage,
            PoolSettings {
                max_error_count: 3,
                selection_cooldown_seconds: 0,
                fallback_chain: HashMap::new(),
            },
        )),
        dir,
    )
}

#[tokio::test]
async fn successful_probe_restores_unhealthy_credential() {
    let (manager, _dir) = test_manager();
    let mut credential = Credential::new("sick", ProviderType::ClaudeKiroOauth);
    credential.check_health = true;
    credential.is_healthy = false;
    credential.error_count = 3;
    manager.add(credential).await.unwrap();

    let prober = ScriptedProber {
        calls: AtomicUsize::new(0),
        healthy: true,
    };
    run_sweep(&manager, &prober, Duration::from_secs(600)).await;

    let credential = manager.get(ProviderType::ClaudeKiroOauth, "sick").await.unwrap();
    assert!(credential.is_healthy);
    assert_eq!(credential.error_count, 0);
    assert!(credential.last_health_check_time.is_some());
    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn probe_skips_recent_failures_and_disabled() {
    let (manager, _dir) = test_manager();

    let mut recent = Credential::new("recent", ProviderType::GeminiCliOauth);
    recent.check_health = true;
    recent.last_error_time = Some(time::OffsetDateTime::now_utc());
    manager.add(recent).await.unwrap();

    let mut disabled = Credential::new("off", ProviderType::GeminiCliOauth);
    disabled.check_health = true;
    disabled.is_disabled = true;
    manager.add(disabled).await.unwrap();

    let mut unchecked = Credential::new("nocheck", ProviderType::GeminiCliOauth);
    unchecked.check_health = false;
    manager.add(unchecked).await.unwrap();

    let prober = ScriptedProber {
        calls: AtomicUsize::new(0),
        healthy: true,
    };
    run_sweep(&manager, &prober, Duration::from_secs(600)).await;
    assert_eq!(prober.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_probe_increments_error_count() {
    let (manager, _dir) = test_manager();
    let mut credential = Credential::new("flaky", ProviderType::OpenAiCodex);
    credential.check_health = true;
    manager.add(credential).await.unwrap();

    let prober = ScriptedProber {
        calls: AtomicUsize::new(0),
        healthy: false,
    };
    run_sweep(&manager, &prober, Duration::from_secs(600)).await;

    let credential = manager.get(ProviderType::OpenAiCodex, "flaky").await.unwrap();
    assert_eq!(credential.error_count, 1);
    assert_eq!(
        credential.last_error_message.as_deref(),
        Some("upstream 500")
    );
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, warn};

use switchboard_common::Credential;

use crate::manager::PoolManager;

/// Sends the minimal one-token generation request used as a liveness probe.
/// Implemented over HTTP in the core crate and by mocks in tests.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, credential: &Credential, model: &str) -> Result<(), String>;
}

/// Fallback probe model per provider family.
fn default_probe_model(credential: &Credential) -> &str {
    match credential.provider_type.protocol_prefix() {
        "claude" => "claude-3-5-haiku-20241022",
        "gemini" => "gemini-2.5-flash",
        _ => "gpt-4o-mini",
    }
}

/// Periodic health sweep over credentials with `checkHealth` enabled.
///
/// Credentials that failed within the last interval are skipped so a dead
/// account is probed at most once per cycle. Probe success flips the
/// credential healthy and clears its error count; failure goes through the
/// normal error bookkeeping.
pub fn spawn_health_task(
    manager: Arc<PoolManager>,
    prober: Arc<dyn HealthProber>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would probe before startup settles.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_sweep(&manager, prober.as_ref(), interval).await;
        }
    })
}

pub async fn run_sweep(manager: &PoolManager, prober: &dyn HealthProber, interval: Duration) {
    let now = OffsetDateTime::now_utc();
    let pools = manager.snapshot().await;

    for (provider_type, pool) in pools {
        for credential in pool {
            if !credential.check_health || credential.is_disabled {
                continue;
            }
            if let Some(last_error) = credential.last_error_time
                && now < last_error + interval
            {
                debug!(%provider_type, uuid = %credential.uuid,
                       "skipping probe, failed within last interval");
                continue;
            }

            let model = credential
                .check_model_name
                .clone()
                .unwrap_or_else(|| default_probe_model(&credential).to_string());

            let outcome = prober.probe(&credential, &model).await;
            let (success, error) = match &outcome {
                Ok(()) => (true, None),
                Err(message) => {
                    warn!(%provider_type, uuid = %credential.uuid, error = %message,
                          "health probe failed");
                    (false, Some(message.as_str()))
                }
            };
            if let Err(err) = manager
                .record_probe(provider_type, &credential.uuid, &model, success, error)
                .await
            {
                warn!(%provider_type, uuid = %credential.uuid, error = %err,
                      "failed to record probe outcome");
            }
        }
    }
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use switchboard_common::{ProviderType, ProxyConfig, ProxyConfigPatch};
use switchboard_core::engine::ProxyEngine;
use switchboard_core::refresher::{HttpHealthProber, HttpTokenRefresher};
use switchboard_core::upstream_client::{UpstreamClientConfig, WreqUpstreamClient};
use switchboard_pool::{PoolManager, PoolSettings, RefreshCoordinator, spawn_health_task};
use switchboard_storage::{Storage, StorageConfig};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchboard=debug".into()),
        )
        .init();

    let args = cli::Cli::parse();
    let config = load_config(&args)?;

    let storage = Storage::connect(StorageConfig {
        redis_url: config.redis_url.clone(),
        prefix: config.redis_prefix.clone(),
        strict: config.storage_strict_mode,
        data_dir: config.data_dir.clone(),
        save_debounce: Duration::from_millis(config.save_debounce_ms),
    })
    .await
    .context("storage facade construction failed")?;

    let manager = Arc::new(PoolManager::new(
        storage.clone(),
        PoolSettings {
            max_error_count: config.max_error_count,
            selection_cooldown_seconds: config.selection_cooldown_seconds,
            fallback_chain: parse_fallback_chain(&config),
        },
    ));
    if let Err(err) = manager.reload().await {
        warn!(error = %err, "initial pool load failed, starting with empty pools");
    }

    let upstream = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig {
            proxy: config.proxy.clone(),
            ..Default::default()
        })
        .context("upstream client construction failed")?,
    );

    let coordinator = RefreshCoordinator::start(
        manager.clone(),
        Arc::new(HttpTokenRefresher::new(upstream.clone())),
    );
    if config.cron_refresh_token {
        coordinator.rescan().await;
        spawn_near_expiry_cron(
            manager.clone(),
            coordinator.clone(),
            storage.clone(),
            config.cron_near_minutes,
        );
    }

    let health_task = spawn_health_task(
        manager.clone(),
        Arc::new(HttpHealthProber::new(upstream.clone(), storage.clone())),
        Duration::from_millis(config.health_check_interval_ms),
    );

    let engine = Arc::new(ProxyEngine::new(
        config.clone(),
        manager.clone(),
        coordinator,
        upstream,
    ));

    let app = switchboard_router::proxy_router(engine)
        .merge(switchboard_router::admin_router(
            manager.clone(),
            config.api_key.clone(),
        ))
        // Handler panics become a generic 500 instead of a dropped socket.
        .layer(tower_http::catch_panic::CatchPanicLayer::new());

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!(%bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Flush debounced backup writes before exit.
    health_task.abort();
    storage.force_flush().await;
    info!("shutdown complete");
    Ok(())
}

fn load_config(args: &cli::Cli) -> Result<ProxyConfig> {
    let mut patch = ProxyConfigPatch::default();
    if let Some(path) = &args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {path}"))?;
        let file_patch: ProxyConfigPatch =
            serde_json::from_str(&raw).with_context(|| format!("bad config file {path}"))?;
        patch.overlay(file_patch);
    }
    patch.overlay(args.as_patch());
    patch.into_config().context("incomplete configuration")
}

/// Periodic sweep that enqueues credentials whose token enters the
/// near-expiry window, so refreshes happen ahead of request traffic.
fn spawn_near_expiry_cron(
    manager: Arc<PoolManager>,
    coordinator: Arc<RefreshCoordinator>,
    storage: Storage,
    near_minutes: u64,
) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(near_minutes.max(1) * 60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let window_seconds = (near_minutes * 60) as i64;
            let now = time::OffsetDateTime::now_utc();
            for (provider_type, pool) in manager.snapshot().await {
                for credential in pool {
                    let Ok(Some(token)) =
                        storage.get_token(provider_type, &credential.uuid).await
                    else {
                        continue;
                    };
                    if token.is_near_expiry(now, window_seconds) {
                        coordinator.enqueue(provider_type, &credential.uuid).await;
                    }
                }
            }
        }
    });
}

fn parse_fallback_chain(config: &ProxyConfig) -> HashMap<ProviderType, Vec<ProviderType>> {
    let mut chain = HashMap::new();
    for (primary, fallbacks) in &config.provider_fallback_chain {
        let Some(primary) = ProviderType::parse(primary) else {
            warn!(%primary, "ignoring fallback chain entry with unknown primary type");
            continue;
        };
        let parsed: Vec<ProviderType> = fallbacks
            .iter()
            .filter_map(|tag| {
                let parsed = ProviderType::parse(tag);
                if parsed.is_none() {
                    warn!(%tag, "ignoring unknown fallback provider type");
                }
                parsed
            })
            .collect();
        chain.insert(primary, parsed);
    }
    chain
}

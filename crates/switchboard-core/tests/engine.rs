use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;

use switchboard_common::{
    Credential, Dialect, ProviderType, ProxyConfigPatch, Token, config::default_dialect_providers,
};
use switchboard_core::engine::{ProxyCall, ProxyEngine, ProxyReply};
use switchboard_core::upstream_client::{
    TransportError, UpstreamClient, UpstreamRequest, UpstreamResponse, UpstreamResponseBody,
};
use switchboard_pool::{PoolManager, PoolSettings, RefreshCoordinator, RefreshError, TokenRefresher};
use switchboard_protocol::eventstream::{HeaderValue, encode_frame};
use switchboard_storage::{MemoryStore, Storage};

/// Scripted upstream: responses keyed by the bearer token in the request.
#[derive(Default)]
struct ScriptedUpstream {
    by_token: Mutex<HashMap<String, ScriptedResponse>>,
    calls: AtomicUsize,
}

#[derive(Clone)]
enum ScriptedResponse {
    Status(u16, &'static str),
    KiroFrames(Vec<Bytes>),
}

impl ScriptedUpstream {
    fn script(&self, token: &str, response: ScriptedResponse) {
        self.by_token
            .lock()
            .unwrap()
            .insert(token.to_string(), response);
    }

    fn bearer(req: &UpstreamRequest) -> String {
        req.headers
            .iter()
            .find(|(name, _)| name == "authorization")
            .and_then(|(_, value)| value.strip_prefix("Bearer "))
            .unwrap_or_default()
            .to_string()
    }
}

impl UpstreamClient for ScriptedUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self
                .by_token
                .lock()
                .unwrap()
                .get(&Self::bearer(&req))
                .cloned();
            match scripted {
                Some(ScriptedResponse::Status(status, body)) => Ok(UpstreamResponse {
                    status,
                    headers: Vec::new(),
                    body: UpstreamResponseBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Some(ScriptedResponse::KiroFrames(frames)) => {
                    let (tx, rx) = tokio::sync::mpsc::channel(8);
                    tokio::spawn(async move {
                        for frame in frames {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                    });
                    Ok(UpstreamResponse {
                        status: 200,
                        headers: Vec::new(),
                        body: UpstreamResponseBody::Stream(rx),
                    })
                }
                None => Ok(UpstreamResponse {
                    status: 500,
                    headers: Vec::new(),
                    body: UpstreamResponseBody::Bytes(Bytes::new()),
                }),
            }
        })
    }
}

struct SlowRefresher {
    started_at: Mutex<Option<Instant>>,
    delay: Duration,
}

#[async_trait]
impl TokenRefresher for SlowRefresher {
    async fn refresh(
        &self,
        _credential: &Credential,
        token: &Token,
    ) -> Result<Token, RefreshError> {
        self.started_at.lock().unwrap().get_or_insert(Instant::now());
        tokio::time::sleep(self.delay).await;
        let mut fresh = Token::new("refreshed");
        fresh.refresh_token = token.refresh_token.clone();
        Ok(fresh)
    }
}

struct Harness {
    engine: ProxyEngine,
    manager: Arc<PoolManager>,
    storage: Storage,
    upstream: Arc<ScriptedUpstream>,
    _dir: tempfile::TempDir,
}

async fn harness(refresher: Arc<dyn TokenRefresher>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::with_store(
        Arc::new(MemoryStore::new()),
        "test:",
        dir.path().to_str().unwrap(),
    );
    let manager = Arc::new(PoolManager::new(storage.clone(), PoolSettings::default()));
    let coordinator = RefreshCoordinator::start(manager.clone(), refresher);
    let upstream = Arc::new(ScriptedUpstream::default());

    let config = ProxyConfigPatch {
        api_key: Some("sk-test".to_string()),
        request_max_retries: Some(1),
        dialect_providers: Some(default_dialect_providers()),
        ..Default::default()
    }
    .into_config()
    .unwrap();

    let engine = ProxyEngine::new(config, manager.clone(), coordinator, upstream.clone());
    Harness {
        engine,
        manager,
        storage,
        upstream,
        _dir: dir,
    }
}

async fn add_account(harness: &Harness, provider: ProviderType, uuid: &str, access: &str) {
    harness
        .manager
        .add(Credential::new(uuid, provider))
        .await
        .unwrap();
    let mut token = Token::new(access);
    token.refresh_token = Some(format!("r-{uuid}"));
    harness
        .storage
        .set_token(provider, uuid, &token, None)
        .await
        .unwrap();
}

fn claude_call(body: &str) -> ProxyCall {
    ProxyCall {
        dialect: Dialect::Claude,
        body: Bytes::copy_from_slice(body.as_bytes()),
        model_override: None,
        stream_override: None,
    }
}

fn kiro_frame(event_type: &str, payload: serde_json::Value) -> Bytes {
    encode_frame(
        &[(
            ":event-type".to_string(),
            HeaderValue::String(event_type.to_string()),
        )],
        payload.to_string().as_bytes(),
    )
}

async fn collect_stream(mut rx: tokio::sync::mpsc::Receiver<Bytes>) -> String {
    let mut out = String::new();
    while let Some(chunk) = rx.recv().await {
        out.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn claude_streaming_happy_path_event_order_and_usage() {
    let harness = harness(Arc::new(SlowRefresher {
        started_at: Mutex::new(None),
        delay: Duration::from_millis(1),
    }))
    .await;
    add_account(&harness, ProviderType::ClaudeKiroOauth, "a", "tok-a").await;
    harness.upstream.script(
        "tok-a",
        ScriptedResponse::KiroFrames(vec![
            kiro_frame("assistantResponseEvent", serde_json::json!({"content": "o"})),
            kiro_frame("assistantResponseEvent", serde_json::json!({"content": "k"})),
            kiro_frame(
                "metadataEvent",
                serde_json::json!({"usage": {"inputTokens": 28, "outputTokens": 2}}),
            ),
        ]),
    );

    let reply = harness
        .engine
        .handle(claude_call(
            r#"{"model":"claude-sonnet-4-5","stream":true,"max_tokens":16,
               "messages":[{"role":"user","content":"Say 'ok'."}]}"#,
        ))
        .await;

    let ProxyReply::Stream { content_type, rx } = reply else {
        panic!("expected a stream reply");
    };
    assert_eq!(content_type, "text/event-stream");
    let wire = collect_stream(rx).await;

    let events: Vec<&str> = wire
        .lines()
        .filter_map(|line| line.strip_prefix("event: "))
        .collect();
    assert_eq!(
        events,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    // The terminal usage is the 1:2:25 split of the upstream input count.
    let delta_line = wire
        .lines()
        .find(|line| line.contains("message_delta") && line.starts_with("data: "))
        .unwrap();
    let delta: serde_json::Value =
        serde_json::from_str(delta_line.strip_prefix("data: ").unwrap()).unwrap();
    let usage = &delta["usage"];
    let sum = usage["input_tokens"].as_u64().unwrap()
        + usage["cache_creation_input_tokens"].as_u64().unwrap()
        + usage["cache_read_input_tokens"].as_u64().unwrap();
    assert_eq!(sum, 28);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limited_credential_fails_over_and_is_penalized() {
    let harness = harness(Arc::new(SlowRefresher {
        started_at: Mutex::new(None),
        delay: Duration::from_millis(1),
    }))
    .await;
    add_account(&harness, ProviderType::ClaudeKiroOauth, "a", "tok-a").await;
    add_account(&harness, ProviderType::ClaudeKiroOauth, "b", "tok-b").await;
    // "a" is the LRU pick between two fresh credentials (insertion order),
    // gets rate limited, and the request fails over to "b".
    harness
        .upstream
        .script("tok-a", ScriptedResponse::Status(429, "slow down"));
    harness.upstream.script(
        "tok-b",
        ScriptedResponse::KiroFrames(vec![kiro_frame(
            "assistantResponseEvent",
            serde_json::json!({"content": "fine"}),
        )]),
    );

    let reply = harness
        .engine
        .handle(claude_call(
            r#"{"model":"claude-sonnet-4-5","stream":true,"max_tokens":4,
               "messages":[{"role":"user","content":"x"}]}"#,
        ))
        .await;
    assert!(matches!(reply, ProxyReply::Stream { .. }));

    let pool = harness.manager.snapshot().await[&ProviderType::ClaudeKiroOauth].clone();
    let a = pool.iter().find(|c| c.uuid == "a").unwrap();
    let b = pool.iter().find(|c| c.uuid == "b").unwrap();
    // One of the two was rate limited first (LRU order between fresh
    // credentials is insertion order, so it is "a").
    assert_eq!(a.error_count, 1);
    assert!(a.last_error_time.is_some());
    assert_eq!(b.error_count, 0);
    assert_eq!(b.usage_count, 1);
    // Both credentials hit the upstream exactly once.
    assert_eq!(harness.upstream.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn exhausted_pool_returns_claude_503_envelope() {
    let harness = harness(Arc::new(SlowRefresher {
        started_at: Mutex::new(None),
        delay: Duration::from_millis(1),
    }))
    .await;
    let mut credential = Credential::new("only", ProviderType::ClaudeKiroOauth);
    credential.is_disabled = true;
    harness.manager.add(credential).await.unwrap();

    let reply = harness
        .engine
        .handle(claude_call(
            r#"{"model":"claude-sonnet-4-5","max_tokens":4,
               "messages":[{"role":"user","content":"x"}]}"#,
        ))
        .await;
    let ProxyReply::Json { status, body } = reply else {
        panic!("expected json error");
    };
    assert_eq!(status, 503);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["type"], "no_healthy_providers");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn near_expiry_refresh_does_not_block_the_request() {
    let refresher = Arc::new(SlowRefresher {
        started_at: Mutex::new(None),
        delay: Duration::from_millis(300),
    });
    let harness = harness(refresher.clone()).await;

    harness
        .manager
        .add(Credential::new("a", ProviderType::ClaudeKiroOauth))
        .await
        .unwrap();
    let mut token = Token::new("tok-a");
    token.refresh_token = Some("r-a".to_string());
    // Near expiry (120 s < the 300 s window) but not yet expired.
    token.expires_at = Some(time::OffsetDateTime::now_utc() + time::Duration::seconds(120));
    harness
        .storage
        .set_token(ProviderType::ClaudeKiroOauth, "a", &token, None)
        .await
        .unwrap();
    harness.upstream.script(
        "tok-a",
        ScriptedResponse::KiroFrames(vec![kiro_frame(
            "assistantResponseEvent",
            serde_json::json!({"content": "ok"}),
        )]),
    );

    let started = Instant::now();
    let reply = harness
        .engine
        .handle(claude_call(
            r#"{"model":"claude-sonnet-4-5","stream":true,"max_tokens":4,
               "messages":[{"role":"user","content":"x"}]}"#,
        ))
        .await;
    let ProxyReply::Stream { rx, .. } = reply else {
        panic!("expected stream");
    };
    collect_stream(rx).await;
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_millis(250),
        "request must not wait for the {:?} refresh (took {elapsed:?})",
        Duration::from_millis(300)
    );

    // The background refresh still lands.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let stored = harness
        .storage
        .get_token(ProviderType::ClaudeKiroOauth, "a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token, "refreshed");
}

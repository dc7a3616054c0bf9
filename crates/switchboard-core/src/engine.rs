use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use switchboard_common::{Dialect, ProviderType, ProxyConfig, Token};
use switchboard_pool::{PoolManager, RefreshCoordinator, Selection};
use switchboard_transform::{
    RequestBody, ResponseBody, StreamTransform, ToolNameMap, route,
};

use crate::endpoints::{self, ANTIGRAVITY_VARIANTS};
use crate::error::{ProxyError, ProxyErrorKind};
use crate::kiro;
use crate::upstream_client::{
    UpstreamClient, UpstreamRequest, UpstreamResponse, UpstreamResponseBody,
};
use crate::wire::{StreamDecoder, encode_chunk, encode_done, stream_content_type};

/// A client that cannot drain its socket for this long gets cut off
/// instead of buffering the upstream in memory.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// One client request, already routed to a dialect by the HTTP layer.
#[derive(Debug)]
pub struct ProxyCall {
    pub dialect: Dialect,
    pub body: Bytes,
    /// Model from the URL path (Gemini routes).
    pub model_override: Option<String>,
    /// Streaming decided by the URL (`:streamGenerateContent`).
    pub stream_override: Option<bool>,
}

pub enum ProxyReply {
    Json {
        status: u16,
        body: Bytes,
    },
    Stream {
        content_type: &'static str,
        rx: tokio::sync::mpsc::Receiver<Bytes>,
    },
}

/// Orchestrates one request end to end: credential selection with
/// failover, near-expiry refresh scheduling, request conversion, the
/// upstream call, and the streaming relay back to the client.
pub struct ProxyEngine {
    config: ProxyConfig,
    manager: Arc<PoolManager>,
    coordinator: Arc<RefreshCoordinator>,
    client: Arc<dyn UpstreamClient>,
}

struct Attempt {
    selection: Selection,
    token: Token,
    upstream_body: RequestBody,
    names: ToolNameMap,
}

impl ProxyEngine {
    pub fn new(
        config: ProxyConfig,
        manager: Arc<PoolManager>,
        coordinator: Arc<RefreshCoordinator>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            config,
            manager,
            coordinator,
            client,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    /// Entry point. Errors come back as a dialect-native error body.
    pub async fn handle(&self, call: ProxyCall) -> ProxyReply {
        let dialect = call.dialect;
        match self.dispatch(call).await {
            Ok(reply) => reply,
            Err(err) => {
                if err.kind != ProxyErrorKind::ClientAborted {
                    warn!(kind = ?err.kind, message = %err.message, "request failed");
                }
                ProxyReply::Json {
                    status: err.status(),
                    body: err.to_body(dialect),
                }
            }
        }
    }

    fn target_provider(&self, dialect: Dialect) -> Result<ProviderType, ProxyError> {
        let key = match dialect {
            Dialect::OpenAiChat => "openai_chat",
            Dialect::OpenAiResponses => "openai_responses",
            Dialect::Claude | Dialect::Kiro => "claude",
            Dialect::Gemini => "gemini",
        };
        let tag = self
            .config
            .dialect_providers
            .get(key)
            .map(String::as_str)
            .unwrap_or_default();
        ProviderType::parse(tag).ok_or_else(|| {
            ProxyError::new(
                ProxyErrorKind::NoCredentialAvailable,
                format!("no provider configured for dialect {key}"),
            )
        })
    }

    async fn dispatch(&self, call: ProxyCall) -> Result<ProxyReply, ProxyError> {
        if call.body.len() > self.config.max_body_bytes {
            return Err(ProxyError::new(
                ProxyErrorKind::ValidationError,
                "request body too large",
            ));
        }
        let body = RequestBody::parse(call.dialect, &call.body)
            .map_err(|err| ProxyError::new(ProxyErrorKind::ValidationError, err.to_string()))?;
        let model = call
            .model_override
            .clone()
            .filter(|model| !model.is_empty())
            .unwrap_or_else(|| body.model().to_string());
        if model.is_empty() {
            return Err(ProxyError::new(
                ProxyErrorKind::ValidationError,
                "missing model",
            ));
        }
        let want_stream = call.stream_override.unwrap_or_else(|| body.wants_stream());
        let target = self.target_provider(call.dialect)?;

        let mut tried: Vec<String> = Vec::new();
        let mut transient_retries = 0u32;
        let mut last_error =
            ProxyError::new(ProxyErrorKind::NoCredentialAvailable, "no healthy providers");

        // Credential-switch loop: each credential is tried at most once.
        for _ in 0..=self.config.credential_switch_max_retries {
            let selection = self
                .manager
                .select_with_fallback(target, Some(&model), &tried)
                .await
                .map_err(|err| {
                    ProxyError::new(ProxyErrorKind::StoreUnavailable, err.to_string())
                })?;
            let Some(selection) = selection else {
                return Err(last_error);
            };
            tried.push(selection.credential.uuid.clone());

            let token = match self.acquire_token(&selection).await {
                Ok(token) => token,
                Err(err) => {
                    debug!(uuid = %selection.credential.uuid, %err, "skipping credential");
                    last_error = err;
                    continue;
                }
            };

            let upstream_dialect = selection.actual_type.dialect();
            let (upstream_body, names) = route::convert_request(&body, upstream_dialect, &model);
            let attempt = Attempt {
                selection,
                token,
                upstream_body,
                names,
            };

            match self.try_credential(attempt, call.dialect, &model, want_stream).await {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if matches!(
                        err.kind,
                        ProxyErrorKind::ValidationError
                            | ProxyErrorKind::ClientAborted
                            | ProxyErrorKind::UpstreamBadResponse
                    ) {
                        return Err(err);
                    }
                    // Transient upstream failures get a single retry on a
                    // different credential; rate limits may keep switching.
                    if err.kind == ProxyErrorKind::UpstreamTransient {
                        transient_retries += 1;
                        if transient_retries > 1 {
                            return Err(err);
                        }
                    }
                    last_error = err;
                }
            }
        }

        // The budget ran out; rate-limit exhaustion stays a 429.
        Err(last_error)
    }

    /// Token for this credential: enqueue a background refresh when near
    /// expiry, block on refresh only when already expired.
    async fn acquire_token(&self, selection: &Selection) -> Result<Token, ProxyError> {
        let provider_type = selection.actual_type;
        let uuid = &selection.credential.uuid;
        let storage = self.manager.storage();

        let token = storage
            .get_token(provider_type, uuid)
            .await
            .map_err(|err| ProxyError::new(ProxyErrorKind::StoreUnavailable, err.to_string()))?;
        let Some(token) = token else {
            self.coordinator.enqueue(provider_type, uuid).await;
            return Err(ProxyError::new(
                ProxyErrorKind::UpstreamAuthError,
                "credential has no stored token",
            ));
        };

        let now = OffsetDateTime::now_utc();
        if token.is_expired(now) {
            return self
                .coordinator
                .refresh(provider_type, uuid)
                .await
                .map_err(|err| {
                    ProxyError::new(ProxyErrorKind::UpstreamAuthError, err.to_string())
                });
        }
        if token.is_near_expiry(now, self.config.token_near_expiry_seconds) {
            // Fire and forget; this request proceeds on the current token.
            self.coordinator.enqueue(provider_type, uuid).await;
        }
        Ok(token)
    }

    /// All attempts against one credential: in-credential 429 backoff and,
    /// for the Antigravity family, base-URL variant rotation on 401/403.
    async fn try_credential(
        &self,
        attempt: Attempt,
        client_dialect: Dialect,
        model: &str,
        want_stream: bool,
    ) -> Result<ProxyReply, ProxyError> {
        let provider_type = attempt.selection.actual_type;
        let uuid = attempt.selection.credential.uuid.clone();
        let body_bytes = Bytes::from(attempt.upstream_body.to_bytes());
        let mut token = attempt.token;
        let mut variant = 0usize;
        let mut rate_tries = 0u32;

        loop {
            let endpoint = endpoints::build(provider_type, &token, model, want_stream, variant);
            let request = UpstreamRequest {
                method: "POST",
                url: endpoint.url,
                headers: endpoint.headers,
                body: Some(body_bytes.clone()),
                is_stream: want_stream,
            };

            let response = match self.client.send(request).await {
                Ok(response) => response,
                Err(transport) => {
                    self.manager
                        .report_error(provider_type, &uuid, &transport.message)
                        .await
                        .ok();
                    return Err(ProxyError::new(
                        ProxyErrorKind::UpstreamTransient,
                        transport.message,
                    ));
                }
            };

            match response.status {
                status if (200..300).contains(&status) => {
                    return self
                        .forward_response(response, attempt.names, client_dialect,
                                          provider_type, model)
                        .await;
                }
                429 | 503 => {
                    rate_tries += 1;
                    if rate_tries < self.config.request_max_retries {
                        // In-credential backoff; does not consume the
                        // credential-switch budget.
                        let delay = Duration::from_millis(
                            self.config.request_base_delay_ms
                                * 2u64.saturating_pow(rate_tries - 1),
                        );
                        debug!(%uuid, rate_tries, "upstream rate limited, backing off {delay:?}");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    self.manager
                        .report_error(provider_type, &uuid, "upstream rate limited")
                        .await
                        .ok();
                    return Err(ProxyError::new(
                        ProxyErrorKind::UpstreamRateLimited,
                        "upstream rate limited",
                    ));
                }
                401 | 403 => {
                    // Token problem, not credential fault: flag for refresh
                    // without touching the error counter.
                    self.coordinator.enqueue(provider_type, &uuid).await;
                    if provider_type == ProviderType::GeminiAntigravity
                        && variant + 1 < ANTIGRAVITY_VARIANTS.len()
                    {
                        variant += 1;
                        info!(%uuid, variant, "auth rejected, rotating antigravity base url");
                        // A refresh may already have landed a fresh token.
                        if let Ok(Some(fresh)) = self
                            .manager
                            .storage()
                            .get_token(provider_type, &uuid)
                            .await
                        {
                            token = fresh;
                        }
                        continue;
                    }
                    return Err(ProxyError::new(
                        ProxyErrorKind::UpstreamAuthError,
                        format!("upstream rejected auth ({})", response.status),
                    ));
                }
                status => {
                    self.manager
                        .report_error(provider_type, &uuid, &format!("upstream {status}"))
                        .await
                        .ok();
                    return Err(ProxyError::new(
                        ProxyErrorKind::UpstreamTransient,
                        format!("upstream returned {status}"),
                    ));
                }
            }
        }
    }

    async fn forward_response(
        &self,
        response: UpstreamResponse,
        names: ToolNameMap,
        client_dialect: Dialect,
        provider_type: ProviderType,
        model: &str,
    ) -> Result<ProxyReply, ProxyError> {
        let upstream_dialect = provider_type.dialect();
        match response.body {
            UpstreamResponseBody::Bytes(bytes) => {
                let parsed = if upstream_dialect == Dialect::Kiro {
                    kiro::unary_response(&bytes, model)
                        .map(ResponseBody::Claude)
                        .map_err(|err| {
                            ProxyError::new(ProxyErrorKind::UpstreamBadResponse, err.to_string())
                        })?
                } else {
                    ResponseBody::parse(upstream_dialect, &bytes).map_err(|err| {
                        ProxyError::new(ProxyErrorKind::UpstreamBadResponse, err.to_string())
                    })?
                };
                let converted = route::convert_response(&parsed, client_dialect, model, &names);
                Ok(ProxyReply::Json {
                    status: 200,
                    body: Bytes::from(converted.to_bytes()),
                })
            }
            UpstreamResponseBody::Stream(upstream_rx) => {
                Ok(self.relay_stream(upstream_rx, names, client_dialect, upstream_dialect, model))
            }
        }
    }

    /// Streaming relay: decode upstream framing, convert each chunk,
    /// re-encode for the client. Upstream order is preserved exactly; a
    /// bounded channel provides backpressure; a dropped receiver (client
    /// disconnect) stops the upstream read.
    fn relay_stream(
        &self,
        mut upstream_rx: tokio::sync::mpsc::Receiver<Bytes>,
        names: ToolNameMap,
        client_dialect: Dialect,
        upstream_dialect: Dialect,
        model: &str,
    ) -> ProxyReply {
        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(32);
        let mut decoder = StreamDecoder::new(upstream_dialect, model);
        let mut transform = StreamTransform::new(upstream_dialect, client_dialect, model, names);

        tokio::spawn(async move {
            // send() blocks when the client socket stops draining; a long
            // stall aborts the relay rather than buffering unboundedly.
            async fn emit(
                tx: &tokio::sync::mpsc::Sender<Bytes>,
                encoded: Bytes,
            ) -> Result<(), ()> {
                match tokio::time::timeout(WRITE_STALL_TIMEOUT, tx.send(encoded)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(()),
                    Err(_) => {
                        warn!("client write stalled, aborting stream");
                        Err(())
                    }
                }
            }

            while let Some(bytes) = upstream_rx.recv().await {
                let chunks = match decoder.push_bytes(&bytes) {
                    Ok(chunks) => chunks,
                    Err(err) => {
                        warn!(error = %err, "malformed upstream frame, ending stream");
                        return;
                    }
                };
                for chunk in chunks {
                    for converted in transform.transform_chunk(chunk) {
                        let Some(encoded) = encode_chunk(client_dialect, &converted) else {
                            continue;
                        };
                        if emit(&tx, encoded).await.is_err() {
                            // Client hung up; dropping upstream_rx aborts
                            // the upstream read.
                            return;
                        }
                    }
                }
            }
            for chunk in decoder.finish() {
                for converted in transform.transform_chunk(chunk) {
                    if let Some(encoded) = encode_chunk(client_dialect, &converted)
                        && emit(&tx, encoded).await.is_err()
                    {
                        return;
                    }
                }
            }
            for converted in transform.finish() {
                if let Some(encoded) = encode_chunk(client_dialect, &converted)
                    && emit(&tx, encoded).await.is_err()
                {
                    return;
                }
            }
            if let Some(done) = encode_done(client_dialect) {
                let _ = emit(&tx, done).await;
            }
        });

        ProxyReply::Stream {
            content_type: stream_content_type(client_dialect),
            rx,
        }
    }
}

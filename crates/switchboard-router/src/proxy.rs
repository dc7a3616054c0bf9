use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use switchboard_common::Dialect;
use switchboard_core::engine::{ProxyCall, ProxyEngine, ProxyReply};
use switchboard_core::error::{ProxyError, ProxyErrorKind};
use switchboard_core::verify_client_key;
use switchboard_protocol::{claude, gemini, openai};

#[derive(Clone)]
pub struct RouterState {
    pub engine: Arc<ProxyEngine>,
}

pub fn proxy_router(engine: Arc<ProxyEngine>) -> Router {
    let state = RouterState { engine };
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(claude_messages))
        .route("/v1beta/models/{*rest}", post(gemini_generate))
        .route("/v1/models", get(models_v1))
        .route("/v1beta/models", get(gemini_models))
        .layer(middleware::from_fn_with_state(state.clone(), client_auth))
        .route("/health", get(health))
        .with_state(state)
}

async fn client_auth(
    State(state): State<RouterState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let query = req.uri().query().map(str::to_string);
    if !verify_client_key(
        req.headers(),
        query.as_deref(),
        &state.engine.config().api_key,
    ) {
        let dialect = dialect_for_path(req.uri().path());
        let err = ProxyError::new(ProxyErrorKind::AuthError, "invalid api key");
        return error_response(&err, dialect);
    }
    next.run(req).await
}

fn dialect_for_path(path: &str) -> Dialect {
    if path.starts_with("/v1beta") {
        Dialect::Gemini
    } else if path.starts_with("/v1/messages") {
        Dialect::Claude
    } else if path.starts_with("/v1/responses") {
        Dialect::OpenAiResponses
    } else {
        Dialect::OpenAiChat
    }
}

fn error_response(err: &ProxyError, dialect: Dialect) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        err.to_body(dialect),
    )
        .into_response()
}

fn reply_to_response(reply: ProxyReply) -> Response {
    match reply {
        ProxyReply::Json { status, body } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        ProxyReply::Stream { content_type, rx } => {
            let stream = ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>);
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                Body::from_stream(stream),
            )
                .into_response()
        }
    }
}

async fn openai_chat(State(state): State<RouterState>, body: Bytes) -> Response {
    let reply = state
        .engine
        .handle(ProxyCall {
            dialect: Dialect::OpenAiChat,
            body,
            model_override: None,
            stream_override: None,
        })
        .await;
    reply_to_response(reply)
}

async fn openai_responses(State(state): State<RouterState>, body: Bytes) -> Response {
    let reply = state
        .engine
        .handle(ProxyCall {
            dialect: Dialect::OpenAiResponses,
            body,
            model_override: None,
            stream_override: None,
        })
        .await;
    reply_to_response(reply)
}

async fn claude_messages(State(state): State<RouterState>, body: Bytes) -> Response {
    let reply = state
        .engine
        .handle(ProxyCall {
            dialect: Dialect::Claude,
            body,
            model_override: None,
            stream_override: None,
        })
        .await;
    reply_to_response(reply)
}

/// `/v1beta/models/{model}:generateContent` and `:streamGenerateContent`.
async fn gemini_generate(
    State(state): State<RouterState>,
    Path(rest): Path<String>,
    body: Bytes,
) -> Response {
    let Some((model, method)) = rest.rsplit_once(':') else {
        let err = ProxyError::new(ProxyErrorKind::ValidationError, "missing :generateContent");
        return error_response(&err, Dialect::Gemini);
    };
    let stream = match method {
        "generateContent" => false,
        "streamGenerateContent" => true,
        _ => {
            let err = ProxyError::new(
                ProxyErrorKind::ValidationError,
                format!("unknown method {method}"),
            );
            return error_response(&err, Dialect::Gemini);
        }
    };

    let reply = state
        .engine
        .handle(ProxyCall {
            dialect: Dialect::Gemini,
            body,
            model_override: Some(model.to_string()),
            stream_override: Some(stream),
        })
        .await;
    reply_to_response(reply)
}

/// Models advertised per family when at least one credential can serve it.
const CLAUDE_MODELS: [&str; 3] = [
    "claude-opus-4-5",
    "claude-sonnet-4-5",
    "claude-3-5-haiku-20241022",
];
const GEMINI_MODELS: [&str; 3] = ["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"];
const OPENAI_MODELS: [&str; 3] = ["gpt-5", "gpt-5-codex", "gpt-4o-mini"];

async fn served_families(state: &RouterState) -> Vec<&'static str> {
    let pools = state.engine.manager().snapshot().await;
    let mut families = Vec::new();
    for (provider_type, pool) in pools {
        if pool.iter().any(|c| c.is_healthy && !c.is_disabled) {
            let family = provider_type.protocol_prefix();
            if !families.contains(&family) {
                families.push(family);
            }
        }
    }
    families.sort();
    families
}

async fn openai_models(State(state): State<RouterState>) -> Response {
    let families = served_families(&state).await;
    let mut data = Vec::new();
    for family in families {
        let models: &[&str] = match family {
            "claude" => &CLAUDE_MODELS,
            "gemini" => &GEMINI_MODELS,
            _ => &OPENAI_MODELS,
        };
        for model in models {
            data.push(openai::ModelInfo {
                id: model.to_string(),
                object: "model".to_string(),
                created: 0,
                owned_by: "switchboard".to_string(),
            });
        }
    }
    axum::Json(openai::ModelList {
        object: "list".to_string(),
        data,
    })
    .into_response()
}

async fn gemini_models(State(state): State<RouterState>) -> Response {
    let families = served_families(&state).await;
    let mut models = Vec::new();
    if families.contains(&"gemini") {
        for model in GEMINI_MODELS {
            models.push(gemini::ModelInfo {
                name: format!("models/{model}"),
                display_name: Some(model.to_string()),
                description: None,
                input_token_limit: Some(1_048_576),
                output_token_limit: Some(65_536),
                supported_generation_methods: Some(vec![
                    "generateContent".to_string(),
                    "streamGenerateContent".to_string(),
                ]),
            });
        }
    }
    axum::Json(gemini::ModelList { models }).into_response()
}

async fn health(State(state): State<RouterState>) -> Response {
    let store = state.engine.manager().storage().get_status();
    let (healthy, total) = state.engine.manager().account_counts().await;
    let status = if store.connected && (total == 0 || healthy > 0) {
        "ok"
    } else {
        "degraded"
    };
    axum::Json(json!({
        "status": status,
        "store": {
            "connected": store.connected,
            "queuedWrites": store.queued_writes,
        },
        "accounts": {"healthy": healthy, "total": total},
    }))
    .into_response()
}

/// OpenAI and Claude clients share `/v1/models`; the `anthropic-version`
/// header picks the Claude shape.
async fn models_v1(State(state): State<RouterState>, headers: HeaderMap) -> Response {
    if headers.contains_key("anthropic-version") {
        let families = served_families(&state).await;
        let mut data = Vec::new();
        if families.contains(&"claude") {
            for model in CLAUDE_MODELS {
                data.push(claude::ModelInfo {
                    id: model.to_string(),
                    r#type: "model".to_string(),
                    display_name: model.to_string(),
                    created_at: "2025-01-01T00:00:00Z".to_string(),
                });
            }
        }
        return axum::Json(claude::ModelList {
            first_id: data.first().map(|m| m.id.clone()),
            last_id: data.last().map(|m| m.id.clone()),
            has_more: false,
            data,
        })
        .into_response();
    }
    openai_models(State(state)).await
}

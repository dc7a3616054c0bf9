use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, body::Body};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use switchboard_common::{Credential, CredentialPatch, ProviderType};
use switchboard_core::verify_client_key;
use switchboard_pool::PoolManager;

#[derive(Clone)]
pub struct AdminState {
    pub manager: Arc<PoolManager>,
    pub api_key: String,
}

pub fn admin_router(manager: Arc<PoolManager>, api_key: String) -> Router {
    let state = AdminState { manager, api_key };
    Router::new()
        .route("/api/providers", get(list_providers))
        .route("/api/providers", post(create_provider))
        .route("/api/providers/{type}/{uuid}", patch(update_provider))
        .route("/api/providers/{type}/{uuid}", delete(delete_provider))
        .route("/api/providers/{type}/{uuid}/reset", post(reset_provider))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

async fn admin_auth(
    State(state): State<AdminState>,
    req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let query = req.uri().query().map(str::to_string);
    if !verify_client_key(req.headers(), query.as_deref(), &state.api_key) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid api key"})),
        )
            .into_response();
    }
    next.run(req).await
}

fn parse_type(raw: &str) -> Result<ProviderType, Response> {
    ProviderType::parse(raw).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown provider type {raw}")})),
        )
            .into_response()
    })
}

async fn list_providers(State(state): State<AdminState>) -> Response {
    let pools = state.manager.snapshot().await;
    let mut out = serde_json::Map::new();
    for (provider_type, pool) in pools {
        out.insert(
            provider_type.as_str().to_string(),
            serde_json::to_value(pool).unwrap_or_default(),
        );
    }
    Json(serde_json::Value::Object(out)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProvider {
    provider_type: ProviderType,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    custom_name: Option<String>,
    #[serde(default)]
    check_health: bool,
    #[serde(default)]
    check_model_name: Option<String>,
    #[serde(default)]
    creds_path: Option<String>,
}

async fn create_provider(
    State(state): State<AdminState>,
    Json(req): Json<CreateProvider>,
) -> Response {
    let uuid = req
        .uuid
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let mut credential = Credential::new(uuid.clone(), req.provider_type);
    credential.custom_name = req.custom_name;
    credential.check_health = req.check_health;
    credential.check_model_name = req.check_model_name;
    credential.creds_path = req.creds_path;

    match state.manager.add(credential.clone()).await {
        Ok(()) => {
            info!(provider = %req.provider_type, %uuid, "provider credential added");
            (StatusCode::CREATED, Json(credential)).into_response()
        }
        Err(err) => storage_error(err),
    }
}

async fn update_provider(
    State(state): State<AdminState>,
    Path((provider_type, uuid)): Path<(String, String)>,
    Json(patch): Json<CredentialPatch>,
) -> Response {
    let provider_type = match parse_type(&provider_type) {
        Ok(provider_type) => provider_type,
        Err(response) => return response,
    };
    match state.manager.update(provider_type, &uuid, &patch).await {
        Ok(updated) => Json(updated).into_response(),
        Err(err) => storage_error(err),
    }
}

async fn delete_provider(
    State(state): State<AdminState>,
    Path((provider_type, uuid)): Path<(String, String)>,
) -> Response {
    let provider_type = match parse_type(&provider_type) {
        Ok(provider_type) => provider_type,
        Err(response) => return response,
    };
    match state.manager.delete(provider_type, &uuid).await {
        Ok(()) => {
            info!(provider = %provider_type, %uuid, "provider credential deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => storage_error(err),
    }
}

/// Manual health reset: healthy again, error count cleared.
async fn reset_provider(
    State(state): State<AdminState>,
    Path((provider_type, uuid)): Path<(String, String)>,
) -> Response {
    let provider_type = match parse_type(&provider_type) {
        Ok(provider_type) => provider_type,
        Err(response) => return response,
    };
    match state.manager.set_healthy(provider_type, &uuid, true).await {
        Ok(()) => Json(json!({"reset": true})).into_response(),
        Err(err) => storage_error(err),
    }
}

fn storage_error(err: switchboard_pool::PoolError) -> Response {
    let status = match &err {
        switchboard_pool::PoolError::UnknownCredential { .. } => StatusCode::NOT_FOUND,
        switchboard_pool::PoolError::Store(inner) => match inner {
            switchboard_storage::StoreError::Missing(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        },
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use time::OffsetDateTime;

use switchboard_common::{Credential, ProviderType, Token};
use switchboard_pool::{HealthProber, RefreshError, TokenRefresher};

use crate::endpoints;
use crate::upstream_client::{UpstreamClient, UpstreamRequest, UpstreamResponseBody};

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_CLIENT_ID: &str =
    "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com";
const GOOGLE_CLIENT_SECRET: &str = "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";

const OPENAI_TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const OPENAI_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";

const QWEN_TOKEN_URL: &str = "https://chat.qwen.ai/api/v1/oauth2/token";
const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";

const IFLOW_TOKEN_URL: &str = "https://iflow.cn/oauth/token";
const IFLOW_CLIENT_ID: &str = "10009311001";

enum RefreshWire {
    /// `application/x-www-form-urlencoded` grant.
    Form {
        url: &'static str,
        client_id: &'static str,
        client_secret: Option<&'static str>,
    },
    /// Vendor-specific JSON body (the Kiro desktop auth endpoint).
    KiroJson,
    /// Static API key; nothing to rotate.
    NoOp,
}

fn refresh_wire(provider_type: ProviderType) -> RefreshWire {
    match provider_type {
        ProviderType::ClaudeKiroOauth => RefreshWire::KiroJson,
        ProviderType::ClaudeCustom | ProviderType::OpenAiCustom => RefreshWire::NoOp,
        ProviderType::GeminiCliOauth | ProviderType::GeminiAntigravity => RefreshWire::Form {
            url: GOOGLE_TOKEN_URL,
            client_id: GOOGLE_CLIENT_ID,
            client_secret: Some(GOOGLE_CLIENT_SECRET),
        },
        ProviderType::OpenAiCodex => RefreshWire::Form {
            url: OPENAI_TOKEN_URL,
            client_id: OPENAI_CLIENT_ID,
            client_secret: None,
        },
        ProviderType::OpenAiQwenOauth => RefreshWire::Form {
            url: QWEN_TOKEN_URL,
            client_id: QWEN_CLIENT_ID,
            client_secret: None,
        },
        ProviderType::OpenAiIflow => RefreshWire::Form {
            url: IFLOW_TOKEN_URL,
            client_id: IFLOW_CLIENT_ID,
            client_secret: None,
        },
    }
}

/// Table-driven refresh-token exchange over the shared upstream client.
pub struct HttpTokenRefresher {
    client: Arc<dyn UpstreamClient>,
}

impl HttpTokenRefresher {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    async fn post(
        &self,
        url: String,
        content_type: &str,
        body: String,
    ) -> Result<Value, RefreshError> {
        let request = UpstreamRequest {
            method: "POST",
            url,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: Some(Bytes::from(body)),
            is_stream: false,
        };
        let response = self
            .client
            .send(request)
            .await
            .map_err(|err| RefreshError::Upstream(err.message))?;
        let UpstreamResponseBody::Bytes(bytes) = response.body else {
            return Err(RefreshError::Upstream("unexpected streaming body".to_string()));
        };
        if !(200..300).contains(&response.status) {
            return Err(RefreshError::Upstream(format!(
                "refresh endpoint returned {}",
                response.status
            )));
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| RefreshError::Upstream(format!("bad refresh response: {err}")))
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        credential: &Credential,
        token: &Token,
    ) -> Result<Token, RefreshError> {
        let wire = refresh_wire(credential.provider_type);
        if matches!(wire, RefreshWire::NoOp) {
            return Ok(token.clone());
        }
        let refresh_token = token.refresh_token.clone().ok_or_else(|| {
            RefreshError::Upstream("credential has no refresh token".to_string())
        })?;

        let payload = match wire {
            RefreshWire::NoOp => unreachable!(),
            RefreshWire::Form {
                url,
                client_id,
                client_secret,
            } => {
                let mut form = format!(
                    "grant_type=refresh_token&client_id={client_id}&refresh_token={}",
                    urlencode(&refresh_token)
                );
                if let Some(secret) = client_secret {
                    form.push_str(&format!("&client_secret={secret}"));
                }
                self.post(url.to_string(), "application/x-www-form-urlencoded", form)
                    .await?
            }
            RefreshWire::KiroJson => {
                let region = token.extra_str("idcRegion").unwrap_or(crate::kiro::DEFAULT_REGION);
                let url = format!("https://prod.{region}.auth.desktop.kiro.dev/refreshToken");
                let body = serde_json::json!({"refreshToken": refresh_token}).to_string();
                self.post(url, "application/json", body).await?
            }
        };

        let access_token = payload
            .get("accessToken")
            .or_else(|| payload.get("access_token"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RefreshError::Upstream("refresh response missing access token".to_string())
            })?;

        let mut fresh = Token::new(access_token);
        fresh.refresh_token = payload
            .get("refreshToken")
            .or_else(|| payload.get("refresh_token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(Some(refresh_token));
        fresh.expires_at = payload
            .get("expiresIn")
            .or_else(|| payload.get("expires_in"))
            .and_then(Value::as_i64)
            .map(|seconds| OffsetDateTime::now_utc() + time::Duration::seconds(seconds));
        // Provider-specific fields ride along unchanged.
        fresh.extra = token.extra.clone();
        Ok(fresh)
    }
}

fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// One-token generation probe in each family's native dialect.
pub struct HttpHealthProber {
    client: Arc<dyn UpstreamClient>,
    storage: switchboard_storage::Storage,
}

impl HttpHealthProber {
    pub fn new(client: Arc<dyn UpstreamClient>, storage: switchboard_storage::Storage) -> Self {
        Self { client, storage }
    }

    fn probe_body(provider_type: ProviderType, model: &str) -> Value {
        match provider_type.protocol_prefix() {
            "claude" => serde_json::json!({
                "model": model,
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "hi"}],
            }),
            "gemini" => serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
                "generationConfig": {"maxOutputTokens": 1},
            }),
            _ => serde_json::json!({
                "model": model,
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "hi"}],
            }),
        }
    }
}

#[async_trait]
impl HealthProber for HttpHealthProber {
    async fn probe(&self, credential: &Credential, model: &str) -> Result<(), String> {
        let token = self
            .storage
            .get_token(credential.provider_type, &credential.uuid)
            .await
            .map_err(|err| err.to_string())?
            .ok_or_else(|| "no stored token".to_string())?;

        let endpoint = endpoints::build(credential.provider_type, &token, model, false, 0);
        let body = Self::probe_body(credential.provider_type, model);
        let request = UpstreamRequest {
            method: "POST",
            url: endpoint.url,
            headers: endpoint.headers,
            body: Some(Bytes::from(body.to_string())),
            is_stream: false,
        };
        let response = self
            .client
            .send(request)
            .await
            .map_err(|err| err.message)?;
        if (200..300).contains(&response.status) {
            Ok(())
        } else {
            Err(format!("probe returned {}", response.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_reserved_bytes() {
        assert_eq!(urlencode("a b+c/d"), "a%20b%2Bc%2Fd");
        assert_eq!(urlencode("plain-token_1.2~3"), "plain-token_1.2~3");
    }

    #[test]
    fn custom_providers_do_not_rotate() {
        assert!(matches!(
            refresh_wire(ProviderType::ClaudeCustom),
            RefreshWire::NoOp
        ));
        assert!(matches!(
            refresh_wire(ProviderType::GeminiAntigravity),
            RefreshWire::Form { .. }
        ));
    }

    #[test]
    fn probe_body_is_family_keyed() {
        let body = HttpHealthProber::probe_body(ProviderType::GeminiCliOauth, "gemini-2.5-flash");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1);
        let body = HttpHealthProber::probe_body(ProviderType::ClaudeKiroOauth, "claude-3-5-haiku");
        assert_eq!(body["max_tokens"], 1);
    }
}

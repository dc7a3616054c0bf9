use bytes::Bytes;
use switchboard_common::Dialect;
use switchboard_protocol::{claude, gemini, openai};

/// Closed classification of everything the pipeline can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyErrorKind {
    /// Client-side auth failure.
    AuthError,
    /// Unparsable or oversized body.
    ValidationError,
    /// Every candidate across the fallback chain was ineligible.
    NoCredentialAvailable,
    /// 429 after the credential-switch budget ran out.
    UpstreamRateLimited,
    /// 401/403 that refresh + retry could not recover.
    UpstreamAuthError,
    /// Network error or upstream 5xx after the single retry.
    UpstreamTransient,
    /// Upstream body violated its own schema; no credential penalty.
    UpstreamBadResponse,
    /// Primary store and cache both missed.
    StoreUnavailable,
    /// Downstream hung up; cleanup only, never rendered.
    ClientAborted,
}

impl ProxyErrorKind {
    pub fn status(&self) -> u16 {
        match self {
            ProxyErrorKind::AuthError => 401,
            ProxyErrorKind::ValidationError => 400,
            ProxyErrorKind::NoCredentialAvailable => 503,
            ProxyErrorKind::UpstreamRateLimited => 429,
            ProxyErrorKind::UpstreamAuthError => 502,
            ProxyErrorKind::UpstreamTransient => 502,
            ProxyErrorKind::UpstreamBadResponse => 502,
            ProxyErrorKind::StoreUnavailable => 503,
            ProxyErrorKind::ClientAborted => 499,
        }
    }

    /// Error `type` string in the Claude envelope.
    fn claude_type(&self) -> &'static str {
        match self {
            ProxyErrorKind::AuthError => "authentication_error",
            ProxyErrorKind::ValidationError => "invalid_request_error",
            ProxyErrorKind::NoCredentialAvailable => "no_healthy_providers",
            ProxyErrorKind::UpstreamRateLimited => "rate_limit_error",
            ProxyErrorKind::UpstreamAuthError
            | ProxyErrorKind::UpstreamTransient
            | ProxyErrorKind::UpstreamBadResponse => "api_error",
            ProxyErrorKind::StoreUnavailable => "overloaded_error",
            ProxyErrorKind::ClientAborted => "api_error",
        }
    }

    fn openai_type(&self) -> &'static str {
        match self {
            ProxyErrorKind::AuthError => "invalid_api_key",
            ProxyErrorKind::ValidationError => "invalid_request_error",
            ProxyErrorKind::NoCredentialAvailable => "no_healthy_providers",
            ProxyErrorKind::UpstreamRateLimited => "rate_limit_exceeded",
            _ => "server_error",
        }
    }

    fn gemini_status(&self) -> &'static str {
        match self {
            ProxyErrorKind::AuthError => "UNAUTHENTICATED",
            ProxyErrorKind::ValidationError => "INVALID_ARGUMENT",
            ProxyErrorKind::NoCredentialAvailable | ProxyErrorKind::StoreUnavailable => {
                "UNAVAILABLE"
            }
            ProxyErrorKind::UpstreamRateLimited => "RESOURCE_EXHAUSTED",
            _ => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyError {
    pub kind: ProxyErrorKind,
    pub message: String,
}

impl ProxyError {
    pub fn new(kind: ProxyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }

    /// Render in the client dialect's native error envelope.
    pub fn to_body(&self, dialect: Dialect) -> Bytes {
        let json = match dialect.body_dialect() {
            Dialect::Claude => {
                serde_json::to_vec(&claude::ErrorBody::new(self.kind.claude_type(), &self.message))
            }
            Dialect::Gemini => serde_json::to_vec(&gemini::ErrorBody::new(
                self.status(),
                self.kind.gemini_status(),
                &self.message,
            )),
            _ => serde_json::to_vec(&openai::ErrorBody::new(
                self.kind.openai_type(),
                &self.message,
            )),
        };
        Bytes::from(json.unwrap_or_default())
    }
}

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ProxyError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_renders_claude_envelope() {
        let err = ProxyError::new(ProxyErrorKind::NoCredentialAvailable, "pool exhausted");
        assert_eq!(err.status(), 503);
        let body: serde_json::Value =
            serde_json::from_slice(&err.to_body(Dialect::Claude)).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "no_healthy_providers");
    }

    #[test]
    fn gemini_envelope_carries_grpc_status() {
        let err = ProxyError::new(ProxyErrorKind::UpstreamRateLimited, "slow down");
        let body: serde_json::Value =
            serde_json::from_slice(&err.to_body(Dialect::Gemini)).unwrap();
        assert_eq!(body["error"]["code"], 429);
        assert_eq!(body["error"]["status"], "RESOURCE_EXHAUSTED");
    }
}

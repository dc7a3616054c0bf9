use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::provider::ProviderType;

/// One pooled upstream identity. Stored as a hash field under its pool key;
/// the pool manager's in-memory copy is write-through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub uuid: String,
    pub provider_type: ProviderType,
    /// Legacy location hint; tokens live in the store keyed by
    /// `(providerType, uuid)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creds_path: Option<String>,
    #[serde(default = "default_true")]
    pub is_healthy: bool,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_error_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
    #[serde(default)]
    pub usage_count: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_used: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_health_check_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_model_name: Option<String>,
    #[serde(default)]
    pub check_health: bool,
    #[serde(default)]
    pub needs_refresh: bool,
    #[serde(default)]
    pub refresh_count: u32,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub not_supported_models: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Credential {
    pub fn new(uuid: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            uuid: uuid.into(),
            provider_type,
            creds_path: None,
            is_healthy: true,
            is_disabled: false,
            error_count: 0,
            last_error_time: None,
            last_error_message: None,
            usage_count: 0,
            last_used: None,
            last_health_check_time: None,
            last_health_check_model: None,
            check_model_name: None,
            check_health: false,
            needs_refresh: false,
            refresh_count: 0,
            not_supported_models: BTreeSet::new(),
            custom_name: None,
        }
    }

    pub fn supports_model(&self, model: &str) -> bool {
        !self.not_supported_models.contains(model)
    }
}

/// Partial update applied through the storage facade; `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPatch {
    pub is_disabled: Option<bool>,
    pub check_health: Option<bool>,
    pub check_model_name: Option<String>,
    pub custom_name: Option<String>,
    pub not_supported_models: Option<BTreeSet<String>>,
    pub creds_path: Option<String>,
}

impl CredentialPatch {
    pub fn apply(&self, credential: &mut Credential) {
        if let Some(is_disabled) = self.is_disabled {
            credential.is_disabled = is_disabled;
            if !is_disabled {
                // Re-enable resets health bookkeeping.
                credential.is_healthy = true;
                credential.error_count = 0;
            }
        }
        if let Some(check_health) = self.check_health {
            credential.check_health = check_health;
        }
        if let Some(check_model_name) = &self.check_model_name {
            credential.check_model_name = Some(check_model_name.clone());
        }
        if let Some(custom_name) = &self.custom_name {
            credential.custom_name = Some(custom_name.clone());
        }
        if let Some(models) = &self.not_supported_models {
            credential.not_supported_models = models.clone();
        }
        if let Some(creds_path) = &self.creds_path {
            credential.creds_path = Some(creds_path.clone());
        }
    }
}

/// OAuth material for one credential, stored separately from the pool row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// Provider-specific fields (`idcRegion`, `profileArn`, `accountId`,
    /// `email`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Token {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    /// Remaining lifetime is at most `window_seconds`.
    pub fn is_near_expiry(&self, now: OffsetDateTime, window_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now + time::Duration::seconds(window_seconds) >= expires_at,
            None => false,
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.is_near_expiry(now, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_camel_case_wire_names() {
        let mut credential = Credential::new("u1", ProviderType::ClaudeKiroOauth);
        credential.error_count = 2;
        let value = serde_json::to_value(&credential).unwrap();
        assert_eq!(value["providerType"], "claude-kiro-oauth");
        assert_eq!(value["errorCount"], 2);
        assert_eq!(value["isHealthy"], true);
    }

    #[test]
    fn near_expiry_window() {
        let now = OffsetDateTime::UNIX_EPOCH + time::Duration::days(20_000);
        let mut token = Token::new("a");
        token.expires_at = Some(now + time::Duration::seconds(120));
        assert!(token.is_near_expiry(now, 300));
        assert!(!token.is_near_expiry(now, 60));
        assert!(!token.is_expired(now));
    }

    #[test]
    fn patch_reenable_resets_health() {
        let mut credential = Credential::new("u1", ProviderType::GeminiCliOauth);
        credential.is_disabled = true;
        credential.is_healthy = false;
        credential.error_count = 5;
        CredentialPatch {
            is_disabled: Some(false),
            ..Default::default()
        }
        .apply(&mut credential);
        assert!(credential.is_healthy);
        assert_eq!(credential.error_count, 0);
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged process configuration.
///
/// Merge order: CLI > ENV > config file > defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Downstream client key; compared in constant time.
    pub api_key: String,
    /// Redis URL for the primary keyed store. Empty means file/memory only.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Keyspace prefix in the primary store.
    pub redis_prefix: String,
    /// Fail construction instead of degrading when the primary store is
    /// unreachable.
    pub storage_strict_mode: bool,
    /// Directory for the file backup mirror.
    pub data_dir: String,
    /// Optional outbound proxy for upstream egress.
    #[serde(default)]
    pub proxy: Option<String>,

    pub max_error_count: u32,
    pub health_check_interval_ms: u64,
    pub save_debounce_ms: u64,
    pub request_max_retries: u32,
    pub request_base_delay_ms: u64,
    pub credential_switch_max_retries: u32,
    pub cron_near_minutes: u64,
    pub cron_refresh_token: bool,
    pub token_near_expiry_seconds: i64,
    pub selection_cooldown_seconds: i64,
    pub max_body_bytes: usize,
    /// providerType -> ordered fallback providerTypes (protocol prefix must
    /// match at selection time).
    #[serde(default)]
    pub provider_fallback_chain: HashMap<String, Vec<String>>,
    /// Client dialect -> target provider type. Keys: `openai_chat`,
    /// `openai_responses`, `claude`, `gemini`.
    #[serde(default)]
    pub dialect_providers: HashMap<String, String>,
}

pub fn default_dialect_providers() -> HashMap<String, String> {
    HashMap::from([
        ("openai_chat".to_string(), "openai-custom".to_string()),
        ("openai_responses".to_string(), "openai-codex".to_string()),
        ("claude".to_string(), "claude-kiro-oauth".to_string()),
        ("gemini".to_string(), "gemini-cli-oauth".to_string()),
    ])
}

/// Optional layer used when merging configuration sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub api_key: Option<String>,
    pub redis_url: Option<String>,
    pub redis_prefix: Option<String>,
    pub storage_strict_mode: Option<bool>,
    pub data_dir: Option<String>,
    pub proxy: Option<String>,
    pub max_error_count: Option<u32>,
    pub health_check_interval_ms: Option<u64>,
    pub save_debounce_ms: Option<u64>,
    pub request_max_retries: Option<u32>,
    pub request_base_delay_ms: Option<u64>,
    pub credential_switch_max_retries: Option<u32>,
    pub cron_near_minutes: Option<u64>,
    pub cron_refresh_token: Option<bool>,
    pub token_near_expiry_seconds: Option<i64>,
    pub selection_cooldown_seconds: Option<i64>,
    pub max_body_bytes: Option<usize>,
    pub provider_fallback_chain: Option<HashMap<String, Vec<String>>>,
    pub dialect_providers: Option<HashMap<String, String>>,
}

impl ProxyConfigPatch {
    pub fn overlay(&mut self, other: ProxyConfigPatch) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(host);
        take!(port);
        take!(api_key);
        take!(redis_url);
        take!(redis_prefix);
        take!(storage_strict_mode);
        take!(data_dir);
        take!(proxy);
        take!(max_error_count);
        take!(health_check_interval_ms);
        take!(save_debounce_ms);
        take!(request_max_retries);
        take!(request_base_delay_ms);
        take!(credential_switch_max_retries);
        take!(cron_near_minutes);
        take!(cron_refresh_token);
        take!(token_near_expiry_seconds);
        take!(selection_cooldown_seconds);
        take!(max_body_bytes);
        take!(provider_fallback_chain);
        take!(dialect_providers);
    }

    pub fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        Ok(ProxyConfig {
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(8998),
            api_key: self.api_key.ok_or(ConfigError::MissingField("api_key"))?,
            redis_url: self.redis_url.filter(|url| !url.is_empty()),
            redis_prefix: self.redis_prefix.unwrap_or_else(|| "aiclient:".to_string()),
            storage_strict_mode: self.storage_strict_mode.unwrap_or(false),
            data_dir: self.data_dir.unwrap_or_else(|| "configs".to_string()),
            proxy: self.proxy,
            max_error_count: self.max_error_count.unwrap_or(3),
            health_check_interval_ms: self.health_check_interval_ms.unwrap_or(600_000),
            save_debounce_ms: self.save_debounce_ms.unwrap_or(1_000),
            request_max_retries: self.request_max_retries.unwrap_or(3),
            request_base_delay_ms: self.request_base_delay_ms.unwrap_or(1_000),
            credential_switch_max_retries: self.credential_switch_max_retries.unwrap_or(5),
            cron_near_minutes: self.cron_near_minutes.unwrap_or(15),
            cron_refresh_token: self.cron_refresh_token.unwrap_or(true),
            token_near_expiry_seconds: self.token_near_expiry_seconds.unwrap_or(300),
            selection_cooldown_seconds: self.selection_cooldown_seconds.unwrap_or(60),
            max_body_bytes: self.max_body_bytes.unwrap_or(10 * 1024 * 1024),
            provider_fallback_chain: self.provider_fallback_chain.unwrap_or_default(),
            dialect_providers: self
                .dialect_providers
                .unwrap_or_else(default_dialect_providers),
        })
    }
}

impl From<ProxyConfig> for ProxyConfigPatch {
    fn from(value: ProxyConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            api_key: Some(value.api_key),
            redis_url: value.redis_url,
            redis_prefix: Some(value.redis_prefix),
            storage_strict_mode: Some(value.storage_strict_mode),
            data_dir: Some(value.data_dir),
            proxy: value.proxy,
            max_error_count: Some(value.max_error_count),
            health_check_interval_ms: Some(value.health_check_interval_ms),
            save_debounce_ms: Some(value.save_debounce_ms),
            request_max_retries: Some(value.request_max_retries),
            request_base_delay_ms: Some(value.request_base_delay_ms),
            credential_switch_max_retries: Some(value.credential_switch_max_retries),
            cron_near_minutes: Some(value.cron_near_minutes),
            cron_refresh_token: Some(value.cron_refresh_token),
            token_near_expiry_seconds: Some(value.token_near_expiry_seconds),
            selection_cooldown_seconds: Some(value.selection_cooldown_seconds),
            max_body_bytes: Some(value.max_body_bytes),
            provider_fallback_chain: Some(value.provider_fallback_chain),
            dialect_providers: Some(value.dialect_providers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_layer() {
        let mut base = ProxyConfigPatch {
            host: Some("0.0.0.0".into()),
            port: Some(1234),
            ..Default::default()
        };
        base.overlay(ProxyConfigPatch {
            port: Some(9999),
            api_key: Some("k".into()),
            ..Default::default()
        });
        let config = base.into_config().unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9999);
        assert_eq!(config.selection_cooldown_seconds, 60);
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn api_key_is_required() {
        let err = ProxyConfigPatch::default().into_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField("api_key")));
    }
}

use serde::{Deserialize, Serialize};

/// Wire dialect spoken on one side of the proxy.
///
/// Clients speak the first four; upstream providers additionally speak
/// `Kiro`, a binary-framed stream whose JSON payloads are Claude-shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    OpenAiChat,
    OpenAiResponses,
    Claude,
    Gemini,
    Kiro,
}

impl Dialect {
    /// Dialect used for request/response *bodies*. Kiro carries Claude
    /// payloads inside its binary framing.
    pub fn body_dialect(&self) -> Dialect {
        match self {
            Dialect::Kiro => Dialect::Claude,
            other => *other,
        }
    }
}

/// Closed set of concrete upstream integrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    #[serde(rename = "claude-kiro-oauth")]
    ClaudeKiroOauth,
    #[serde(rename = "claude-custom")]
    ClaudeCustom,
    #[serde(rename = "gemini-cli-oauth")]
    GeminiCliOauth,
    #[serde(rename = "gemini-antigravity")]
    GeminiAntigravity,
    #[serde(rename = "openai-custom")]
    OpenAiCustom,
    #[serde(rename = "openai-codex")]
    OpenAiCodex,
    #[serde(rename = "openai-qwen-oauth")]
    OpenAiQwenOauth,
    #[serde(rename = "openai-iflow")]
    OpenAiIflow,
}

impl ProviderType {
    pub const ALL: [ProviderType; 8] = [
        ProviderType::ClaudeKiroOauth,
        ProviderType::ClaudeCustom,
        ProviderType::GeminiCliOauth,
        ProviderType::GeminiAntigravity,
        ProviderType::OpenAiCustom,
        ProviderType::OpenAiCodex,
        ProviderType::OpenAiQwenOauth,
        ProviderType::OpenAiIflow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::ClaudeKiroOauth => "claude-kiro-oauth",
            ProviderType::ClaudeCustom => "claude-custom",
            ProviderType::GeminiCliOauth => "gemini-cli-oauth",
            ProviderType::GeminiAntigravity => "gemini-antigravity",
            ProviderType::OpenAiCustom => "openai-custom",
            ProviderType::OpenAiCodex => "openai-codex",
            ProviderType::OpenAiQwenOauth => "openai-qwen-oauth",
            ProviderType::OpenAiIflow => "openai-iflow",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == value)
    }

    /// Substring before the first `-`. Fallback chains may only cross
    /// provider types sharing this prefix.
    pub fn protocol_prefix(&self) -> &'static str {
        let tag = self.as_str();
        match tag.find('-') {
            Some(idx) => &tag[..idx],
            None => tag,
        }
    }

    /// The provider's native wire dialect.
    pub fn dialect(&self) -> Dialect {
        match self {
            ProviderType::ClaudeKiroOauth => Dialect::Kiro,
            ProviderType::ClaudeCustom => Dialect::Claude,
            ProviderType::GeminiCliOauth | ProviderType::GeminiAntigravity => Dialect::Gemini,
            ProviderType::OpenAiCodex => Dialect::OpenAiResponses,
            ProviderType::OpenAiCustom | ProviderType::OpenAiQwenOauth | ProviderType::OpenAiIflow => {
                Dialect::OpenAiChat
            }
        }
    }

    /// File-backup subdirectory for this provider family.
    pub fn family_dir(&self) -> &'static str {
        self.protocol_prefix()
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use switchboard_common::{ProviderType, Token};

use crate::kiro;

/// Antigravity base-URL channels, tried in order within one request when
/// the upstream rejects auth.
pub const ANTIGRAVITY_VARIANTS: [&str; 2] = [
    "https://daily-cloudcode-pa.sandbox.googleapis.com",
    "https://autopush-cloudcode-pa.sandbox.googleapis.com",
];

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Build the upstream URL and auth headers for one attempt.
///
/// `base_url_index` only matters for the Antigravity family; other
/// providers have a single base. Custom providers honor a `baseUrl` field
/// on their token.
pub fn build(
    provider_type: ProviderType,
    token: &Token,
    model: &str,
    stream: bool,
    base_url_index: usize,
) -> Endpoint {
    match provider_type {
        ProviderType::ClaudeKiroOauth => Endpoint {
            url: kiro::endpoint_url(token),
            headers: kiro::request_headers(token),
        },
        ProviderType::ClaudeCustom => {
            let base = token
                .extra_str("baseUrl")
                .unwrap_or("https://api.anthropic.com");
            Endpoint {
                url: format!("{}/v1/messages", base.trim_end_matches('/')),
                headers: vec![
                    ("x-api-key".to_string(), token.access_token.clone()),
                    ("anthropic-version".to_string(), "2023-06-01".to_string()),
                    ("content-type".to_string(), "application/json".to_string()),
                ],
            }
        }
        ProviderType::GeminiCliOauth => gemini_endpoint(
            "https://generativelanguage.googleapis.com",
            token,
            model,
            stream,
        ),
        ProviderType::GeminiAntigravity => {
            let base = ANTIGRAVITY_VARIANTS
                [base_url_index.min(ANTIGRAVITY_VARIANTS.len() - 1)];
            gemini_endpoint(base, token, model, stream)
        }
        ProviderType::OpenAiCustom => {
            let base = token.extra_str("baseUrl").unwrap_or("https://api.openai.com");
            openai_chat_endpoint(base, token)
        }
        ProviderType::OpenAiQwenOauth => {
            openai_chat_endpoint("https://dashscope.aliyuncs.com/compatible-mode", token)
        }
        ProviderType::OpenAiIflow => openai_chat_endpoint("https://apis.iflow.cn", token),
        ProviderType::OpenAiCodex => Endpoint {
            url: "https://chatgpt.com/backend-api/codex/responses".to_string(),
            headers: vec![
                (
                    "authorization".to_string(),
                    format!("Bearer {}", token.access_token),
                ),
                ("content-type".to_string(), "application/json".to_string()),
                (
                    "openai-beta".to_string(),
                    "responses=experimental".to_string(),
                ),
            ],
        },
    }
}

fn gemini_endpoint(base: &str, token: &Token, model: &str, stream: bool) -> Endpoint {
    let method = if stream {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let mut url = format!(
        "{}/v1beta/models/{}:{}",
        base.trim_end_matches('/'),
        model,
        method
    );
    if stream {
        url.push_str("?alt=sse");
    }
    Endpoint {
        url,
        headers: vec![
            (
                "authorization".to_string(),
                format!("Bearer {}", token.access_token),
            ),
            ("content-type".to_string(), "application/json".to_string()),
        ],
    }
}

fn openai_chat_endpoint(base: &str, token: &Token) -> Endpoint {
    Endpoint {
        url: format!("{}/v1/chat/completions", base.trim_end_matches('/')),
        headers: vec![
            (
                "authorization".to_string(),
                format!("Bearer {}", token.access_token),
            ),
            ("content-type".to_string(), "application/json".to_string()),
        ],
    }
}

use switchboard_protocol::{claude, gemini, openai};

/// Provider-neutral token counts pulled from a terminal chunk or a unary
/// response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: Option<u64>,
    pub reasoning_tokens: Option<u64>,
}

impl UsageCounts {
    pub fn from_claude(usage: &claude::Usage) -> Self {
        Self {
            input_tokens: usage.input_tokens
                + usage.cache_creation_input_tokens.unwrap_or(0)
                + usage.cache_read_input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            reasoning_tokens: None,
        }
    }

    pub fn from_gemini(usage: &gemini::UsageMetadata) -> Self {
        Self {
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            cache_read_tokens: usage.cached_content_token_count,
            reasoning_tokens: usage.thoughts_token_count,
        }
    }

    pub fn from_openai_chat(usage: &openai::ChatUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_read_tokens: usage
                .prompt_tokens_details
                .as_ref()
                .and_then(|details| details.get("cached_tokens"))
                .and_then(|tokens| tokens.as_u64()),
            reasoning_tokens: usage
                .completion_tokens_details
                .as_ref()
                .and_then(|details| details.get("reasoning_tokens"))
                .and_then(|tokens| tokens.as_u64()),
        }
    }

    pub fn from_openai_responses(usage: &openai::ResponsesUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: None,
            reasoning_tokens: usage
                .output_tokens_details
                .as_ref()
                .and_then(|details| details.get("reasoning_tokens"))
                .and_then(|tokens| tokens.as_u64()),
        }
    }
}

/// Split one upstream input-token count into the three Claude accounting
/// buckets at the fixed 1:2:25 ratio billing dashboards aggregate over.
/// Output and reasoning counts pass through unchanged.
pub fn redistribute_claude_usage(counts: UsageCounts) -> claude::Usage {
    let input = counts.input_tokens;
    claude::Usage {
        input_tokens: input / 28,
        output_tokens: counts.output_tokens,
        cache_creation_input_tokens: Some(input * 2 / 28),
        cache_read_input_tokens: Some(input * 25 / 28),
    }
}

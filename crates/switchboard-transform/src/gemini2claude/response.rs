use switchboard_protocol::{claude, gemini};

pub fn convert_response(
    body: &claude::MessagesResponse,
    model: &str,
) -> gemini::GenerateContentResponse {
    let mut parts = Vec::new();
    for block in &body.content {
        match block {
            claude::ContentBlock::Text { text, .. } => parts.push(gemini::Part {
                text: Some(text.clone()),
                ..Default::default()
            }),
            claude::ContentBlock::Thinking { thinking, .. } => parts.push(gemini::Part {
                text: Some(thinking.clone()),
                thought: Some(true),
                ..Default::default()
            }),
            claude::ContentBlock::ToolUse { id, name, input } => parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    name: name.clone(),
                    args: input.clone(),
                    id: Some(id.clone()),
                }),
                ..Default::default()
            }),
            _ => {}
        }
    }

    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: Some(finish_reason(body.stop_reason).to_string()),
            index: Some(0),
            safety_ratings: None,
        }],
        usage_metadata: Some(usage_metadata(&body.usage)),
        model_version: Some(model.to_string()),
        response_id: Some(body.id.clone()),
        prompt_feedback: None,
    }
}

pub fn finish_reason(stop: Option<claude::StopReason>) -> &'static str {
    match stop {
        Some(claude::StopReason::MaxTokens) => "MAX_TOKENS",
        Some(claude::StopReason::Refusal) => "SAFETY",
        // Gemini has no tool-use finish reason; STOP covers it.
        _ => "STOP",
    }
}

pub fn usage_metadata(usage: &claude::Usage) -> gemini::UsageMetadata {
    let prompt = usage.input_tokens
        + usage.cache_creation_input_tokens.unwrap_or(0)
        + usage.cache_read_input_tokens.unwrap_or(0);
    gemini::UsageMetadata {
        prompt_token_count: prompt,
        candidates_token_count: usage.output_tokens,
        total_token_count: prompt + usage.output_tokens,
        cached_content_token_count: usage.cache_read_input_tokens,
        thoughts_token_count: None,
    }
}

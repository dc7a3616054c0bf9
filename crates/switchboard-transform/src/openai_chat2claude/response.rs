use switchboard_protocol::{claude, openai};

pub fn convert_response(body: &claude::MessagesResponse, model: &str) -> openai::ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &body.content {
        match block {
            claude::ContentBlock::Text { text: t, .. } => text.push_str(t),
            claude::ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(openai::ToolCall {
                    id: id.clone(),
                    r#type: "function".to_string(),
                    function: openai::FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    openai::ChatResponse {
        id: format!("chatcmpl-{}", body.id),
        object: "chat.completion".to_string(),
        created: 0,
        model: model.to_string(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ChatMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then(|| serde_json::Value::String(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name: None,
            },
            finish_reason: Some(finish_reason(body.stop_reason).to_string()),
        }],
        usage: Some(chat_usage(&body.usage)),
    }
}

pub fn finish_reason(stop: Option<claude::StopReason>) -> &'static str {
    match stop {
        Some(claude::StopReason::MaxTokens) => "length",
        Some(claude::StopReason::ToolUse) => "tool_calls",
        Some(claude::StopReason::Refusal) => "content_filter",
        _ => "stop",
    }
}

pub fn chat_usage(usage: &claude::Usage) -> openai::ChatUsage {
    let prompt = usage.input_tokens
        + usage.cache_creation_input_tokens.unwrap_or(0)
        + usage.cache_read_input_tokens.unwrap_or(0);
    openai::ChatUsage {
        prompt_tokens: prompt,
        completion_tokens: usage.output_tokens,
        total_tokens: prompt + usage.output_tokens,
        prompt_tokens_details: usage
            .cache_read_input_tokens
            .map(|cached| serde_json::json!({"cached_tokens": cached})),
        completion_tokens_details: None,
    }
}

use serde_json::Value;
use switchboard_protocol::{claude, openai};

use crate::usage::{UsageCounts, redistribute_claude_usage};

pub fn convert_response(body: &openai::ChatResponse, model: &str) -> claude::MessagesResponse {
    let choice = body.choices.first();
    let mut content = Vec::new();

    if let Some(choice) = choice {
        let text = choice.message.content_text();
        if !text.is_empty() {
            content.push(claude::ContentBlock::Text {
                text,
                cache_control: None,
            });
        }
        for call in choice.message.tool_calls.iter().flatten() {
            content.push(claude::ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::Object(Default::default())),
            });
        }
    }

    let usage = body
        .usage
        .as_ref()
        .map(|usage| redistribute_claude_usage(UsageCounts::from_openai_chat(usage)))
        .unwrap_or_default();

    claude::MessagesResponse {
        id: body.id.clone(),
        r#type: "message".to_string(),
        role: claude::Role::Assistant,
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason(
            choice.and_then(|c| c.finish_reason.as_deref()),
        )),
        stop_sequence: None,
        usage,
    }
}

pub fn stop_reason(finish: Option<&str>) -> claude::StopReason {
    match finish {
        Some("length") => claude::StopReason::MaxTokens,
        Some("tool_calls") => claude::StopReason::ToolUse,
        Some("content_filter") => claude::StopReason::Refusal,
        _ => claude::StopReason::EndTurn,
    }
}

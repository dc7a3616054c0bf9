use switchboard_protocol::{claude, gemini};

use crate::schema::correct_function_args;
use crate::toolnames::ToolNameMap;
use crate::usage::{UsageCounts, redistribute_claude_usage};

pub fn convert_response(
    body: &gemini::GenerateContentResponse,
    model: &str,
    names: &ToolNameMap,
) -> claude::MessagesResponse {
    let mut content = Vec::new();
    let mut saw_tool_call = false;

    if let Some(candidate) = body.candidates.first()
        && let Some(parts) = candidate.content.as_ref().map(|c| &c.parts)
    {
        for part in parts {
            if let Some(text) = &part.text {
                if part.thought == Some(true) {
                    content.push(claude::ContentBlock::Thinking {
                        thinking: text.clone(),
                        signature: None,
                    });
                } else {
                    content.push(claude::ContentBlock::Text {
                        text: text.clone(),
                        cache_control: None,
                    });
                }
            }
            if let Some(call) = &part.function_call {
                saw_tool_call = true;
                let name = names.restore(&call.name);
                let mut input = call.args.clone();
                correct_function_args(&name, &mut input);
                content.push(claude::ContentBlock::ToolUse {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("toolu_{}", content.len())),
                    name,
                    input,
                });
            }
        }
    }

    let usage = body
        .usage_metadata
        .as_ref()
        .map(|usage| redistribute_claude_usage(UsageCounts::from_gemini(usage)))
        .unwrap_or_default();

    claude::MessagesResponse {
        id: body
            .response_id
            .clone()
            .map(|id| format!("msg_{id}"))
            .unwrap_or_else(|| "msg_gemini".to_string()),
        r#type: "message".to_string(),
        role: claude::Role::Assistant,
        model: model.to_string(),
        content,
        stop_reason: Some(stop_reason(
            body.candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref()),
            saw_tool_call,
        )),
        stop_sequence: None,
        usage,
    }
}

pub fn stop_reason(finish: Option<&str>, saw_tool_call: bool) -> claude::StopReason {
    if saw_tool_call {
        return claude::StopReason::ToolUse;
    }
    match finish {
        Some("MAX_TOKENS") => claude::StopReason::MaxTokens,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") => claude::StopReason::Refusal,
        _ => claude::StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn restores_tool_name_and_corrects_args() {
        let long_name = "t".repeat(80);
        let mut names = ToolNameMap::new();
        let sink_name = names.register(&long_name);

        let body: gemini::GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": sink_name, "args": {"query": "x"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 28, "candidatesTokenCount": 2,
                              "totalTokenCount": 30}
        }))
        .unwrap();

        let out = convert_response(&body, "claude-sonnet-4-5", &names);
        let claude::ContentBlock::ToolUse { name, input, .. } = &out.content[0] else {
            panic!("expected tool_use");
        };
        assert_eq!(name, &long_name);
        // Restored name is not in the canonical tool list, so args stay.
        assert_eq!(input, &json!({"query": "x"}));
        assert_eq!(out.stop_reason, Some(claude::StopReason::ToolUse));
    }

    #[test]
    fn grep_args_corrected() {
        let names = ToolNameMap::new();
        let body: gemini::GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "Grep", "args": {"query": "main", "paths": ["src"]}}}
                ]}
            }]
        }))
        .unwrap();
        let out = convert_response(&body, "m", &names);
        let claude::ContentBlock::ToolUse { input, .. } = &out.content[0] else {
            panic!("expected tool_use");
        };
        assert_eq!(input, &json!({"pattern": "main", "path": "src"}));
    }
}

use switchboard_protocol::{gemini, openai};

use crate::schema::correct_function_args;
use crate::toolnames::ToolNameMap;
use crate::usage::UsageCounts;

pub fn convert_response(
    body: &gemini::GenerateContentResponse,
    model: &str,
    names: &ToolNameMap,
) -> openai::ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    if let Some(candidate) = body.candidates.first()
        && let Some(parts) = candidate.content.as_ref().map(|c| &c.parts)
    {
        for part in parts {
            if let Some(t) = &part.text
                && part.thought != Some(true)
            {
                text.push_str(t);
            }
            if let Some(call) = &part.function_call {
                let name = names.restore(&call.name);
                let mut args = call.args.clone();
                correct_function_args(&name, &mut args);
                tool_calls.push(openai::ToolCall {
                    id: call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", tool_calls.len())),
                    r#type: "function".to_string(),
                    function: openai::FunctionCall {
                        name,
                        arguments: args.to_string(),
                    },
                });
            }
        }
    }

    let finish = if !tool_calls.is_empty() {
        "tool_calls"
    } else {
        finish_reason(
            body.candidates
                .first()
                .and_then(|c| c.finish_reason.as_deref()),
        )
    };

    openai::ChatResponse {
        id: format!(
            "chatcmpl-{}",
            body.response_id.as_deref().unwrap_or("gemini")
        ),
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
            finish_reason: Some(finish.to_string()),
        }],
        usage: body.usage_metadata.as_ref().map(chat_usage),
    }
}

pub fn finish_reason(finish: Option<&str>) -> &'static str {
    match finish {
        Some("MAX_TOKENS") => "length",
        Some("SAFETY") | Some("PROHIBITED_CONTENT") => "content_filter",
        _ => "stop",
    }
}

pub fn chat_usage(usage: &gemini::UsageMetadata) -> openai::ChatUsage {
    let counts = UsageCounts::from_gemini(usage);
    openai::ChatUsage {
        prompt_tokens: counts.input_tokens,
        completion_tokens: counts.output_tokens,
        total_tokens: counts.input_tokens + counts.output_tokens,
        prompt_tokens_details: counts
            .cache_read_tokens
            .map(|cached| serde_json::json!({"cached_tokens": cached})),
        completion_tokens_details: counts
            .reasoning_tokens
            .map(|reasoning| serde_json::json!({"reasoning_tokens": reasoning})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_call_maps_to_tool_calls() {
        let names = ToolNameMap::new();
        let body: gemini::GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "checking"},
                    {"functionCall": {"name": "Read", "args": {"paths": ["a.rs"]}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2,
                              "totalTokenCount": 7, "thoughtsTokenCount": 1}
        }))
        .unwrap();
        let out = convert_response(&body, "gpt-x", &names);
        let choice = &out.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        let args: serde_json::Value = serde_json::from_str(&call.function.arguments).unwrap();
        assert_eq!(args, json!({"path": "a.rs"}));
        assert!(
            out.usage
                .unwrap()
                .completion_tokens_details
                .unwrap()["reasoning_tokens"]
                .as_u64()
                == Some(1)
        );
    }
}

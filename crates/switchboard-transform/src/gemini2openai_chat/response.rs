use serde_json::Value;
use switchboard_protocol::{gemini, openai};

pub fn convert_response(
    body: &openai::ChatResponse,
    model: &str,
) -> gemini::GenerateContentResponse {
    let choice = body.choices.first();
    let mut parts = Vec::new();

    if let Some(choice) = choice {
        let text = choice.message.content_text();
        if !text.is_empty() {
            parts.push(gemini::Part {
                text: Some(text),
                ..Default::default()
            });
        }
        for call in choice.message.tool_calls.iter().flatten() {
            parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    name: call.function.name.clone(),
                    args: serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::Object(Default::default())),
                    id: Some(call.id.clone()),
                }),
                ..Default::default()
            });
        }
    }

    gemini::GenerateContentResponse {
        candidates: vec![gemini::Candidate {
            content: Some(gemini::Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: Some(
                finish_reason(choice.and_then(|c| c.finish_reason.as_deref())).to_string(),
            ),
            index: Some(0),
            safety_ratings: None,
        }],
        usage_metadata: body.usage.as_ref().map(usage_metadata),
        model_version: Some(model.to_string()),
        response_id: Some(body.id.clone()),
        prompt_feedback: None,
    }
}

pub fn finish_reason(finish: Option<&str>) -> &'static str {
    match finish {
        Some("length") => "MAX_TOKENS",
        Some("content_filter") => "SAFETY",
        _ => "STOP",
    }
}

pub fn usage_metadata(usage: &openai::ChatUsage) -> gemini::UsageMetadata {
    gemini::UsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
        cached_content_token_count: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|details| details.get("cached_tokens"))
            .and_then(Value::as_u64),
        thoughts_token_count: usage
            .completion_tokens_details
            .as_ref()
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(Value::as_u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_response_becomes_candidate() {
        let body: openai::ChatResponse = serde_json::from_str(
            r#"{
                "id": "c1", "object": "chat.completion", "created": 1, "model": "gpt-x",
                "choices": [{"index": 0,
                             "message": {"role": "assistant", "content": "out"},
                             "finish_reason": "length"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
            }"#,
        )
        .unwrap();
        let out = convert_response(&body, "gemini-2.5-flash");
        assert_eq!(
            out.candidates[0].finish_reason.as_deref(),
            Some("MAX_TOKENS")
        );
        assert_eq!(out.usage_metadata.unwrap().total_token_count, 3);
    }
}

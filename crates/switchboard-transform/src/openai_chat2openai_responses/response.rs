use serde_json::Value;
use switchboard_protocol::openai;

pub fn convert_response(body: &openai::ResponsesResponse, model: &str) -> openai::ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for item in &body.output {
        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                if let Some(Value::Array(parts)) = item.get("content") {
                    for part in parts {
                        if let Some(t) = part.get("text").and_then(Value::as_str) {
                            text.push_str(t);
                        }
                    }
                }
            }
            Some("function_call") => tool_calls.push(openai::ToolCall {
                id: item
                    .get("call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                r#type: "function".to_string(),
                function: openai::FunctionCall {
                    name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: item
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}")
                        .to_string(),
                },
            }),
            _ => {}
        }
    }

    let finish = if !tool_calls.is_empty() {
        "tool_calls"
    } else if body.status == "incomplete" {
        "length"
    } else {
        "stop"
    };

    openai::ChatResponse {
        id: format!("chatcmpl-{}", body.id),
        object: "chat.completion".to_string(),
        created: body.created_at,
        model: model.to_string(),
        choices: vec![openai::ChatChoice {
            index: 0,
            message: openai::ChatMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then(|| Value::String(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name: None,
            },
            finish_reason: Some(finish.to_string()),
        }],
        usage: body.usage.as_ref().map(chat_usage),
    }
}

pub fn chat_usage(usage: &openai::ResponsesUsage) -> openai::ChatUsage {
    openai::ChatUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
        prompt_tokens_details: None,
        completion_tokens_details: usage.output_tokens_details.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn output_items_collapse_to_choice() {
        let body: openai::ResponsesResponse = serde_json::from_value(json!({
            "id": "r1", "object": "response", "created_at": 4, "model": "gpt-5-codex",
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant",
                 "content": [{"type": "output_text", "text": "answer"}]}
            ],
            "usage": {"input_tokens": 3, "output_tokens": 1, "total_tokens": 4}
        }))
        .unwrap();
        let out = convert_response(&body, "gpt-x");
        assert_eq!(out.choices[0].message.content_text(), "answer");
        assert_eq!(out.choices[0].finish_reason.as_deref(), Some("stop"));
    }
}

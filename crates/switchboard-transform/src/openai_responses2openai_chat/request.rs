use std::collections::BTreeMap;

use serde_json::Value;
use switchboard_protocol::openai;

pub fn convert_request(body: &openai::ResponsesRequest, target_model: &str) -> openai::ChatRequest {
    let mut messages = Vec::new();

    if let Some(instructions) = &body.instructions
        && !instructions.is_empty()
    {
        messages.push(openai::ChatMessage::text("system", instructions.clone()));
    }

    match &body.input {
        Some(Value::String(text)) => {
            messages.push(openai::ChatMessage::text("user", text.clone()));
        }
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(msg) = input_item_to_message(item) {
                    messages.push(msg);
                }
            }
        }
        _ => {}
    }

    let tools = body.tools.as_ref().map(|tools| {
        tools
            .iter()
            .filter_map(|tool| {
                // Responses declares functions flat; chat nests them.
                let name = tool.get("name")?.as_str()?.to_string();
                Some(openai::ToolDef {
                    r#type: "function".to_string(),
                    function: openai::FunctionDef {
                        name,
                        description: tool
                            .get("description")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        parameters: tool.get("parameters").cloned(),
                    },
                })
            })
            .collect::<Vec<_>>()
    });

    openai::ChatRequest {
        model: target_model.to_string(),
        messages,
        stream: body.stream,
        max_tokens: body.max_output_tokens,
        max_completion_tokens: None,
        temperature: body.temperature,
        top_p: None,
        stop: None,
        tools,
        tool_choice: None,
        extra: BTreeMap::new(),
    }
}

fn input_item_to_message(item: &Value) -> Option<openai::ChatMessage> {
    match item.get("type").and_then(Value::as_str) {
        None | Some("message") => {
            let role = item.get("role")?.as_str()?.to_string();
            let content = match item.get("content") {
                Some(Value::String(text)) => Value::String(text.clone()),
                Some(Value::Array(parts)) => Value::String(
                    parts
                        .iter()
                        .filter_map(|part| part.get("text").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join(""),
                ),
                _ => Value::String(String::new()),
            };
            Some(openai::ChatMessage {
                role,
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            })
        }
        Some("function_call") => Some(openai::ChatMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: Some(vec![openai::ToolCall {
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
            }]),
            tool_call_id: None,
            name: None,
        }),
        Some("function_call_output") => Some(openai::ChatMessage {
            role: "tool".to_string(),
            content: item.get("output").cloned(),
            tool_calls: None,
            tool_call_id: item
                .get("call_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            name: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_input_and_instructions() {
        let body: openai::ResponsesRequest = serde_json::from_str(
            r#"{"model": "gpt-x", "instructions": "be terse", "input": "hello"}"#,
        )
        .unwrap();
        let out = convert_request(&body, "gpt-x");
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[1].content_text(), "hello");
    }

    #[test]
    fn function_call_items_map_to_tool_turns() {
        let body: openai::ResponsesRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-x",
            "input": [
                {"type": "message", "role": "user", "content": "run"},
                {"type": "function_call", "call_id": "f1", "name": "LS",
                 "arguments": "{\"path\":\".\"}"},
                {"type": "function_call_output", "call_id": "f1", "output": "src"}
            ]
        }))
        .unwrap();
        let out = convert_request(&body, "gpt-x");
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1].tool_calls.as_ref().unwrap()[0].id, "f1");
        assert_eq!(out.messages[2].tool_call_id.as_deref(), Some("f1"));
    }
}

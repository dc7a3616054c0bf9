use std::collections::BTreeMap;

use serde_json::Value;
use switchboard_protocol::{claude, openai};

pub fn convert_request(body: &claude::MessagesRequest, target_model: &str) -> openai::ChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = &body.system {
        messages.push(openai::ChatMessage::text("system", system.as_text()));
    }

    for msg in &body.messages {
        match &msg.content {
            claude::MessageContent::Text(text) => {
                messages.push(openai::ChatMessage::text(role_str(msg.role), text.clone()));
            }
            claude::MessageContent::Blocks(blocks) => {
                push_block_turn(&mut messages, msg.role, blocks);
            }
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| openai::ToolDef {
                r#type: "function".to_string(),
                function: openai::FunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect()
    });

    openai::ChatRequest {
        model: target_model.to_string(),
        messages,
        stream: body.stream,
        max_tokens: Some(body.max_tokens),
        max_completion_tokens: None,
        temperature: body.temperature,
        top_p: body.top_p,
        stop: body
            .stop_sequences
            .as_ref()
            .map(|stops| Value::Array(stops.iter().cloned().map(Value::String).collect())),
        tools,
        tool_choice: None,
        extra: BTreeMap::new(),
    }
}

fn role_str(role: claude::Role) -> &'static str {
    match role {
        claude::Role::User => "user",
        claude::Role::Assistant => "assistant",
    }
}

fn push_block_turn(
    messages: &mut Vec<openai::ChatMessage>,
    role: claude::Role,
    blocks: &[claude::ContentBlock],
) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
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
            claude::ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                messages.push(openai::ChatMessage {
                    role: "tool".to_string(),
                    content: Some(tool_result_text(content.as_ref())),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                    name: None,
                });
            }
            _ => {}
        }
    }

    if !text.is_empty() || !tool_calls.is_empty() {
        messages.push(openai::ChatMessage {
            role: role_str(role).to_string(),
            content: (!text.is_empty()).then(|| Value::String(text)),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: None,
            name: None,
        });
    }
}

fn tool_result_text(content: Option<&Value>) -> Value {
    match content {
        Some(Value::String(text)) => Value::String(text.clone()),
        Some(Value::Array(parts)) => Value::String(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(""),
        ),
        Some(other) => Value::String(other.to_string()),
        None => Value::String(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_flatten_into_chat_turns() {
        let body: claude::MessagesRequest = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-5", "max_tokens": 32,
                "system": "short answers",
                "messages": [
                    {"role": "user", "content": "go"},
                    {"role": "assistant", "content": [
                        {"type": "tool_use", "id": "t1", "name": "LS", "input": {"path": "."}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "t1", "content": "src"}
                    ]}
                ]
            }"#,
        )
        .unwrap();
        let out = convert_request(&body, "gpt-x");
        assert_eq!(out.messages[0].role, "system");
        assert_eq!(out.messages[2].tool_calls.as_ref().unwrap()[0].id, "t1");
        assert_eq!(out.messages[3].role, "tool");
        assert_eq!(out.messages[3].tool_call_id.as_deref(), Some("t1"));
        assert_eq!(out.max_tokens, Some(32));
    }
}

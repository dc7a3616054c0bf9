use std::collections::BTreeMap;

use serde_json::Value;
use switchboard_protocol::{claude, openai};

const DEFAULT_MAX_TOKENS: u64 = 4096;

pub fn convert_request(body: &openai::ChatRequest, target_model: &str) -> claude::MessagesRequest {
    let mut system_texts = Vec::new();
    let mut messages: Vec<claude::Message> = Vec::new();

    for msg in &body.messages {
        match msg.role.as_str() {
            "system" | "developer" => system_texts.push(msg.content_text()),
            "assistant" => messages.push(assistant_message(msg)),
            "tool" => {
                let block = claude::ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.content.clone(),
                    is_error: None,
                };
                // Tool results ride on a user turn; consecutive results fold
                // into the same turn.
                match messages.last_mut() {
                    Some(claude::Message {
                        role: claude::Role::User,
                        content: claude::MessageContent::Blocks(blocks),
                    }) => blocks.push(block),
                    _ => messages.push(claude::Message {
                        role: claude::Role::User,
                        content: claude::MessageContent::Blocks(vec![block]),
                    }),
                }
            }
            _ => messages.push(claude::Message {
                role: claude::Role::User,
                content: claude::MessageContent::Text(msg.content_text()),
            }),
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| claude::Tool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                extra: BTreeMap::new(),
            })
            .collect()
    });

    claude::MessagesRequest {
        model: target_model.to_string(),
        max_tokens: body
            .max_tokens
            .or(body.max_completion_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: (!system_texts.is_empty())
            .then(|| claude::SystemPrompt::Text(system_texts.join("\n\n"))),
        stream: body.stream,
        temperature: body.temperature,
        top_p: body.top_p,
        stop_sequences: stop_sequences(body.stop.as_ref()),
        tools,
        tool_choice: None,
        metadata: None,
        extra: BTreeMap::new(),
    }
}

fn assistant_message(msg: &openai::ChatMessage) -> claude::Message {
    let mut blocks = Vec::new();
    let text = msg.content_text();
    if !text.is_empty() {
        blocks.push(claude::ContentBlock::Text {
            text,
            cache_control: None,
        });
    }
    for call in msg.tool_calls.iter().flatten() {
        blocks.push(claude::ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input: serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::Object(Default::default())),
        });
    }
    claude::Message {
        role: claude::Role::Assistant,
        content: claude::MessageContent::Blocks(blocks),
    }
}

fn stop_sequences(stop: Option<&Value>) -> Option<Vec<String>> {
    match stop {
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_and_tool_round() {
        let body: openai::ChatRequest = serde_json::from_str(
            r#"{
                "model": "gpt-x",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "tool_calls": [
                        {"id": "c1", "type": "function",
                         "function": {"name": "Grep", "arguments": "{\"pattern\":\"x\"}"}}
                    ]},
                    {"role": "tool", "tool_call_id": "c1", "content": "found"}
                ],
                "tools": [{"type": "function", "function": {"name": "Grep"}}]
            }"#,
        )
        .unwrap();
        let req = convert_request(&body, "claude-sonnet-4-5");

        assert_eq!(req.model, "claude-sonnet-4-5");
        assert!(matches!(
            req.system,
            Some(claude::SystemPrompt::Text(ref text)) if text == "be brief"
        ));
        assert_eq!(req.messages.len(), 3);
        let claude::MessageContent::Blocks(blocks) = &req.messages[2].content else {
            panic!("tool result should be a block turn");
        };
        assert!(matches!(
            blocks[0],
            claude::ContentBlock::ToolResult { ref tool_use_id, .. } if tool_use_id == "c1"
        ));
        assert_eq!(req.tools.unwrap()[0].name, "Grep");
    }
}

use std::collections::BTreeMap;

use switchboard_protocol::{claude, gemini};

const DEFAULT_MAX_TOKENS: u64 = 8192;

pub fn convert_request(
    body: &gemini::GenerateContentRequest,
    target_model: &str,
) -> claude::MessagesRequest {
    let mut messages = Vec::new();

    for content in &body.contents {
        let role = match content.role.as_deref() {
            Some("model") => claude::Role::Assistant,
            _ => claude::Role::User,
        };
        let blocks: Vec<claude::ContentBlock> = content
            .parts
            .iter()
            .filter_map(part_to_block)
            .collect();
        if !blocks.is_empty() {
            messages.push(claude::Message {
                role,
                content: claude::MessageContent::Blocks(blocks),
            });
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        tools
            .iter()
            .flat_map(|tool| tool.function_declarations.iter().flatten())
            .map(|decl| claude::Tool {
                name: decl.name.clone(),
                description: decl.description.clone(),
                input_schema: decl
                    .parameters
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({"type": "object"})),
                extra: BTreeMap::new(),
            })
            .collect::<Vec<_>>()
    });

    let config = body.generation_config.as_ref();
    claude::MessagesRequest {
        model: target_model.to_string(),
        max_tokens: config
            .and_then(|c| c.max_output_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: body.system_instruction.as_ref().map(|system| {
            claude::SystemPrompt::Text(
                system
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }),
        stream: None,
        temperature: config.and_then(|c| c.temperature),
        top_p: config.and_then(|c| c.top_p),
        stop_sequences: config.and_then(|c| c.stop_sequences.clone()),
        tools,
        tool_choice: None,
        metadata: None,
        extra: BTreeMap::new(),
    }
}

fn part_to_block(part: &gemini::Part) -> Option<claude::ContentBlock> {
    if let Some(text) = &part.text {
        return Some(claude::ContentBlock::Text {
            text: text.clone(),
            cache_control: None,
        });
    }
    if let Some(call) = &part.function_call {
        return Some(claude::ContentBlock::ToolUse {
            id: call.id.clone().unwrap_or_else(|| call.name.clone()),
            name: call.name.clone(),
            input: call.args.clone(),
        });
    }
    if let Some(resp) = &part.function_response {
        return Some(claude::ContentBlock::ToolResult {
            tool_use_id: resp.id.clone().unwrap_or_else(|| resp.name.clone()),
            content: Some(
                resp.response
                    .get("result")
                    .cloned()
                    .unwrap_or_else(|| resp.response.clone()),
            ),
            is_error: None,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_role_and_function_history_map() {
        let body: gemini::GenerateContentRequest = serde_json::from_str(
            r#"{
                "systemInstruction": {"parts": [{"text": "sys"}]},
                "contents": [
                    {"role": "user", "parts": [{"text": "q"}]},
                    {"role": "model", "parts": [
                        {"functionCall": {"name": "LS", "args": {"path": "."}, "id": "f1"}}
                    ]},
                    {"role": "user", "parts": [
                        {"functionResponse": {"name": "LS", "response": {"result": "src"}, "id": "f1"}}
                    ]}
                ],
                "generationConfig": {"maxOutputTokens": 99}
            }"#,
        )
        .unwrap();
        let out = convert_request(&body, "claude-sonnet-4-5");
        assert_eq!(out.max_tokens, 99);
        assert_eq!(out.messages.len(), 3);
        assert_eq!(out.messages[1].role, claude::Role::Assistant);
        let claude::MessageContent::Blocks(blocks) = &out.messages[2].content else {
            panic!("blocks expected");
        };
        assert!(matches!(
            &blocks[0],
            claude::ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "f1"
        ));
    }
}

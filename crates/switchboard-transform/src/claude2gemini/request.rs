use std::collections::BTreeMap;

use serde_json::Value;
use switchboard_protocol::{claude, gemini};

use crate::schema::sanitize_gemini_schema;
use crate::toolnames::ToolNameMap;

pub fn convert_request(
    body: &claude::MessagesRequest,
    target_model: &str,
    names: &mut ToolNameMap,
) -> gemini::GenerateContentRequest {
    let _ = target_model; // Gemini carries the model in the URL, not the body.

    let mut contents = Vec::new();
    for msg in &body.messages {
        let role = match msg.role {
            claude::Role::User => "user",
            claude::Role::Assistant => "model",
        };
        let parts = match &msg.content {
            claude::MessageContent::Text(text) => vec![gemini::Part {
                text: Some(text.clone()),
                ..Default::default()
            }],
            claude::MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| block_to_part(block, names))
                .collect(),
        };
        if !parts.is_empty() {
            contents.push(gemini::Content {
                role: Some(role.to_string()),
                parts,
            });
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: names.register(&tool.name),
                        description: tool.description.clone(),
                        parameters: Some(sanitize_gemini_schema(&tool.input_schema)),
                    })
                    .collect(),
            ),
            extra: BTreeMap::new(),
        }]
    });

    gemini::GenerateContentRequest {
        contents,
        system_instruction: body.system.as_ref().map(|system| gemini::Content {
            role: None,
            parts: vec![gemini::Part {
                text: Some(system.as_text()),
                ..Default::default()
            }],
        }),
        tools,
        tool_config: None,
        generation_config: Some(gemini::GenerationConfig {
            temperature: body.temperature,
            top_p: body.top_p,
            max_output_tokens: Some(body.max_tokens),
            stop_sequences: body.stop_sequences.clone(),
            ..Default::default()
        }),
        safety_settings: None,
        extra: BTreeMap::new(),
    }
}

fn block_to_part(block: &claude::ContentBlock, names: &mut ToolNameMap) -> Option<gemini::Part> {
    match block {
        claude::ContentBlock::Text { text, .. } => Some(gemini::Part {
            text: Some(text.clone()),
            ..Default::default()
        }),
        claude::ContentBlock::ToolUse { id, name, input } => Some(gemini::Part {
            function_call: Some(gemini::FunctionCall {
                name: names.register(name),
                args: input.clone(),
                id: Some(id.clone()),
            }),
            ..Default::default()
        }),
        claude::ContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } => Some(gemini::Part {
            function_response: Some(gemini::FunctionResponse {
                name: tool_use_id.clone(),
                response: serde_json::json!({
                    "result": content.clone().unwrap_or(Value::Null)
                }),
                id: Some(tool_use_id.clone()),
            }),
            ..Default::default()
        }),
        claude::ContentBlock::Thinking { .. } | claude::ContentBlock::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_and_tools_map() {
        let body: claude::MessagesRequest = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-5", "max_tokens": 64,
                "system": "concise",
                "messages": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": [{"type": "text", "text": "yo"}]}
                ],
                "tools": [{"name": "Read", "input_schema":
                    {"type": "object", "additionalProperties": false,
                     "properties": {"path": {"type": "string"}}}}]
            }"#,
        )
        .unwrap();
        let mut names = ToolNameMap::new();
        let out = convert_request(&body, "gemini-2.5-pro", &mut names);

        assert_eq!(out.contents[1].role.as_deref(), Some("model"));
        assert_eq!(
            out.system_instruction.unwrap().parts[0].text.as_deref(),
            Some("concise")
        );
        let tools = out.tools.unwrap();
        let decl = &tools[0].function_declarations.as_ref().unwrap()[0];
        assert_eq!(decl.name, "Read");
        assert!(
            decl.parameters
                .as_ref()
                .unwrap()
                .get("additionalProperties")
                .is_none()
        );
        assert_eq!(
            out.generation_config.unwrap().max_output_tokens,
            Some(64)
        );
    }
}

use std::collections::BTreeMap;

use serde_json::Value;
use switchboard_protocol::{gemini, openai};

use crate::schema::sanitize_gemini_schema;
use crate::toolnames::ToolNameMap;

pub fn convert_request(
    body: &openai::ChatRequest,
    target_model: &str,
    names: &mut ToolNameMap,
) -> gemini::GenerateContentRequest {
    let _ = target_model;

    let mut system_texts = Vec::new();
    let mut contents: Vec<gemini::Content> = Vec::new();

    for msg in &body.messages {
        match msg.role.as_str() {
            "system" | "developer" => system_texts.push(msg.content_text()),
            "assistant" => {
                let mut parts = Vec::new();
                let text = msg.content_text();
                if !text.is_empty() {
                    parts.push(gemini::Part {
                        text: Some(text),
                        ..Default::default()
                    });
                }
                for call in msg.tool_calls.iter().flatten() {
                    parts.push(gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            name: names.register(&call.function.name),
                            args: serde_json::from_str(&call.function.arguments)
                                .unwrap_or(Value::Object(Default::default())),
                            id: Some(call.id.clone()),
                        }),
                        ..Default::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(gemini::Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
            }
            "tool" => {
                let part = gemini::Part {
                    function_response: Some(gemini::FunctionResponse {
                        name: msg.tool_call_id.clone().unwrap_or_default(),
                        response: serde_json::json!({"result": msg.content_text()}),
                        id: msg.tool_call_id.clone(),
                    }),
                    ..Default::default()
                };
                match contents.last_mut() {
                    Some(content) if content.role.as_deref() == Some("user") => {
                        content.parts.push(part)
                    }
                    _ => contents.push(gemini::Content {
                        role: Some("user".to_string()),
                        parts: vec![part],
                    }),
                }
            }
            _ => contents.push(gemini::Content::text("user", msg.content_text())),
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        vec![gemini::Tool {
            function_declarations: Some(
                tools
                    .iter()
                    .map(|tool| gemini::FunctionDeclaration {
                        name: names.register(&tool.function.name),
                        description: tool.function.description.clone(),
                        parameters: tool
                            .function
                            .parameters
                            .as_ref()
                            .map(sanitize_gemini_schema),
                    })
                    .collect(),
            ),
            extra: BTreeMap::new(),
        }]
    });

    gemini::GenerateContentRequest {
        contents,
        system_instruction: (!system_texts.is_empty()).then(|| gemini::Content {
            role: None,
            parts: vec![gemini::Part {
                text: Some(system_texts.join("\n\n")),
                ..Default::default()
            }],
        }),
        tools,
        tool_config: None,
        generation_config: Some(gemini::GenerationConfig {
            temperature: body.temperature,
            top_p: body.top_p,
            max_output_tokens: body.max_tokens.or(body.max_completion_tokens),
            stop_sequences: match &body.stop {
                Some(Value::String(stop)) => Some(vec![stop.clone()]),
                Some(Value::Array(stops)) => Some(
                    stops
                        .iter()
                        .filter_map(|stop| stop.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => None,
            },
            ..Default::default()
        }),
        safety_settings: None,
        extra: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_tool_names_shortened_in_declarations() {
        let long_name = format!("mcp__{}__lookup", "s".repeat(90));
        let body: openai::ChatRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-x",
            "messages": [{"role": "user", "content": "q"}],
            "tools": [{"type": "function",
                       "function": {"name": long_name, "parameters": {"type": "object"}}}]
        }))
        .unwrap();
        let mut names = ToolNameMap::new();
        let out = convert_request(&body, "gemini-2.5-pro", &mut names);
        let tools = out.tools.unwrap();
        let decl = &tools[0].function_declarations.as_ref().unwrap()[0];
        assert_eq!(decl.name, "mcp__lookup");
        assert_eq!(names.restore("mcp__lookup"), long_name);
    }
}

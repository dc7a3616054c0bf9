use std::collections::BTreeMap;

use serde_json::Value;
use switchboard_protocol::{gemini, openai};

pub fn convert_request(
    body: &gemini::GenerateContentRequest,
    target_model: &str,
) -> openai::ChatRequest {
    let mut messages = Vec::new();

    if let Some(system) = &body.system_instruction {
        let text: String = system
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            messages.push(openai::ChatMessage::text("system", text));
        }
    }

    for content in &body.contents {
        let is_model = content.role.as_deref() == Some("model");
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in &content.parts {
            if let Some(t) = &part.text {
                text.push_str(t);
            }
            if let Some(call) = &part.function_call {
                tool_calls.push(openai::ToolCall {
                    id: call.id.clone().unwrap_or_else(|| call.name.clone()),
                    r#type: "function".to_string(),
                    function: openai::FunctionCall {
                        name: call.name.clone(),
                        arguments: call.args.to_string(),
                    },
                });
            }
            if let Some(resp) = &part.function_response {
                messages.push(openai::ChatMessage {
                    role: "tool".to_string(),
                    content: Some(
                        resp.response
                            .get("result")
                            .cloned()
                            .unwrap_or_else(|| resp.response.clone()),
                    ),
                    tool_calls: None,
                    tool_call_id: Some(resp.id.clone().unwrap_or_else(|| resp.name.clone())),
                    name: None,
                });
            }
        }

        if !text.is_empty() || !tool_calls.is_empty() {
            messages.push(openai::ChatMessage {
                role: if is_model { "assistant" } else { "user" }.to_string(),
                content: (!text.is_empty()).then(|| Value::String(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name: None,
            });
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        tools
            .iter()
            .flat_map(|tool| tool.function_declarations.iter().flatten())
            .map(|decl| openai::ToolDef {
                r#type: "function".to_string(),
                function: openai::FunctionDef {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    parameters: decl.parameters.clone(),
                },
            })
            .collect::<Vec<_>>()
    });

    let config = body.generation_config.as_ref();
    openai::ChatRequest {
        model: target_model.to_string(),
        messages,
        stream: None,
        max_tokens: config.and_then(|c| c.max_output_tokens),
        max_completion_tokens: None,
        temperature: config.and_then(|c| c.temperature),
        top_p: config.and_then(|c| c.top_p),
        stop: config.and_then(|c| {
            c.stop_sequences.as_ref().map(|stops| {
                Value::Array(stops.iter().cloned().map(Value::String).collect())
            })
        }),
        tools,
        tool_choice: None,
        extra: BTreeMap::new(),
    }
}

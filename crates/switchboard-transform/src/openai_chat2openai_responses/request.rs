use std::collections::BTreeMap;

use serde_json::{Value, json};
use switchboard_protocol::openai;

pub fn convert_request(
    body: &openai::ChatRequest,
    target_model: &str,
) -> openai::ResponsesRequest {
    let mut instructions = Vec::new();
    let mut input = Vec::new();

    for msg in &body.messages {
        match msg.role.as_str() {
            "system" | "developer" => instructions.push(msg.content_text()),
            "assistant" => {
                let text = msg.content_text();
                if !text.is_empty() {
                    input.push(json!({
                        "type": "message", "role": "assistant",
                        "content": [{"type": "output_text", "text": text}],
                    }));
                }
                for call in msg.tool_calls.iter().flatten() {
                    input.push(json!({
                        "type": "function_call",
                        "call_id": call.id,
                        "name": call.function.name,
                        "arguments": call.function.arguments,
                    }));
                }
            }
            "tool" => input.push(json!({
                "type": "function_call_output",
                "call_id": msg.tool_call_id,
                "output": msg.content_text(),
            })),
            role => input.push(json!({
                "type": "message", "role": role,
                "content": [{"type": "input_text", "text": msg.content_text()}],
            })),
        }
    }

    let tools = body.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "name": tool.function.name,
                    "description": tool.function.description,
                    "parameters": tool.function.parameters,
                })
            })
            .collect::<Vec<_>>()
    });

    openai::ResponsesRequest {
        model: target_model.to_string(),
        input: Some(Value::Array(input)),
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n\n")),
        stream: body.stream,
        max_output_tokens: body.max_tokens.or(body.max_completion_tokens),
        temperature: body.temperature,
        tools,
        extra: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_split_between_instructions_and_input() {
        let body: openai::ChatRequest = serde_json::from_value(json!({
            "model": "gpt-x",
            "messages": [
                {"role": "system", "content": "rule"},
                {"role": "user", "content": "question"}
            ],
            "max_tokens": 7
        }))
        .unwrap();
        let out = convert_request(&body, "gpt-5-codex");
        assert_eq!(out.instructions.as_deref(), Some("rule"));
        let Value::Array(input) = out.input.unwrap() else {
            panic!("array input");
        };
        assert_eq!(input[0]["role"], "user");
        assert_eq!(out.max_output_tokens, Some(7));
    }
}

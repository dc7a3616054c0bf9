use serde_json::{Value, json};
use switchboard_protocol::openai;

pub fn convert_response(body: &openai::ChatResponse, model: &str) -> openai::ResponsesResponse {
    let choice = body.choices.first();
    let mut output = Vec::new();

    if let Some(choice) = choice {
        let text = choice.message.content_text();
        if !text.is_empty() {
            output.push(json!({
                "type": "message",
                "id": format!("msg_{}", body.id),
                "role": "assistant",
                "status": "completed",
                "content": [{"type": "output_text", "text": text, "annotations": []}],
            }));
        }
        for call in choice.message.tool_calls.iter().flatten() {
            output.push(json!({
                "type": "function_call",
                "id": format!("fc_{}", call.id),
                "call_id": call.id,
                "name": call.function.name,
                "arguments": call.function.arguments,
                "status": "completed",
            }));
        }
    }

    openai::ResponsesResponse {
        id: format!("resp_{}", body.id),
        object: "response".to_string(),
        created_at: body.created,
        model: model.to_string(),
        status: "completed".to_string(),
        output,
        usage: body.usage.as_ref().map(responses_usage),
    }
}

pub fn responses_usage(usage: &openai::ChatUsage) -> openai::ResponsesUsage {
    openai::ResponsesUsage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        output_tokens_details: usage
            .completion_tokens_details
            .as_ref()
            .and_then(|details| details.get("reasoning_tokens"))
            .and_then(Value::as_u64)
            .map(|reasoning| json!({"reasoning_tokens": reasoning})),
    }
}

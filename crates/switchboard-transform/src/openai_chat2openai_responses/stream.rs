use serde_json::Value;
use switchboard_protocol::openai;

use super::response::chat_usage;

/// Re-frames a Responses event stream as OpenAI chat chunks.
#[derive(Debug)]
pub struct ResponsesToChatStream {
    model: String,
    response_id: String,
    sent_role: bool,
    usage: Option<openai::ResponsesUsage>,
    saw_tool_call: bool,
}

impl ResponsesToChatStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: "chatcmpl-resp".to_string(),
            sent_role: false,
            usage: None,
            saw_tool_call: false,
        }
    }

    pub fn transform_chunk(
        &mut self,
        event: openai::ResponsesStreamEvent,
    ) -> Vec<openai::ChatChunk> {
        match event.r#type.as_str() {
            "response.created" => {
                if let Some(id) = event
                    .body
                    .get("response")
                    .and_then(|r| r.get("id"))
                    .and_then(Value::as_str)
                {
                    self.response_id = format!("chatcmpl-{id}");
                }
                Vec::new()
            }
            "response.output_text.delta" => {
                let Some(delta) = event.body.get("delta").and_then(Value::as_str) else {
                    return Vec::new();
                };
                let role = self.role_once();
                vec![self.chunk(
                    openai::ChunkDelta {
                        role,
                        content: Some(delta.to_string()),
                        tool_calls: None,
                    },
                    None,
                )]
            }
            "response.output_item.done" => {
                let Some(item) = event.body.get("item") else {
                    return Vec::new();
                };
                if item.get("type").and_then(Value::as_str) != Some("function_call") {
                    return Vec::new();
                }
                self.saw_tool_call = true;
                let role = self.role_once();
                vec![self.chunk(
                    openai::ChunkDelta {
                        role,
                        content: None,
                        tool_calls: Some(vec![openai::ChunkToolCall {
                            index: 0,
                            id: item
                                .get("call_id")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                            r#type: Some("function".to_string()),
                            function: Some(openai::ChunkFunction {
                                name: item
                                    .get("name")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                                arguments: item
                                    .get("arguments")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                            }),
                        }]),
                    },
                    None,
                )]
            }
            "response.completed" => {
                if let Some(usage) = event
                    .body
                    .get("response")
                    .and_then(|r| r.get("usage"))
                    .cloned()
                {
                    self.usage = serde_json::from_value(usage).ok();
                }
                let finish = if self.saw_tool_call {
                    "tool_calls"
                } else {
                    "stop"
                };
                let mut chunk = self.chunk(openai::ChunkDelta::default(), Some(finish));
                chunk.usage = self.usage.as_ref().map(chat_usage);
                vec![chunk]
            }
            _ => Vec::new(),
        }
    }

    fn role_once(&mut self) -> Option<String> {
        if self.sent_role {
            None
        } else {
            self.sent_role = true;
            Some("assistant".to_string())
        }
    }

    fn chunk(&self, delta: openai::ChunkDelta, finish: Option<&str>) -> openai::ChatChunk {
        openai::ChatChunk {
            id: self.response_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: self.model.clone(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish.map(str::to_string),
            }],
            usage: None,
        }
    }
}

use std::collections::BTreeMap;

use switchboard_protocol::{claude, openai};

use super::response::{chat_usage, finish_reason};

/// Re-frames a Claude event stream as OpenAI chat chunks.
#[derive(Debug)]
pub struct ClaudeToChatStream {
    model: String,
    response_id: String,
    sent_role: bool,
    stop_reason: Option<claude::StopReason>,
    usage: claude::Usage,
    /// Claude block index -> OpenAI tool_call index.
    tool_indexes: BTreeMap<u32, u32>,
    finished: bool,
}

impl ClaudeToChatStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: "chatcmpl-stream".to_string(),
            sent_role: false,
            stop_reason: None,
            usage: claude::Usage::default(),
            tool_indexes: BTreeMap::new(),
            finished: false,
        }
    }

    pub fn transform_chunk(&mut self, event: claude::StreamEvent) -> Vec<openai::ChatChunk> {
        if self.finished {
            return Vec::new();
        }
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.response_id = format!("chatcmpl-{}", message.id);
                self.usage = message.usage;
                Vec::new()
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                claude::ContentBlock::Text { text, .. } if !text.is_empty() => {
                    vec![self.text_chunk(text)]
                }
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    let call_index = self.tool_indexes.len() as u32;
                    self.tool_indexes.insert(index, call_index);
                    let role = self.role_once();
                    vec![self.chunk(openai::ChunkDelta {
                        role,
                        content: None,
                        tool_calls: Some(vec![openai::ChunkToolCall {
                            index: call_index,
                            id: Some(id),
                            r#type: Some("function".to_string()),
                            function: Some(openai::ChunkFunction {
                                name: Some(name),
                                arguments: None,
                            }),
                        }]),
                    })]
                }
                _ => Vec::new(),
            },
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::BlockDelta::TextDelta { text } => vec![self.text_chunk(text)],
                claude::BlockDelta::InputJsonDelta { partial_json } => {
                    let Some(call_index) = self.tool_indexes.get(&index).copied() else {
                        return Vec::new();
                    };
                    vec![self.chunk(openai::ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![openai::ChunkToolCall {
                            index: call_index,
                            id: None,
                            r#type: None,
                            function: Some(openai::ChunkFunction {
                                name: None,
                                arguments: Some(partial_json),
                            }),
                        }]),
                    })]
                }
                _ => Vec::new(),
            },
            claude::StreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                }
                Vec::new()
            }
            claude::StreamEvent::MessageStop => {
                self.finished = true;
                let mut chunk = self.chunk(openai::ChunkDelta::default());
                chunk.choices[0].finish_reason =
                    Some(finish_reason(self.stop_reason).to_string());
                chunk.usage = Some(chat_usage(&self.usage));
                vec![chunk]
            }
            claude::StreamEvent::ContentBlockStop { .. }
            | claude::StreamEvent::Ping
            | claude::StreamEvent::Error { .. } => Vec::new(),
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

    fn text_chunk(&mut self, text: String) -> openai::ChatChunk {
        let role = self.role_once();
        self.chunk(openai::ChunkDelta {
            role,
            content: Some(text),
            tool_calls: None,
        })
    }

    fn chunk(&self, delta: openai::ChunkDelta) -> openai::ChatChunk {
        openai::ChatChunk {
            id: self.response_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: self.model.clone(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_delta(index: u32, text: &str) -> claude::StreamEvent {
        claude::StreamEvent::ContentBlockDelta {
            index,
            delta: claude::BlockDelta::TextDelta {
                text: text.to_string(),
            },
        }
    }

    #[test]
    fn text_deltas_preserve_bytes_in_order() {
        let mut state = ClaudeToChatStream::new("gpt-x");
        let mut collected = String::new();
        for text in ["Hel", "lo, ", "wor", "ld"] {
            for chunk in state.transform_chunk(text_delta(0, text)) {
                collected.push_str(chunk.choices[0].delta.content.as_deref().unwrap_or(""));
            }
        }
        assert_eq!(collected, "Hello, world");
    }

    #[test]
    fn stop_emits_finish_and_usage() {
        let mut state = ClaudeToChatStream::new("gpt-x");
        state.transform_chunk(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some(claude::StopReason::EndTurn),
                stop_sequence: None,
            },
            usage: Some(claude::Usage {
                input_tokens: 7,
                output_tokens: 3,
                ..Default::default()
            }),
        });
        let chunks = state.transform_chunk(claude::StreamEvent::MessageStop);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(chunks[0].usage.as_ref().unwrap().completion_tokens, 3);
        assert!(state.transform_chunk(claude::StreamEvent::Ping).is_empty());
    }
}

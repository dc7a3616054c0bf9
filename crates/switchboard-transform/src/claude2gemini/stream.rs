use switchboard_protocol::{claude, gemini};

use super::response::stop_reason;
use crate::schema::correct_function_args;
use crate::toolnames::ToolNameMap;
use crate::usage::{UsageCounts, redistribute_claude_usage};

/// Re-frames a Gemini chunk stream as Claude SSE events.
#[derive(Debug)]
pub struct GeminiToClaudeStream {
    model: String,
    names: ToolNameMap,
    started: bool,
    text_open: bool,
    block_index: u32,
    finish: Option<String>,
    saw_tool_call: bool,
    usage: Option<gemini::UsageMetadata>,
}

impl GeminiToClaudeStream {
    pub fn new(model: &str, names: ToolNameMap) -> Self {
        Self {
            model: model.to_string(),
            names,
            started: false,
            text_open: false,
            block_index: 0,
            finish: None,
            saw_tool_call: false,
            usage: None,
        }
    }

    pub fn transform_chunk(
        &mut self,
        chunk: gemini::GenerateContentResponse,
    ) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(claude::StreamEvent::MessageStart {
                message: claude::MessagesResponse {
                    id: chunk
                        .response_id
                        .clone()
                        .map(|id| format!("msg_{id}"))
                        .unwrap_or_else(|| "msg_gemini".to_string()),
                    r#type: "message".to_string(),
                    role: claude::Role::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: claude::Usage::default(),
                },
            });
        }

        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage);
        }

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return events;
        };
        if let Some(finish) = candidate.finish_reason {
            self.finish = Some(finish);
        }

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                if part.thought == Some(true) {
                    continue;
                }
                if !self.text_open {
                    events.push(claude::StreamEvent::ContentBlockStart {
                        index: self.block_index,
                        content_block: claude::ContentBlock::Text {
                            text: String::new(),
                            cache_control: None,
                        },
                    });
                    self.text_open = true;
                }
                events.push(claude::StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: claude::BlockDelta::TextDelta { text },
                });
            }
            if let Some(call) = part.function_call {
                self.close_text(&mut events);
                self.saw_tool_call = true;

                let name = self.names.restore(&call.name);
                let mut input = call.args;
                correct_function_args(&name, &mut input);

                events.push(claude::StreamEvent::ContentBlockStart {
                    index: self.block_index,
                    content_block: claude::ContentBlock::ToolUse {
                        id: call
                            .id
                            .unwrap_or_else(|| format!("toolu_{}", self.block_index)),
                        name,
                        input: serde_json::Value::Object(Default::default()),
                    },
                });
                events.push(claude::StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: claude::BlockDelta::InputJsonDelta {
                        partial_json: input.to_string(),
                    },
                });
                events.push(claude::StreamEvent::ContentBlockStop {
                    index: self.block_index,
                });
                self.block_index += 1;
            }
        }

        events
    }

    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        if !self.started {
            return events;
        }
        self.close_text(&mut events);

        let usage = self
            .usage
            .as_ref()
            .map(|usage| redistribute_claude_usage(UsageCounts::from_gemini(usage)));
        events.push(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some(stop_reason(self.finish.as_deref(), self.saw_tool_call)),
                stop_sequence: None,
            },
            usage,
        });
        events.push(claude::StreamEvent::MessageStop);
        self.started = false;
        events
    }

    fn close_text(&mut self, events: &mut Vec<claude::StreamEvent>) {
        if self.text_open {
            events.push(claude::StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
            self.text_open = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_chunk(text: &str, finish: Option<&str>) -> gemini::GenerateContentResponse {
        serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": finish,
            }],
        }))
        .unwrap()
    }

    #[test]
    fn stream_text_equals_unary_text() {
        let pieces = ["On", "e t", "wo"];
        let mut state = GeminiToClaudeStream::new("claude-sonnet-4-5", ToolNameMap::new());
        let mut streamed = String::new();
        for (i, piece) in pieces.iter().enumerate() {
            let finish = (i == pieces.len() - 1).then_some("STOP");
            for event in state.transform_chunk(text_chunk(piece, finish)) {
                if let claude::StreamEvent::ContentBlockDelta {
                    delta: claude::BlockDelta::TextDelta { text },
                    ..
                } = event
                {
                    streamed.push_str(&text);
                }
            }
        }
        state.finish();
        assert_eq!(streamed, pieces.concat());
    }

    #[test]
    fn terminal_usage_is_redistributed() {
        let mut state = GeminiToClaudeStream::new("claude-sonnet-4-5", ToolNameMap::new());
        let mut chunk = text_chunk("ok", Some("STOP"));
        chunk.usage_metadata = Some(gemini::UsageMetadata {
            prompt_token_count: 56,
            candidates_token_count: 1,
            total_token_count: 57,
            ..Default::default()
        });
        state.transform_chunk(chunk);
        let events = state.finish();
        let claude::StreamEvent::MessageDelta { usage, .. } = &events[1] else {
            panic!("expected message_delta after content_block_stop");
        };
        let usage = usage.as_ref().unwrap();
        assert_eq!(
            usage.input_tokens
                + usage.cache_creation_input_tokens.unwrap()
                + usage.cache_read_input_tokens.unwrap(),
            56
        );
    }
}

use switchboard_protocol::{claude, gemini};

use super::response::{finish_reason, usage_metadata};

/// Re-frames a Claude event stream as Gemini chunks.
#[derive(Debug)]
pub struct ClaudeToGeminiStream {
    model: String,
    response_id: String,
    stop_reason: Option<claude::StopReason>,
    usage: claude::Usage,
    /// Tool blocks accumulate their input JSON before one part is emitted.
    open_tool: Option<(u32, String, String, String)>,
    finished: bool,
}

impl ClaudeToGeminiStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: "response".to_string(),
            stop_reason: None,
            usage: claude::Usage::default(),
            open_tool: None,
            finished: false,
        }
    }

    pub fn transform_chunk(
        &mut self,
        event: claude::StreamEvent,
    ) -> Vec<gemini::GenerateContentResponse> {
        if self.finished {
            return Vec::new();
        }
        match event {
            claude::StreamEvent::MessageStart { message } => {
                self.response_id = message.id;
                self.usage = message.usage;
                Vec::new()
            }
            claude::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                claude::ContentBlock::Text { text, .. } if !text.is_empty() => {
                    vec![self.text_part(text, false)]
                }
                claude::ContentBlock::ToolUse { id, name, input } => {
                    let seed = match &input {
                        serde_json::Value::Object(map) if map.is_empty() => String::new(),
                        other => other.to_string(),
                    };
                    self.open_tool = Some((index, id, name, seed));
                    Vec::new()
                }
                _ => Vec::new(),
            },
            claude::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                claude::BlockDelta::TextDelta { text } => vec![self.text_part(text, false)],
                claude::BlockDelta::ThinkingDelta { thinking } => {
                    vec![self.text_part(thinking, true)]
                }
                claude::BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some((open_index, _, _, args)) = self.open_tool.as_mut()
                        && *open_index == index
                    {
                        args.push_str(&partial_json);
                    }
                    Vec::new()
                }
                claude::BlockDelta::SignatureDelta { .. } => Vec::new(),
            },
            claude::StreamEvent::ContentBlockStop { index } => {
                let Some((open_index, id, name, args)) = self.open_tool.take() else {
                    return Vec::new();
                };
                if open_index != index {
                    self.open_tool = Some((open_index, id, name, args));
                    return Vec::new();
                }
                let args = serde_json::from_str(&args)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                vec![self.chunk(
                    vec![gemini::Part {
                        function_call: Some(gemini::FunctionCall {
                            name,
                            args,
                            id: Some(id),
                        }),
                        ..Default::default()
                    }],
                    None,
                )]
            }
            claude::StreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                if let Some(usage) = usage {
                    if usage.input_tokens > 0 {
                        self.usage.input_tokens = usage.input_tokens;
                    }
                    self.usage.output_tokens = usage.output_tokens;
                    if usage.cache_read_input_tokens.is_some() {
                        self.usage.cache_read_input_tokens = usage.cache_read_input_tokens;
                    }
                    if usage.cache_creation_input_tokens.is_some() {
                        self.usage.cache_creation_input_tokens = usage.cache_creation_input_tokens;
                    }
                }
                Vec::new()
            }
            claude::StreamEvent::MessageStop => {
                self.finished = true;
                let mut chunk = self.chunk(Vec::new(), Some(finish_reason(self.stop_reason)));
                chunk.usage_metadata = Some(usage_metadata(&self.usage));
                vec![chunk]
            }
            claude::StreamEvent::Ping | claude::StreamEvent::Error { .. } => Vec::new(),
        }
    }

    fn text_part(&self, text: String, thought: bool) -> gemini::GenerateContentResponse {
        self.chunk(
            vec![gemini::Part {
                text: Some(text),
                thought: thought.then_some(true),
                ..Default::default()
            }],
            None,
        )
    }

    fn chunk(
        &self,
        parts: Vec<gemini::Part>,
        finish: Option<&str>,
    ) -> gemini::GenerateContentResponse {
        gemini::GenerateContentResponse {
            candidates: vec![gemini::Candidate {
                content: Some(gemini::Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: finish.map(str::to_string),
                index: Some(0),
                safety_ratings: None,
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
            response_id: Some(self.response_id.clone()),
            prompt_feedback: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_input_accumulates_across_deltas() {
        let mut state = ClaudeToGeminiStream::new("gemini-2.5-pro");
        state.transform_chunk(claude::StreamEvent::ContentBlockStart {
            index: 0,
            content_block: claude::ContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "Glob".to_string(),
                input: serde_json::Value::Object(Default::default()),
            },
        });
        for piece in ["{\"patt", "ern\":\"*.rs\"}"] {
            state.transform_chunk(claude::StreamEvent::ContentBlockDelta {
                index: 0,
                delta: claude::BlockDelta::InputJsonDelta {
                    partial_json: piece.to_string(),
                },
            });
        }
        let chunks = state.transform_chunk(claude::StreamEvent::ContentBlockStop { index: 0 });
        let call = chunks[0].candidates[0].content.as_ref().unwrap().parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.args["pattern"], "*.rs");
    }

    #[test]
    fn message_stop_carries_usage_and_finish() {
        let mut state = ClaudeToGeminiStream::new("gemini-2.5-pro");
        state.transform_chunk(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some(claude::StopReason::EndTurn),
                stop_sequence: None,
            },
            usage: Some(claude::Usage {
                input_tokens: 4,
                output_tokens: 6,
                ..Default::default()
            }),
        });
        let chunks = state.transform_chunk(claude::StreamEvent::MessageStop);
        assert_eq!(
            chunks[0].candidates[0].finish_reason.as_deref(),
            Some("STOP")
        );
        assert_eq!(chunks[0].usage_metadata.as_ref().unwrap().total_token_count, 10);
    }
}

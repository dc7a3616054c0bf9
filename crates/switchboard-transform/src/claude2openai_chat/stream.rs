use switchboard_protocol::{claude, openai};

use super::response::stop_reason;
use crate::usage::{UsageCounts, redistribute_claude_usage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text,
    Tool,
}

/// Re-frames an OpenAI chat chunk stream as Claude SSE events.
///
/// OpenAI streams may deliver usage in a trailing chunk after the
/// `finish_reason`, so the terminal `message_delta`/`message_stop` pair is
/// emitted from [`finish`](Self::finish) once the upstream closes.
#[derive(Debug)]
pub struct ChatToClaudeStream {
    model: String,
    message_id: String,
    started: bool,
    block_index: u32,
    open: OpenBlock,
    finish: Option<String>,
    usage: Option<openai::ChatUsage>,
}

impl ChatToClaudeStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            message_id: "msg_stream".to_string(),
            started: false,
            block_index: 0,
            open: OpenBlock::None,
            finish: None,
            usage: None,
        }
    }

    pub fn transform_chunk(&mut self, chunk: openai::ChatChunk) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            self.message_id = chunk.id.clone();
            events.push(claude::StreamEvent::MessageStart {
                message: claude::MessagesResponse {
                    id: chunk.id.clone(),
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

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            if self.open != OpenBlock::Text {
                self.close_block(&mut events);
                events.push(claude::StreamEvent::ContentBlockStart {
                    index: self.block_index,
                    content_block: claude::ContentBlock::Text {
                        text: String::new(),
                        cache_control: None,
                    },
                });
                self.open = OpenBlock::Text;
            }
            events.push(claude::StreamEvent::ContentBlockDelta {
                index: self.block_index,
                delta: claude::BlockDelta::TextDelta { text: content },
            });
        }

        for call in choice.delta.tool_calls.into_iter().flatten() {
            if let Some(name) = call.function.as_ref().and_then(|f| f.name.clone()) {
                self.close_block(&mut events);
                events.push(claude::StreamEvent::ContentBlockStart {
                    index: self.block_index,
                    content_block: claude::ContentBlock::ToolUse {
                        id: call.id.clone().unwrap_or_else(|| format!("call_{}", call.index)),
                        name,
                        input: serde_json::Value::Object(Default::default()),
                    },
                });
                self.open = OpenBlock::Tool;
            }
            if let Some(arguments) = call.function.and_then(|f| f.arguments)
                && !arguments.is_empty()
            {
                events.push(claude::StreamEvent::ContentBlockDelta {
                    index: self.block_index,
                    delta: claude::BlockDelta::InputJsonDelta {
                        partial_json: arguments,
                    },
                });
            }
        }

        if let Some(finish) = choice.finish_reason {
            self.finish = Some(finish);
            self.close_block(&mut events);
        }

        events
    }

    /// Terminal events once the upstream stream is done.
    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        if !self.started {
            return events;
        }
        self.close_block(&mut events);

        let usage = self
            .usage
            .as_ref()
            .map(|usage| redistribute_claude_usage(UsageCounts::from_openai_chat(usage)));
        events.push(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some(stop_reason(self.finish.as_deref())),
                stop_sequence: None,
            },
            usage,
        });
        events.push(claude::StreamEvent::MessageStop);
        self.started = false;
        events
    }

    fn close_block(&mut self, events: &mut Vec<claude::StreamEvent>) {
        if self.open != OpenBlock::None {
            events.push(claude::StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
            self.open = OpenBlock::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_chunk(id: &str, content: Option<&str>, finish: Option<&str>) -> openai::ChatChunk {
        openai::ChatChunk {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "gpt-x".to_string(),
            choices: vec![openai::ChunkChoice {
                index: 0,
                delta: openai::ChunkDelta {
                    role: None,
                    content: content.map(str::to_string),
                    tool_calls: None,
                },
                finish_reason: finish.map(str::to_string),
            }],
            usage: None,
        }
    }

    #[test]
    fn event_order_matches_claude_contract() {
        let mut state = ChatToClaudeStream::new("claude-sonnet-4-5");
        let mut names = Vec::new();
        for chunk in [
            text_chunk("c1", Some("he"), None),
            text_chunk("c1", Some("y"), None),
            text_chunk("c1", None, Some("stop")),
        ] {
            for event in state.transform_chunk(chunk) {
                names.push(event.event_name());
            }
        }
        for event in state.finish() {
            names.push(event.event_name());
        }
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn trailing_usage_chunk_reaches_message_delta() {
        let mut state = ChatToClaudeStream::new("claude-sonnet-4-5");
        state.transform_chunk(text_chunk("c1", Some("x"), None));
        state.transform_chunk(text_chunk("c1", None, Some("stop")));
        let mut tail = text_chunk("c1", None, None);
        tail.choices.clear();
        tail.usage = Some(openai::ChatUsage {
            prompt_tokens: 28,
            completion_tokens: 1,
            total_tokens: 29,
            prompt_tokens_details: None,
            completion_tokens_details: None,
        });
        state.transform_chunk(tail);

        let events = state.finish();
        let claude::StreamEvent::MessageDelta { usage, .. } = &events[0] else {
            panic!("expected message_delta first");
        };
        let usage = usage.as_ref().unwrap();
        assert_eq!(
            usage.input_tokens
                + usage.cache_creation_input_tokens.unwrap()
                + usage.cache_read_input_tokens.unwrap(),
            28
        );
    }
}

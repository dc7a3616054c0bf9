use switchboard_protocol::{gemini, openai};

use super::response::{chat_usage, finish_reason};
use crate::schema::correct_function_args;
use crate::toolnames::ToolNameMap;

/// Re-frames a Gemini chunk stream as OpenAI chat chunks.
#[derive(Debug)]
pub struct GeminiToChatStream {
    model: String,
    names: ToolNameMap,
    response_id: String,
    sent_role: bool,
    tool_count: u32,
    finish: Option<String>,
    saw_tool_call: bool,
    usage: Option<gemini::UsageMetadata>,
}

impl GeminiToChatStream {
    pub fn new(model: &str, names: ToolNameMap) -> Self {
        Self {
            model: model.to_string(),
            names,
            response_id: "chatcmpl-gemini".to_string(),
            sent_role: false,
            tool_count: 0,
            finish: None,
            saw_tool_call: false,
            usage: None,
        }
    }

    pub fn transform_chunk(
        &mut self,
        chunk: gemini::GenerateContentResponse,
    ) -> Vec<openai::ChatChunk> {
        if let Some(id) = &chunk.response_id {
            self.response_id = format!("chatcmpl-{id}");
        }
        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage);
        }

        let mut out = Vec::new();
        let Some(candidate) = chunk.candidates.into_iter().next() else {
            return out;
        };
        if let Some(finish) = candidate.finish_reason {
            self.finish = Some(finish);
        }

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text
                && part.thought != Some(true)
                && !text.is_empty()
            {
                let role = self.role_once();
                out.push(self.chunk(openai::ChunkDelta {
                    role,
                    content: Some(text),
                    tool_calls: None,
                }));
            }
            if let Some(call) = part.function_call {
                self.saw_tool_call = true;
                let name = self.names.restore(&call.name);
                let mut args = call.args;
                correct_function_args(&name, &mut args);
                let index = self.tool_count;
                self.tool_count += 1;
                let role = self.role_once();
                out.push(self.chunk(openai::ChunkDelta {
                    role,
                    content: None,
                    tool_calls: Some(vec![openai::ChunkToolCall {
                        index,
                        id: Some(call.id.unwrap_or_else(|| format!("call_{index}"))),
                        r#type: Some("function".to_string()),
                        function: Some(openai::ChunkFunction {
                            name: Some(name),
                            arguments: Some(args.to_string()),
                        }),
                    }]),
                }));
            }
        }

        out
    }

    pub fn finish(&mut self) -> Vec<openai::ChatChunk> {
        let finish = if self.saw_tool_call {
            "tool_calls".to_string()
        } else {
            finish_reason(self.finish.as_deref()).to_string()
        };
        let mut chunk = self.chunk(openai::ChunkDelta::default());
        chunk.choices[0].finish_reason = Some(finish);
        chunk.usage = self.usage.as_ref().map(chat_usage);
        vec![chunk]
    }

    fn role_once(&mut self) -> Option<String> {
        if self.sent_role {
            None
        } else {
            self.sent_role = true;
            Some("assistant".to_string())
        }
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
    use serde_json::json;

    #[test]
    fn text_chunks_relay_in_order() {
        let mut state = GeminiToChatStream::new("gpt-x", ToolNameMap::new());
        let mut collected = String::new();
        for text in ["a", "b", "c"] {
            let chunk: gemini::GenerateContentResponse = serde_json::from_value(json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
            }))
            .unwrap();
            for out in state.transform_chunk(chunk) {
                collected.push_str(out.choices[0].delta.content.as_deref().unwrap());
            }
        }
        assert_eq!(collected, "abc");
        let tail = state.finish();
        assert_eq!(tail[0].choices[0].finish_reason.as_deref(), Some("stop"));
    }
}

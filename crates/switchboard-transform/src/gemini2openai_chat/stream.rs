use serde_json::Value;
use switchboard_protocol::{gemini, openai};

use super::response::{finish_reason, usage_metadata};

/// Re-frames an OpenAI chat chunk stream as Gemini chunks.
///
/// Tool-call argument fragments accumulate until the stream finishes, so a
/// function-call part always carries complete JSON args.
#[derive(Debug)]
pub struct ChatToGeminiStream {
    model: String,
    response_id: String,
    finish: Option<String>,
    usage: Option<openai::ChatUsage>,
    pending_tools: Vec<(Option<String>, String, String)>,
}

impl ChatToGeminiStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: "response".to_string(),
            finish: None,
            usage: None,
            pending_tools: Vec::new(),
        }
    }

    pub fn transform_chunk(
        &mut self,
        chunk: openai::ChatChunk,
    ) -> Vec<gemini::GenerateContentResponse> {
        self.response_id = chunk.id.clone();
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let mut out = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };
        if let Some(finish) = choice.finish_reason {
            self.finish = Some(finish);
        }

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            out.push(self.chunk(
                vec![gemini::Part {
                    text: Some(text),
                    ..Default::default()
                }],
                None,
            ));
        }

        for call in choice.delta.tool_calls.into_iter().flatten() {
            let index = call.index as usize;
            if self.pending_tools.len() <= index {
                self.pending_tools
                    .resize(index + 1, (None, String::new(), String::new()));
            }
            let slot = &mut self.pending_tools[index];
            if let Some(id) = call.id {
                slot.0 = Some(id);
            }
            if let Some(function) = call.function {
                if let Some(name) = function.name {
                    slot.1 = name;
                }
                if let Some(arguments) = function.arguments {
                    slot.2.push_str(&arguments);
                }
            }
        }

        out
    }

    pub fn finish(&mut self) -> Vec<gemini::GenerateContentResponse> {
        let mut parts = Vec::new();
        for (id, name, args) in self.pending_tools.drain(..) {
            if name.is_empty() {
                continue;
            }
            parts.push(gemini::Part {
                function_call: Some(gemini::FunctionCall {
                    args: serde_json::from_str(&args).unwrap_or(Value::Object(Default::default())),
                    name,
                    id,
                }),
                ..Default::default()
            });
        }

        let mut chunk = self.chunk(parts, Some(finish_reason(self.finish.as_deref())));
        chunk.usage_metadata = self.usage.as_ref().map(usage_metadata);
        vec![chunk]
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
    fn tool_arguments_assemble_across_chunks() {
        let mut state = ChatToGeminiStream::new("gemini-2.5-pro");
        for (name, args) in [(Some("Grep"), "{\"patt"), (None, "ern\":\"x\"}")] {
            let chunk: openai::ChatChunk = serde_json::from_value(serde_json::json!({
                "id": "c1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-x",
                "choices": [{"index": 0, "delta": {"tool_calls": [{
                    "index": 0, "id": name.map(|_| "t1"),
                    "function": {"name": name, "arguments": args}
                }]}, "finish_reason": null}]
            }))
            .unwrap();
            assert!(state.transform_chunk(chunk).is_empty());
        }
        let tail = state.finish();
        let call = tail[0].candidates[0].content.as_ref().unwrap().parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.name, "Grep");
        assert_eq!(call.args["pattern"], "x");
    }
}

use std::collections::BTreeMap;

use serde_json::{Value, json};
use switchboard_protocol::openai;

use super::response::responses_usage;

/// Re-frames an OpenAI chat chunk stream as Responses stream events.
#[derive(Debug)]
pub struct ChatToResponsesStream {
    model: String,
    response_id: String,
    started: bool,
    text_open: bool,
    text_acc: String,
    usage: Option<openai::ChatUsage>,
}

impl ChatToResponsesStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            response_id: "resp_stream".to_string(),
            started: false,
            text_open: false,
            text_acc: String::new(),
            usage: None,
        }
    }

    pub fn transform_chunk(
        &mut self,
        chunk: openai::ChatChunk,
    ) -> Vec<openai::ResponsesStreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            self.response_id = format!("resp_{}", chunk.id);
            events.push(self.event(
                "response.created",
                [(
                    "response".to_string(),
                    json!({"id": self.response_id, "object": "response",
                           "model": self.model, "status": "in_progress"}),
                )],
            ));
        }

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return events;
        };

        if let Some(text) = choice.delta.content
            && !text.is_empty()
        {
            if !self.text_open {
                self.text_open = true;
                events.push(self.event(
                    "response.output_item.added",
                    [(
                        "item".to_string(),
                        json!({"type": "message", "role": "assistant"}),
                    )],
                ));
            }
            self.text_acc.push_str(&text);
            events.push(self.event(
                "response.output_text.delta",
                [("delta".to_string(), Value::String(text))],
            ));
        }

        events
    }

    pub fn finish(&mut self) -> Vec<openai::ResponsesStreamEvent> {
        let mut events = Vec::new();
        if self.text_open {
            events.push(self.event(
                "response.output_text.done",
                [("text".to_string(), Value::String(self.text_acc.clone()))],
            ));
        }
        let usage = self
            .usage
            .as_ref()
            .map(|usage| serde_json::to_value(responses_usage(usage)).unwrap_or(Value::Null));
        events.push(self.event(
            "response.completed",
            [(
                "response".to_string(),
                json!({
                    "id": self.response_id,
                    "object": "response",
                    "model": self.model,
                    "status": "completed",
                    "usage": usage,
                }),
            )],
        ));
        events
    }

    fn event<const N: usize>(
        &self,
        kind: &str,
        fields: [(String, Value); N],
    ) -> openai::ResponsesStreamEvent {
        openai::ResponsesStreamEvent {
            r#type: kind.to_string(),
            body: BTreeMap::from(fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: Option<&str>, finish: Option<&str>) -> openai::ChatChunk {
        serde_json::from_value(json!({
            "id": "c1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-x",
            "choices": [{"index": 0, "delta": {"content": content},
                         "finish_reason": finish}]
        }))
        .unwrap()
    }

    #[test]
    fn emits_created_then_deltas_then_completed() {
        let mut state = ChatToResponsesStream::new("gpt-x");
        let mut kinds = Vec::new();
        for c in [chunk(Some("a"), None), chunk(Some("b"), Some("stop"))] {
            for event in state.transform_chunk(c) {
                kinds.push(event.r#type.clone());
            }
        }
        for event in state.finish() {
            kinds.push(event.r#type.clone());
        }
        assert_eq!(
            kinds,
            vec![
                "response.created",
                "response.output_item.added",
                "response.output_text.delta",
                "response.output_text.delta",
                "response.output_text.done",
                "response.completed",
            ]
        );
    }
}

use serde_json::Value;
use sha2::{Digest, Sha256};
use switchboard_common::Token;
use switchboard_protocol::claude;
use switchboard_protocol::eventstream::{Frame, FrameError, FrameParser};
use switchboard_transform::usage::{UsageCounts, redistribute_claude_usage};

pub const DEFAULT_REGION: &str = "us-east-1";

pub fn endpoint_url(token: &Token) -> String {
    let region = token.extra_str("idcRegion").unwrap_or(DEFAULT_REGION);
    format!("https://q.{region}.amazonaws.com/generateAssistantResponse")
}

/// 32 hex chars derived from the credential's profile ARN; stable per
/// account so upstream sees one "machine" per credential.
pub fn machine_id(token: &Token) -> String {
    let profile_arn = token.extra_str("profileArn").unwrap_or("unknown");
    let digest = Sha256::digest(profile_arn.as_bytes());
    let hex: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    hex[..32].to_string()
}

pub fn request_headers(token: &Token) -> Vec<(String, String)> {
    vec![
        (
            "authorization".to_string(),
            format!("Bearer {}", token.access_token),
        ),
        ("content-type".to_string(), "application/json".to_string()),
        (
            "amz-sdk-invocation-id".to_string(),
            uuid::Uuid::new_v4().to_string(),
        ),
        (
            "user-agent".to_string(),
            format!(
                "aws-sdk-js/1.0.7 ua/2.1 os/{} lang/js md/nodejs#{} api/codewhispererstreaming#1.0.7 m/{}",
                std::env::consts::OS,
                runtime_version(),
                machine_id(token)
            ),
        ),
    ]
}

fn runtime_version() -> &'static str {
    // The upstream only checks the shape of this field.
    "22.12.0"
}

/// Adapts the binary frame payloads into Claude stream events.
///
/// Frames carry `assistantResponseEvent` text deltas and `toolUseEvent`
/// argument fragments; message framing (`message_start`, block stops, the
/// terminal delta/stop pair) is synthesized here.
#[derive(Debug)]
pub struct KiroStream {
    model: String,
    started: bool,
    block_index: u32,
    text_open: bool,
    tool_open: bool,
    saw_tool_use: bool,
    usage: Option<claude::Usage>,
}

impl KiroStream {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            started: false,
            block_index: 0,
            text_open: false,
            tool_open: false,
            saw_tool_use: false,
            usage: None,
        }
    }

    pub fn transform_frame(&mut self, frame: &Frame) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        let Ok(payload) = frame.payload_json() else {
            return events;
        };
        if !self.started {
            self.started = true;
            events.push(claude::StreamEvent::MessageStart {
                message: claude::MessagesResponse {
                    id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
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

        match frame.header_str(":event-type") {
            Some("assistantResponseEvent") => {
                if let Some(text) = payload.get("content").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    self.close_tool(&mut events);
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
                        delta: claude::BlockDelta::TextDelta {
                            text: text.to_string(),
                        },
                    });
                }
            }
            Some("toolUseEvent") => {
                if let Some(name) = payload.get("name").and_then(Value::as_str) {
                    self.close_text(&mut events);
                    self.close_tool(&mut events);
                    self.saw_tool_use = true;
                    events.push(claude::StreamEvent::ContentBlockStart {
                        index: self.block_index,
                        content_block: claude::ContentBlock::ToolUse {
                            id: payload
                                .get("toolUseId")
                                .and_then(Value::as_str)
                                .unwrap_or(name)
                                .to_string(),
                            name: name.to_string(),
                            input: Value::Object(Default::default()),
                        },
                    });
                    self.tool_open = true;
                }
                if let Some(input) = payload.get("input").and_then(Value::as_str)
                    && self.tool_open
                    && !input.is_empty()
                {
                    events.push(claude::StreamEvent::ContentBlockDelta {
                        index: self.block_index,
                        delta: claude::BlockDelta::InputJsonDelta {
                            partial_json: input.to_string(),
                        },
                    });
                }
                if payload.get("stop").and_then(Value::as_bool) == Some(true) {
                    self.close_tool(&mut events);
                }
            }
            Some("metadataEvent") => {
                if let Some(usage) = payload.get("usage") {
                    // Split into the three Claude accounting buckets.
                    self.usage = Some(redistribute_claude_usage(UsageCounts {
                        input_tokens: usage
                            .get("inputTokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                        output_tokens: usage
                            .get("outputTokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0),
                        cache_read_tokens: None,
                        reasoning_tokens: None,
                    }));
                }
            }
            _ => {}
        }

        events
    }

    pub fn finish(&mut self) -> Vec<claude::StreamEvent> {
        let mut events = Vec::new();
        if !self.started {
            return events;
        }
        self.close_text(&mut events);
        self.close_tool(&mut events);
        events.push(claude::StreamEvent::MessageDelta {
            delta: claude::MessageDelta {
                stop_reason: Some(if self.saw_tool_use {
                    claude::StopReason::ToolUse
                } else {
                    claude::StopReason::EndTurn
                }),
                stop_sequence: None,
            },
            usage: self.usage.take(),
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

    fn close_tool(&mut self, events: &mut Vec<claude::StreamEvent>) {
        if self.tool_open {
            events.push(claude::StreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
            self.tool_open = false;
        }
    }
}

/// Aggregate a complete frame-stream body into one Claude response.
pub fn unary_response(body: &[u8], model: &str) -> Result<claude::MessagesResponse, FrameError> {
    let mut parser = FrameParser::new();
    let mut stream = KiroStream::new(model);
    let mut events = Vec::new();
    for frame in parser.push_bytes(body)? {
        events.extend(stream.transform_frame(&frame));
    }
    events.extend(stream.finish());

    let mut response = claude::MessagesResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        r#type: "message".to_string(),
        role: claude::Role::Assistant,
        model: model.to_string(),
        content: Vec::new(),
        stop_reason: Some(claude::StopReason::EndTurn),
        stop_sequence: None,
        usage: claude::Usage::default(),
    };
    let mut text = String::new();
    let mut tool_args = String::new();
    let mut open_tool: Option<(String, String)> = None;

    for event in events {
        match event {
            claude::StreamEvent::MessageStart { message } => response.id = message.id,
            claude::StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                claude::ContentBlock::ToolUse { id, name, .. } => {
                    open_tool = Some((id, name));
                    tool_args.clear();
                }
                claude::ContentBlock::Text { text: t, .. } => text.push_str(&t),
                _ => {}
            },
            claude::StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                claude::BlockDelta::TextDelta { text: t } => text.push_str(&t),
                claude::BlockDelta::InputJsonDelta { partial_json } => {
                    tool_args.push_str(&partial_json)
                }
                _ => {}
            },
            claude::StreamEvent::ContentBlockStop { .. } => {
                if let Some((id, name)) = open_tool.take() {
                    response.content.push(claude::ContentBlock::ToolUse {
                        id,
                        name,
                        input: serde_json::from_str(&tool_args)
                            .unwrap_or(Value::Object(Default::default())),
                    });
                }
            }
            claude::StreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    response.stop_reason = delta.stop_reason;
                }
                if let Some(usage) = usage {
                    response.usage = usage;
                }
            }
            _ => {}
        }
    }
    if !text.is_empty() {
        response.content.insert(
            0,
            claude::ContentBlock::Text {
                text,
                cache_control: None,
            },
        );
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_protocol::eventstream::{FrameParser, HeaderValue, encode_frame};

    fn frame(event_type: &str, payload: serde_json::Value) -> Frame {
        let wire = encode_frame(
            &[(
                ":event-type".to_string(),
                HeaderValue::String(event_type.to_string()),
            )],
            payload.to_string().as_bytes(),
        );
        FrameParser::new().push_bytes(&wire).unwrap().remove(0)
    }

    #[test]
    fn machine_id_is_stable_sha256_prefix() {
        let mut token = Token::new("a");
        token.extra.insert(
            "profileArn".to_string(),
            serde_json::json!("arn:aws:codewhisperer:us-east-1:123:profile/x"),
        );
        let id = machine_id(&token);
        assert_eq!(id.len(), 32);
        assert_eq!(id, machine_id(&token));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn region_selects_endpoint() {
        let mut token = Token::new("a");
        token
            .extra
            .insert("idcRegion".to_string(), serde_json::json!("eu-west-1"));
        assert_eq!(
            endpoint_url(&token),
            "https://q.eu-west-1.amazonaws.com/generateAssistantResponse"
        );
    }

    #[test]
    fn frames_become_claude_event_sequence() {
        let mut stream = KiroStream::new("claude-sonnet-4-5");
        let mut names = Vec::new();
        for event in [
            frame("assistantResponseEvent", serde_json::json!({"content": "he"})),
            frame("assistantResponseEvent", serde_json::json!({"content": "y"})),
            frame(
                "metadataEvent",
                serde_json::json!({"usage": {"inputTokens": 28, "outputTokens": 2}}),
            ),
        ]
        .iter()
        .flat_map(|f| stream.transform_frame(f))
        {
            names.push(event.event_name());
        }
        for event in stream.finish() {
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
    fn terminal_usage_buckets_sum_to_upstream_input() {
        let mut stream = KiroStream::new("claude-sonnet-4-5");
        stream.transform_frame(&frame(
            "assistantResponseEvent",
            serde_json::json!({"content": "ok"}),
        ));
        stream.transform_frame(&frame(
            "metadataEvent",
            serde_json::json!({"usage": {"inputTokens": 280, "outputTokens": 3}}),
        ));
        let events = stream.finish();
        let claude::StreamEvent::MessageDelta { usage, .. } = &events[1] else {
            panic!("message_delta expected");
        };
        let usage = usage.as_ref().unwrap();
        assert_eq!(
            usage.input_tokens
                + usage.cache_creation_input_tokens.unwrap()
                + usage.cache_read_input_tokens.unwrap(),
            280
        );
        assert_eq!(usage.output_tokens, 3);
    }

    #[test]
    fn unary_aggregates_text_and_tools() {
        let mut wire = Vec::new();
        for (event_type, payload) in [
            ("assistantResponseEvent", serde_json::json!({"content": "calling "})),
            ("assistantResponseEvent", serde_json::json!({"content": "tool"})),
            (
                "toolUseEvent",
                serde_json::json!({"name": "Grep", "toolUseId": "t1",
                                   "input": "{\"pattern\":\"x\"}", "stop": true}),
            ),
        ] {
            wire.extend_from_slice(&encode_frame(
                &[(
                    ":event-type".to_string(),
                    HeaderValue::String(event_type.to_string()),
                )],
                payload.to_string().as_bytes(),
            ));
        }

        let response = unary_response(&wire, "claude-sonnet-4-5").unwrap();
        assert!(matches!(
            &response.content[0],
            claude::ContentBlock::Text { text, .. } if text == "calling tool"
        ));
        assert!(matches!(
            &response.content[1],
            claude::ContentBlock::ToolUse { name, .. } if name == "Grep"
        ));
        assert_eq!(response.stop_reason, Some(claude::StopReason::ToolUse));
    }
}

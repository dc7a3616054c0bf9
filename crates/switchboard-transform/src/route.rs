//! Dialect routing: pick the right pair module for a `(client, upstream)`
//! combination, pivoting through the chat dialect when no direct pair
//! exists. Kiro upstreams carry Claude-shaped bodies, so callers pass
//! `Dialect::Kiro` through [`Dialect::body_dialect`] before routing.

use switchboard_common::Dialect;
use switchboard_protocol::{claude, gemini, openai};

use crate::toolnames::ToolNameMap;
use crate::{
    claude2gemini, claude2openai_chat, gemini2claude, gemini2openai_chat, openai_chat2claude,
    openai_chat2gemini, openai_chat2openai_responses, openai_responses2openai_chat,
};

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("cannot parse {dialect:?} body: {message}")]
    Parse {
        dialect: Dialect,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    OpenAiChat(openai::ChatRequest),
    OpenAiResponses(openai::ResponsesRequest),
    Claude(claude::MessagesRequest),
    Gemini(gemini::GenerateContentRequest),
}

impl RequestBody {
    pub fn parse(dialect: Dialect, raw: &[u8]) -> Result<Self, TransformError> {
        let wrap = |message: serde_json::Error| TransformError::Parse {
            dialect,
            message: message.to_string(),
        };
        Ok(match dialect.body_dialect() {
            Dialect::OpenAiChat => RequestBody::OpenAiChat(serde_json::from_slice(raw).map_err(wrap)?),
            Dialect::OpenAiResponses => {
                RequestBody::OpenAiResponses(serde_json::from_slice(raw).map_err(wrap)?)
            }
            Dialect::Claude => RequestBody::Claude(serde_json::from_slice(raw).map_err(wrap)?),
            Dialect::Gemini => RequestBody::Gemini(serde_json::from_slice(raw).map_err(wrap)?),
            Dialect::Kiro => unreachable!("body_dialect never returns Kiro"),
        })
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            RequestBody::OpenAiChat(_) => Dialect::OpenAiChat,
            RequestBody::OpenAiResponses(_) => Dialect::OpenAiResponses,
            RequestBody::Claude(_) => Dialect::Claude,
            RequestBody::Gemini(_) => Dialect::Gemini,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            RequestBody::OpenAiChat(body) => &body.model,
            RequestBody::OpenAiResponses(body) => &body.model,
            RequestBody::Claude(body) => &body.model,
            RequestBody::Gemini(_) => "",
        }
    }

    pub fn wants_stream(&self) -> bool {
        match self {
            RequestBody::OpenAiChat(body) => body.stream.unwrap_or(false),
            RequestBody::OpenAiResponses(body) => body.stream.unwrap_or(false),
            RequestBody::Claude(body) => body.stream.unwrap_or(false),
            // Gemini signals streaming via the URL, not the body.
            RequestBody::Gemini(_) => false,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RequestBody::OpenAiChat(body) => serde_json::to_vec(body),
            RequestBody::OpenAiResponses(body) => serde_json::to_vec(body),
            RequestBody::Claude(body) => serde_json::to_vec(body),
            RequestBody::Gemini(body) => serde_json::to_vec(body),
        }
        .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum ResponseBody {
    OpenAiChat(openai::ChatResponse),
    OpenAiResponses(openai::ResponsesResponse),
    Claude(claude::MessagesResponse),
    Gemini(gemini::GenerateContentResponse),
}

impl ResponseBody {
    pub fn parse(dialect: Dialect, raw: &[u8]) -> Result<Self, TransformError> {
        let wrap = |message: serde_json::Error| TransformError::Parse {
            dialect,
            message: message.to_string(),
        };
        Ok(match dialect.body_dialect() {
            Dialect::OpenAiChat => {
                ResponseBody::OpenAiChat(serde_json::from_slice(raw).map_err(wrap)?)
            }
            Dialect::OpenAiResponses => {
                ResponseBody::OpenAiResponses(serde_json::from_slice(raw).map_err(wrap)?)
            }
            Dialect::Claude => ResponseBody::Claude(serde_json::from_slice(raw).map_err(wrap)?),
            Dialect::Gemini => ResponseBody::Gemini(serde_json::from_slice(raw).map_err(wrap)?),
            Dialect::Kiro => unreachable!("body_dialect never returns Kiro"),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ResponseBody::OpenAiChat(body) => serde_json::to_vec(body),
            ResponseBody::OpenAiResponses(body) => serde_json::to_vec(body),
            ResponseBody::Claude(body) => serde_json::to_vec(body),
            ResponseBody::Gemini(body) => serde_json::to_vec(body),
        }
        .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub enum StreamChunk {
    OpenAiChat(openai::ChatChunk),
    OpenAiResponses(openai::ResponsesStreamEvent),
    Claude(claude::StreamEvent),
    Gemini(gemini::GenerateContentResponse),
}

/// Convert a client request into the upstream dialect.
///
/// Returns the upstream body and the tool-name map built while shortening
/// declarations for length-limited sinks; the map must be handed to the
/// matching response/stream conversion.
pub fn convert_request(
    body: &RequestBody,
    upstream: Dialect,
    target_model: &str,
) -> (RequestBody, ToolNameMap) {
    let mut names = ToolNameMap::new();
    let upstream = upstream.body_dialect();

    if body.dialect() == upstream {
        let mut out = body.clone();
        if let RequestBody::Claude(body) = &mut out {
            body.model = target_model.to_string();
        }
        if let RequestBody::OpenAiChat(body) = &mut out {
            body.model = target_model.to_string();
        }
        if let RequestBody::OpenAiResponses(body) = &mut out {
            body.model = target_model.to_string();
        }
        return (out, names);
    }

    let out = match (body, upstream) {
        (RequestBody::OpenAiChat(body), Dialect::Claude) => {
            RequestBody::Claude(openai_chat2claude::convert_request(body, target_model))
        }
        (RequestBody::OpenAiChat(body), Dialect::Gemini) => RequestBody::Gemini(
            openai_chat2gemini::convert_request(body, target_model, &mut names),
        ),
        (RequestBody::OpenAiChat(body), Dialect::OpenAiResponses) => RequestBody::OpenAiResponses(
            openai_chat2openai_responses::convert_request(body, target_model),
        ),
        (RequestBody::Claude(body), Dialect::OpenAiChat) => {
            RequestBody::OpenAiChat(claude2openai_chat::convert_request(body, target_model))
        }
        (RequestBody::Claude(body), Dialect::Gemini) => RequestBody::Gemini(
            claude2gemini::convert_request(body, target_model, &mut names),
        ),
        (RequestBody::Gemini(body), Dialect::OpenAiChat) => {
            RequestBody::OpenAiChat(gemini2openai_chat::convert_request(body, target_model))
        }
        (RequestBody::Gemini(body), Dialect::Claude) => {
            RequestBody::Claude(gemini2claude::convert_request(body, target_model))
        }
        (RequestBody::OpenAiResponses(body), Dialect::OpenAiChat) => RequestBody::OpenAiChat(
            openai_responses2openai_chat::convert_request(body, target_model),
        ),
        // No direct pair: pivot through the chat dialect.
        (RequestBody::Claude(body), Dialect::OpenAiResponses) => {
            let chat = claude2openai_chat::convert_request(body, target_model);
            RequestBody::OpenAiResponses(openai_chat2openai_responses::convert_request(
                &chat,
                target_model,
            ))
        }
        (RequestBody::Gemini(body), Dialect::OpenAiResponses) => {
            let chat = gemini2openai_chat::convert_request(body, target_model);
            RequestBody::OpenAiResponses(openai_chat2openai_responses::convert_request(
                &chat,
                target_model,
            ))
        }
        (RequestBody::OpenAiResponses(body), Dialect::Claude) => {
            let chat = openai_responses2openai_chat::convert_request(body, target_model);
            RequestBody::Claude(openai_chat2claude::convert_request(&chat, target_model))
        }
        (RequestBody::OpenAiResponses(body), Dialect::Gemini) => {
            let chat = openai_responses2openai_chat::convert_request(body, target_model);
            RequestBody::Gemini(openai_chat2gemini::convert_request(
                &chat,
                target_model,
                &mut names,
            ))
        }
        // Same-dialect combinations handled above.
        _ => body.clone(),
    };
    (out, names)
}

/// Convert a full upstream response into the client dialect.
pub fn convert_response(
    body: &ResponseBody,
    client: Dialect,
    model: &str,
    names: &ToolNameMap,
) -> ResponseBody {
    let client = client.body_dialect();
    match (body, client) {
        (ResponseBody::Claude(body), Dialect::OpenAiChat) => {
            ResponseBody::OpenAiChat(openai_chat2claude::convert_response(body, model))
        }
        (ResponseBody::Claude(body), Dialect::Gemini) => {
            ResponseBody::Gemini(gemini2claude::convert_response(body, model))
        }
        (ResponseBody::Claude(body), Dialect::OpenAiResponses) => {
            let chat = openai_chat2claude::convert_response(body, model);
            ResponseBody::OpenAiResponses(openai_responses2openai_chat::convert_response(
                &chat, model,
            ))
        }
        (ResponseBody::Gemini(body), Dialect::Claude) => {
            ResponseBody::Claude(claude2gemini::convert_response(body, model, names))
        }
        (ResponseBody::Gemini(body), Dialect::OpenAiChat) => {
            ResponseBody::OpenAiChat(openai_chat2gemini::convert_response(body, model, names))
        }
        (ResponseBody::Gemini(body), Dialect::OpenAiResponses) => {
            let chat = openai_chat2gemini::convert_response(body, model, names);
            ResponseBody::OpenAiResponses(openai_responses2openai_chat::convert_response(
                &chat, model,
            ))
        }
        (ResponseBody::OpenAiChat(body), Dialect::Claude) => {
            ResponseBody::Claude(claude2openai_chat::convert_response(body, model))
        }
        (ResponseBody::OpenAiChat(body), Dialect::Gemini) => {
            ResponseBody::Gemini(gemini2openai_chat::convert_response(body, model))
        }
        (ResponseBody::OpenAiChat(body), Dialect::OpenAiResponses) => {
            ResponseBody::OpenAiResponses(openai_responses2openai_chat::convert_response(
                body, model,
            ))
        }
        (ResponseBody::OpenAiResponses(body), Dialect::OpenAiChat) => {
            ResponseBody::OpenAiChat(openai_chat2openai_responses::convert_response(body, model))
        }
        (ResponseBody::OpenAiResponses(body), Dialect::Claude) => {
            let chat = openai_chat2openai_responses::convert_response(body, model);
            ResponseBody::Claude(claude2openai_chat::convert_response(&chat, model))
        }
        (ResponseBody::OpenAiResponses(body), Dialect::Gemini) => {
            let chat = openai_chat2openai_responses::convert_response(body, model);
            ResponseBody::Gemini(gemini2openai_chat::convert_response(&chat, model))
        }
        _ => body.clone(),
    }
}

/// Stateful stream conversion from one upstream dialect to one client
/// dialect. Identity variants relay chunks untouched.
pub enum StreamTransform {
    Identity,
    ClaudeToChat(openai_chat2claude::ClaudeToChatStream),
    ClaudeToGemini(gemini2claude::ClaudeToGeminiStream),
    ChatToClaude(claude2openai_chat::ChatToClaudeStream),
    ChatToGemini(gemini2openai_chat::ChatToGeminiStream),
    ChatToResponses(openai_responses2openai_chat::ChatToResponsesStream),
    GeminiToClaude(claude2gemini::GeminiToClaudeStream),
    GeminiToChat(openai_chat2gemini::GeminiToChatStream),
    ResponsesToChat(openai_chat2openai_responses::ResponsesToChatStream),
    /// Pivot: upstream -> chat -> client.
    Composed(Box<StreamTransform>, Box<StreamTransform>),
}

impl StreamTransform {
    pub fn new(upstream: Dialect, client: Dialect, model: &str, names: ToolNameMap) -> Self {
        use StreamTransform::*;
        let upstream = upstream.body_dialect();
        let client = client.body_dialect();
        match (upstream, client) {
            (a, b) if a == b => Identity,
            (Dialect::Claude, Dialect::OpenAiChat) => {
                ClaudeToChat(openai_chat2claude::ClaudeToChatStream::new(model))
            }
            (Dialect::Claude, Dialect::Gemini) => {
                ClaudeToGemini(gemini2claude::ClaudeToGeminiStream::new(model))
            }
            (Dialect::Claude, Dialect::OpenAiResponses) => Composed(
                Box::new(Self::new(Dialect::Claude, Dialect::OpenAiChat, model, names)),
                Box::new(ChatToResponses(
                    openai_responses2openai_chat::ChatToResponsesStream::new(model),
                )),
            ),
            (Dialect::OpenAiChat, Dialect::Claude) => {
                ChatToClaude(claude2openai_chat::ChatToClaudeStream::new(model))
            }
            (Dialect::OpenAiChat, Dialect::Gemini) => {
                ChatToGemini(gemini2openai_chat::ChatToGeminiStream::new(model))
            }
            (Dialect::OpenAiChat, Dialect::OpenAiResponses) => ChatToResponses(
                openai_responses2openai_chat::ChatToResponsesStream::new(model),
            ),
            (Dialect::Gemini, Dialect::Claude) => {
                GeminiToClaude(claude2gemini::GeminiToClaudeStream::new(model, names))
            }
            (Dialect::Gemini, Dialect::OpenAiChat) => {
                GeminiToChat(openai_chat2gemini::GeminiToChatStream::new(model, names))
            }
            (Dialect::Gemini, Dialect::OpenAiResponses) => Composed(
                Box::new(Self::new(
                    Dialect::Gemini,
                    Dialect::OpenAiChat,
                    model,
                    names,
                )),
                Box::new(ChatToResponses(
                    openai_responses2openai_chat::ChatToResponsesStream::new(model),
                )),
            ),
            (Dialect::OpenAiResponses, Dialect::OpenAiChat) => ResponsesToChat(
                openai_chat2openai_responses::ResponsesToChatStream::new(model),
            ),
            (Dialect::OpenAiResponses, Dialect::Claude) => Composed(
                Box::new(ResponsesToChat(
                    openai_chat2openai_responses::ResponsesToChatStream::new(model),
                )),
                Box::new(ChatToClaude(claude2openai_chat::ChatToClaudeStream::new(
                    model,
                ))),
            ),
            (Dialect::OpenAiResponses, Dialect::Gemini) => Composed(
                Box::new(ResponsesToChat(
                    openai_chat2openai_responses::ResponsesToChatStream::new(model),
                )),
                Box::new(ChatToGemini(gemini2openai_chat::ChatToGeminiStream::new(
                    model,
                ))),
            ),
            _ => Identity,
        }
    }

    pub fn transform_chunk(&mut self, chunk: StreamChunk) -> Vec<StreamChunk> {
        match self {
            StreamTransform::Identity => vec![chunk],
            StreamTransform::ClaudeToChat(state) => match chunk {
                StreamChunk::Claude(event) => state
                    .transform_chunk(event)
                    .into_iter()
                    .map(StreamChunk::OpenAiChat)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::ClaudeToGemini(state) => match chunk {
                StreamChunk::Claude(event) => state
                    .transform_chunk(event)
                    .into_iter()
                    .map(StreamChunk::Gemini)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::ChatToClaude(state) => match chunk {
                StreamChunk::OpenAiChat(inner) => state
                    .transform_chunk(inner)
                    .into_iter()
                    .map(StreamChunk::Claude)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::ChatToGemini(state) => match chunk {
                StreamChunk::OpenAiChat(inner) => state
                    .transform_chunk(inner)
                    .into_iter()
                    .map(StreamChunk::Gemini)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::ChatToResponses(state) => match chunk {
                StreamChunk::OpenAiChat(inner) => state
                    .transform_chunk(inner)
                    .into_iter()
                    .map(StreamChunk::OpenAiResponses)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::GeminiToClaude(state) => match chunk {
                StreamChunk::Gemini(inner) => state
                    .transform_chunk(inner)
                    .into_iter()
                    .map(StreamChunk::Claude)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::GeminiToChat(state) => match chunk {
                StreamChunk::Gemini(inner) => state
                    .transform_chunk(inner)
                    .into_iter()
                    .map(StreamChunk::OpenAiChat)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::ResponsesToChat(state) => match chunk {
                StreamChunk::OpenAiResponses(inner) => state
                    .transform_chunk(inner)
                    .into_iter()
                    .map(StreamChunk::OpenAiChat)
                    .collect(),
                _ => Vec::new(),
            },
            StreamTransform::Composed(first, second) => first
                .transform_chunk(chunk)
                .into_iter()
                .flat_map(|mid| second.transform_chunk(mid))
                .collect(),
        }
    }

    pub fn finish(&mut self) -> Vec<StreamChunk> {
        match self {
            // These upstreams mark their own stream end inline.
            StreamTransform::Identity
            | StreamTransform::ClaudeToChat(_)
            | StreamTransform::ClaudeToGemini(_)
            | StreamTransform::ResponsesToChat(_) => Vec::new(),
            StreamTransform::ChatToClaude(state) => state
                .finish()
                .into_iter()
                .map(StreamChunk::Claude)
                .collect(),
            StreamTransform::ChatToGemini(state) => state
                .finish()
                .into_iter()
                .map(StreamChunk::Gemini)
                .collect(),
            StreamTransform::ChatToResponses(state) => state
                .finish()
                .into_iter()
                .map(StreamChunk::OpenAiResponses)
                .collect(),
            StreamTransform::GeminiToClaude(state) => state
                .finish()
                .into_iter()
                .map(StreamChunk::Claude)
                .collect(),
            StreamTransform::GeminiToChat(state) => state
                .finish()
                .into_iter()
                .map(StreamChunk::OpenAiChat)
                .collect(),
            StreamTransform::Composed(first, second) => {
                let mut out: Vec<StreamChunk> = first
                    .finish()
                    .into_iter()
                    .flat_map(|mid| second.transform_chunk(mid))
                    .collect();
                out.extend(second.finish());
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_model_rewrite_only() {
        let body = RequestBody::Claude(
            serde_json::from_str(r#"{"model":"alias","max_tokens":1,"messages":[]}"#).unwrap(),
        );
        let (out, names) = convert_request(&body, Dialect::Kiro, "claude-sonnet-4-5");
        assert!(names.is_empty());
        let RequestBody::Claude(out) = out else {
            panic!("kiro keeps claude body");
        };
        assert_eq!(out.model, "claude-sonnet-4-5");
    }

    #[test]
    fn pivot_claude_to_responses() {
        let body = RequestBody::Claude(
            serde_json::from_str(
                r#"{"model":"m","max_tokens":5,"system":"s",
                    "messages":[{"role":"user","content":"q"}]}"#,
            )
            .unwrap(),
        );
        let (out, _) = convert_request(&body, Dialect::OpenAiResponses, "gpt-5-codex");
        let RequestBody::OpenAiResponses(out) = out else {
            panic!("expected responses body");
        };
        assert_eq!(out.instructions.as_deref(), Some("s"));
        assert_eq!(out.model, "gpt-5-codex");
    }

    #[test]
    fn composed_stream_responses_to_claude() {
        let mut stream = StreamTransform::new(
            Dialect::OpenAiResponses,
            Dialect::Claude,
            "claude-sonnet-4-5",
            ToolNameMap::new(),
        );
        let created: openai::ResponsesStreamEvent = serde_json::from_value(serde_json::json!({
            "type": "response.created", "response": {"id": "r1"}
        }))
        .unwrap();
        let delta: openai::ResponsesStreamEvent = serde_json::from_value(serde_json::json!({
            "type": "response.output_text.delta", "delta": "hi"
        }))
        .unwrap();
        stream.transform_chunk(StreamChunk::OpenAiResponses(created));
        let events = stream.transform_chunk(StreamChunk::OpenAiResponses(delta));
        assert!(events.iter().any(|chunk| matches!(
            chunk,
            StreamChunk::Claude(claude::StreamEvent::ContentBlockDelta { .. })
        )));
    }
}

use bytes::Bytes;
use switchboard_common::Dialect;
use switchboard_protocol::eventstream::{FrameError, FrameParser};
use switchboard_protocol::sse::{SseParser, encode as encode_sse};
use switchboard_transform::StreamChunk;

use crate::kiro::KiroStream;

/// Decodes one upstream's wire framing into typed stream chunks.
///
/// SSE dialects buffer partial lines, Gemini additionally falls back to
/// newline-delimited JSON, and the Kiro dialect runs the binary frame
/// parser plus the Claude-event adapter.
pub struct StreamDecoder {
    dialect: Dialect,
    sse: SseParser,
    json_buf: String,
    frames: FrameParser,
    kiro: KiroStream,
}

impl StreamDecoder {
    pub fn new(dialect: Dialect, model: &str) -> Self {
        Self {
            dialect,
            sse: SseParser::new(),
            json_buf: String::new(),
            frames: FrameParser::new(),
            kiro: KiroStream::new(model),
        }
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Result<Vec<StreamChunk>, FrameError> {
        let mut out = Vec::new();
        match self.dialect {
            Dialect::Kiro => {
                for frame in self.frames.push_bytes(chunk)? {
                    out.extend(
                        self.kiro
                            .transform_frame(&frame)
                            .into_iter()
                            .map(StreamChunk::Claude),
                    );
                }
            }
            Dialect::Gemini => {
                for event in self.sse.push_bytes(chunk) {
                    if let Some(item) = decode_data(self.dialect, &event.data) {
                        out.push(item);
                    }
                }
                // Some Gemini upstreams emit one JSON object per line
                // instead of SSE framing.
                if let Ok(text) = std::str::from_utf8(chunk) {
                    self.json_buf.push_str(text);
                    while let Some(pos) = self.json_buf.find('\n') {
                        let line = self.json_buf[..pos].trim().to_string();
                        self.json_buf.drain(..=pos);
                        if line.starts_with('{')
                            && let Some(item) = decode_data(self.dialect, &line)
                        {
                            out.push(item);
                        }
                    }
                }
            }
            _ => {
                for event in self.sse.push_bytes(chunk) {
                    if let Some(item) = decode_data(self.dialect, &event.data) {
                        out.push(item);
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn finish(&mut self) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        match self.dialect {
            Dialect::Kiro => {
                out.extend(self.kiro.finish().into_iter().map(StreamChunk::Claude));
            }
            _ => {
                for event in self.sse.finish() {
                    if let Some(item) = decode_data(self.dialect, &event.data) {
                        out.push(item);
                    }
                }
                let line = self.json_buf.trim();
                if self.dialect == Dialect::Gemini
                    && line.starts_with('{')
                    && let Some(item) = decode_data(self.dialect, line)
                {
                    out.push(item);
                }
                self.json_buf.clear();
            }
        }
        out
    }
}

fn decode_data(dialect: Dialect, data: &str) -> Option<StreamChunk> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match dialect {
        Dialect::Claude | Dialect::Kiro => {
            serde_json::from_str(data).ok().map(StreamChunk::Claude)
        }
        Dialect::OpenAiChat => serde_json::from_str(data).ok().map(StreamChunk::OpenAiChat),
        Dialect::OpenAiResponses => serde_json::from_str(data)
            .ok()
            .map(StreamChunk::OpenAiResponses),
        Dialect::Gemini => serde_json::from_str(data).ok().map(StreamChunk::Gemini),
    }
}

/// Encode one converted chunk for the client socket.
pub fn encode_chunk(client: Dialect, chunk: &StreamChunk) -> Option<Bytes> {
    match (client.body_dialect(), chunk) {
        (Dialect::Claude, StreamChunk::Claude(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(Some(event.event_name()), &data))
        }
        (Dialect::OpenAiChat, StreamChunk::OpenAiChat(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(None, &data))
        }
        (Dialect::OpenAiResponses, StreamChunk::OpenAiResponses(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(Some(&event.r#type), &data))
        }
        (Dialect::Gemini, StreamChunk::Gemini(event)) => {
            let data = serde_json::to_string(event).ok()?;
            Some(encode_sse(None, &data))
        }
        _ => None,
    }
}

pub fn encode_done(client: Dialect) -> Option<Bytes> {
    match client.body_dialect() {
        Dialect::OpenAiChat => Some(Bytes::from_static(b"data: [DONE]\n\n")),
        _ => None,
    }
}

pub fn stream_content_type(_client: Dialect) -> &'static str {
    "text/event-stream"
}

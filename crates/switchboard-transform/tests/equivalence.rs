use serde_json::json;
use switchboard_protocol::{claude, gemini, openai};
use switchboard_transform::claude2gemini::{GeminiToClaudeStream, convert_response};
use switchboard_transform::claude2openai_chat::ChatToClaudeStream;
use switchboard_transform::toolnames::ToolNameMap;

fn gemini_chunk(text: &str, finish: Option<&str>) -> gemini::GenerateContentResponse {
    serde_json::from_value(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": finish,
        }],
    }))
    .unwrap()
}

fn claude_text(events: &[claude::StreamEvent]) -> String {
    let mut out = String::new();
    for event in events {
        if let claude::StreamEvent::ContentBlockDelta {
            delta: claude::BlockDelta::TextDelta { text },
            ..
        } = event
        {
            out.push_str(text);
        }
    }
    out
}

/// Streamed conversion and unary conversion of the same upstream content
/// must produce byte-identical text.
#[test]
fn gemini_stream_text_matches_unary_conversion() {
    let pieces = ["The qui", "ck brown ", "fox — ", "done."];

    // Streamed: chunk-at-a-time through the stream state.
    let mut state = GeminiToClaudeStream::new("claude-sonnet-4-5", ToolNameMap::new());
    let mut streamed = Vec::new();
    for (i, piece) in pieces.iter().enumerate() {
        let finish = (i == pieces.len() - 1).then_some("STOP");
        streamed.extend(state.transform_chunk(gemini_chunk(piece, finish)));
    }
    streamed.extend(state.finish());

    // Unary: one aggregated body through the response converter.
    let full: gemini::GenerateContentResponse = serde_json::from_value(json!({
        "candidates": [{
            "content": {"role": "model",
                        "parts": [{"text": pieces.concat()}]},
            "finishReason": "STOP",
        }],
    }))
    .unwrap();
    let unary = convert_response(&full, "claude-sonnet-4-5", &ToolNameMap::new());
    let unary_text: String = unary
        .content
        .iter()
        .filter_map(|block| match block {
            claude::ContentBlock::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(claude_text(&streamed), unary_text);
    assert_eq!(claude_text(&streamed), pieces.concat());
}

#[test]
fn chat_stream_text_matches_unary_conversion() {
    let pieces = ["alpha ", "beta ", "gamma"];

    let mut state = ChatToClaudeStream::new("claude-sonnet-4-5");
    let mut streamed = Vec::new();
    for (i, piece) in pieces.iter().enumerate() {
        let finish = (i == pieces.len() - 1).then_some("stop");
        let chunk: openai::ChatChunk = serde_json::from_value(json!({
            "id": "c1", "object": "chat.completion.chunk", "created": 0, "model": "gpt-x",
            "choices": [{"index": 0, "delta": {"content": piece}, "finish_reason": finish}],
        }))
        .unwrap();
        streamed.extend(state.transform_chunk(chunk));
    }
    streamed.extend(state.finish());

    let full: openai::ChatResponse = serde_json::from_value(json!({
        "id": "c1", "object": "chat.completion", "created": 0, "model": "gpt-x",
        "choices": [{"index": 0,
                     "message": {"role": "assistant", "content": pieces.concat()},
                     "finish_reason": "stop"}],
    }))
    .unwrap();
    let unary =
        switchboard_transform::claude2openai_chat::convert_response(&full, "claude-sonnet-4-5");
    let unary_text: String = unary
        .content
        .iter()
        .filter_map(|block| match block {
            claude::ContentBlock::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    assert_eq!(claude_text(&streamed), unary_text);
}

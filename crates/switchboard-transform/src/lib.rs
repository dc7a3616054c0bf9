//! Pure dialect-to-dialect conversions.
//!
//! Every function here is IO-free: requests and full responses convert
//! value-to-value, streams convert through small state machines fed one
//! upstream chunk at a time. Pair modules are named `<client>2<upstream>`;
//! `request.rs` converts client → upstream, `response.rs`/`stream.rs`
//! convert upstream → client.

pub mod claude2gemini;
pub mod claude2openai_chat;
pub mod gemini2claude;
pub mod gemini2openai_chat;
pub mod openai_chat2claude;
pub mod openai_chat2gemini;
pub mod openai_chat2openai_responses;
pub mod openai_responses2openai_chat;
pub mod route;
pub mod schema;
pub mod toolnames;
pub mod usage;

pub use route::{RequestBody, ResponseBody, StreamChunk, StreamTransform, TransformError};
pub use toolnames::ToolNameMap;
pub use usage::{UsageCounts, redistribute_claude_usage};

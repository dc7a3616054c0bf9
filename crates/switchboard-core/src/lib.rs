//! Request pipeline: auth, credential selection with failover, upstream
//! HTTP, streaming relay and usage accounting.

pub mod auth;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod kiro;
pub mod refresher;
pub mod upstream_client;
pub mod wire;

pub use auth::verify_client_key;
pub use engine::{ProxyCall, ProxyEngine, ProxyReply};
pub use error::{ProxyError, ProxyErrorKind};
pub use upstream_client::{
    UpstreamClient, UpstreamClientConfig, UpstreamRequest, UpstreamResponse, UpstreamResponseBody,
    WreqUpstreamClient,
};

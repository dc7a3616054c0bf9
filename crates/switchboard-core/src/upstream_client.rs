use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Method, Proxy};

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Connect,
    Other,
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: &'static str,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub is_stream: bool,
}

#[derive(Debug)]
pub enum UpstreamResponseBody {
    Bytes(Bytes),
    Stream(tokio::sync::mpsc::Receiver<Bytes>),
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: UpstreamResponseBody,
}

/// The IO seam: pipeline code builds [`UpstreamRequest`] values, one
/// implementation performs the HTTP. Tests substitute scripted mocks.
pub trait UpstreamClient: Send + Sync {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Overall deadline for a streaming request.
    pub stream_timeout: Duration,
    /// Overall deadline for a unary request.
    pub unary_timeout: Duration,
    /// Abort a stream when no bytes arrive for this long.
    pub stream_idle_timeout: Duration,
    pub pool_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            stream_timeout: Duration::from_secs(300),
            unary_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(30),
            pool_idle_per_host: 5,
            pool_idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Process-wide keep-alive pooled HTTP client over wreq.
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, wreq::Error> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.stream_idle_timeout)
            .pool_max_idle_per_host(config.pool_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout);

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            builder = builder.proxy(Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        req: UpstreamRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamResponse, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let method = match req.method {
                "GET" => Method::GET,
                "PUT" => Method::PUT,
                "DELETE" => Method::DELETE,
                _ => Method::POST,
            };
            let deadline = if req.is_stream {
                self.config.stream_timeout
            } else {
                self.config.unary_timeout
            };

            let mut builder = self.client.request(method, &req.url).timeout(deadline);
            for (name, value) in &req.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(map_wreq_error)?;
            convert_response(resp, req.is_stream, self.config.stream_idle_timeout).await
        })
    }
}

async fn convert_response(
    resp: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> Result<UpstreamResponse, TransportError> {
    let status = resp.status().as_u16();
    let headers = headers_from_wreq(resp.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = resp.bytes().await.map_err(map_wreq_error)?;
        return Ok(UpstreamResponse {
            status,
            headers,
            body: UpstreamResponseBody::Bytes(body),
        });
    }

    // Hand the body off through a small channel; the watchdog ends a
    // stream whose upstream has gone quiet.
    let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
    tokio::spawn(async move {
        let mut stream = resp.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let Ok(item) = next else {
                break;
            };
            let Some(Ok(chunk)) = item else {
                break;
            };
            if tx.send(chunk).await.is_err() {
                // Receiver gone: client disconnected, stop reading.
                break;
            }
        }
    });

    Ok(UpstreamResponse {
        status,
        headers,
        body: UpstreamResponseBody::Stream(rx),
    })
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}

fn map_wreq_error(err: wreq::Error) -> TransportError {
    let message = err.to_string();
    let kind = if err.is_timeout() {
        if message.to_ascii_lowercase().contains("read") {
            TransportErrorKind::ReadTimeout
        } else {
            TransportErrorKind::Timeout
        }
    } else if err.is_connect() || err.is_connection_reset() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError { kind, message }
}

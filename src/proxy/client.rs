//! Outbound HTTP through an upstream proxy
//!
//! Every exchange resolves to exactly one [`Outcome`]: the forwarded response, a
//! fault attributable to the proxy, or a fault in the caller's request.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HOST, VIA};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::proxy::outcome::{Outcome, ProxyFault};

/// A request to replay through a proxy
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Absolute target URL, taken verbatim from the caller
    pub target_url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    pub fn get(target_url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            target_url: target_url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Response received through a proxy
#[derive(Debug, Clone)]
pub struct Forwarded {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// HTTP-over-proxy transport used by health checks and dispatch
#[async_trait]
pub trait ProbeClient: Send + Sync {
    /// Fetch `endpoint` through the proxy and verify the response. Succeeds with the round-trip time.
    async fn probe(&self, address: &str, endpoint: &str) -> Outcome<Duration>;

    /// Replay a caller's request through the proxy
    async fn forward(&self, address: &str, request: &ForwardRequest) -> Outcome<Forwarded>;
}

/// Validate a caller-supplied target. Only plain `http` with a host is forwardable.
pub fn parse_target(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid target URL {raw:?}: {e}"))?;

    if url.scheme() != "http" {
        return Err(format!("unsupported scheme: {}", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("target URL has no host: {raw}"));
    }

    Ok(url)
}

#[derive(Deserialize)]
struct FactPayload {
    fact: String,
    length: usize,
}

/// Structural check of the health endpoint's response: `length` must equal the
/// number of characters in `fact`.
pub fn verify_payload(body: &[u8]) -> std::result::Result<(), String> {
    let payload: FactPayload =
        serde_json::from_slice(body).map_err(|e| format!("unexpected payload: {e}"))?;

    let counted = payload.fact.chars().count();
    if counted != payload.length {
        return Err(format!(
            "declared length {} but fact has {} characters",
            payload.length, counted
        ));
    }

    Ok(())
}

/// The `Via` header a proxy adds when it announces itself to the destination
pub fn transparency_leak(headers: &HeaderMap) -> Option<String> {
    headers.get(VIA).map(|value| {
        format!("Via: {}", String::from_utf8_lossy(value.as_bytes()))
    })
}

/// Check if a header is a hop-by-hop header that should not be forwarded
pub(crate) fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn host_header(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default();
    match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Build the absolute-form request sent to the proxy
fn build_request(
    target: &Url,
    request: &ForwardRequest,
) -> std::result::Result<Request<Full<Bytes>>, String> {
    let mut builder = Request::builder()
        .method(request.method.clone())
        .uri(target.as_str());

    for (name, value) in &request.headers {
        if name != HOST && !is_hop_by_hop_header(name.as_str()) {
            builder = builder.header(name, value);
        }
    }

    builder
        .header(HOST, host_header(target))
        .body(Full::new(request.body.clone()))
        .map_err(|e| format!("invalid request: {e}"))
}

/// hyper HTTP/1.1 client speaking to the proxy over a plain TCP connection
#[derive(Debug, Clone)]
pub struct HttpProbeClient {
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Default for HttpProbeClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(10))
    }
}

impl HttpProbeClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    async fn send(
        &self,
        address: &str,
        request: Request<Full<Bytes>>,
    ) -> std::result::Result<Forwarded, ProxyFault> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ProxyFault::Unreachable("connect timed out".to_string()))?
            .map_err(|e| ProxyFault::Unreachable(format!("connect failed: {e}")))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| ProxyFault::Unreachable(format!("handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Proxy connection ended: {}", e);
            }
        });

        let exchange = async {
            let response = sender
                .send_request(request)
                .await
                .map_err(|e| ProxyFault::Unreachable(format!("request failed: {e}")))?;

            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| ProxyFault::Unreachable(format!("failed to read response: {e}")))?
                .to_bytes();

            Ok::<_, ProxyFault>(Forwarded {
                status: parts.status,
                headers: parts.headers,
                body,
            })
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ProxyFault::Unreachable("request timed out".to_string()))?
    }
}

#[async_trait]
impl ProbeClient for HttpProbeClient {
    async fn probe(&self, address: &str, endpoint: &str) -> Outcome<Duration> {
        let started = Instant::now();

        let forwarded = match self.forward(address, &ForwardRequest::get(endpoint)).await {
            Outcome::Success(forwarded) => forwarded,
            Outcome::ProxyFault(fault) => return Outcome::ProxyFault(fault),
            Outcome::CallerFault(message) => return Outcome::CallerFault(message),
        };
        let latency = started.elapsed();

        if let Err(reason) = verify_payload(&forwarded.body) {
            return Outcome::ProxyFault(ProxyFault::InvalidData(reason));
        }
        if let Some(leak) = transparency_leak(&forwarded.headers) {
            return Outcome::ProxyFault(ProxyFault::Transparent(leak));
        }

        Outcome::Success(latency)
    }

    async fn forward(&self, address: &str, request: &ForwardRequest) -> Outcome<Forwarded> {
        let target = match parse_target(&request.target_url) {
            Ok(target) => target,
            Err(message) => return Outcome::CallerFault(message),
        };
        let request = match build_request(&target, request) {
            Ok(request) => request,
            Err(message) => return Outcome::CallerFault(message),
        };

        match self.send(address, request).await {
            Ok(forwarded) => Outcome::Success(forwarded),
            Err(fault) => Outcome::ProxyFault(fault),
        }
    }
}

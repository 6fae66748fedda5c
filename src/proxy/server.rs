//! Inbound forward-proxy listener using hyper
//!
//! Each request's absolute-form URI is handed to the dispatcher as the target.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, instrument, Instrument};
use uuid::Uuid;

use crate::error::{Result, RotorError};
use crate::proxy::client::{is_hop_by_hop_header, ForwardRequest, Forwarded};
use crate::proxy::dispatcher::Dispatcher;

const EXHAUSTED_MESSAGE: &str = "No proxies available, retry later";

/// Proxy server
pub struct ProxyServer {
    addr: String,
    dispatcher: Arc<Dispatcher>,
}

impl ProxyServer {
    pub fn new(addr: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            addr: addr.into(),
            dispatcher,
        }
    }

    /// Bind the configured address and serve until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = self.addr.parse().map_err(|_| {
            RotorError::InvalidConfig(format!("Invalid proxy server address: {}", self.addr))
        })?;

        let listener = TcpListener::bind(addr).await?;
        info!("Proxy server listening on {}", addr);

        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            let dispatcher = self.dispatcher.clone();

                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, client_addr, dispatcher).await {
                                    debug!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Proxy server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Handle a single connection
    async fn handle_connection(
        stream: tokio::net::TcpStream,
        client_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
    ) -> std::result::Result<(), hyper::Error> {
        let io = TokioIo::new(stream);

        let service = service_fn(move |req: Request<Incoming>| {
            let dispatcher = dispatcher.clone();
            let span = info_span!(
                "request",
                request_id = %Uuid::new_v4(),
                client = %client_addr,
                method = %req.method(),
                uri = %req.uri(),
            );

            async move { Ok::<_, Infallible>(handle_request(&dispatcher, req).await) }
                .instrument(span)
        });

        http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .await
    }
}

async fn handle_request(dispatcher: &Dispatcher, req: Request<Incoming>) -> Response<Full<Bytes>> {
    if req.method() == Method::CONNECT {
        return error_response(&RotorError::CallerRequest(
            "CONNECT tunnelling is not supported".to_string(),
        ));
    }

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(&RotorError::CallerRequest(format!(
                "Failed to read body: {e}"
            )))
        }
    };

    let request = ForwardRequest {
        method: parts.method,
        target_url: parts.uri.to_string(),
        headers: parts.headers,
        body,
    };

    match dispatcher.dispatch(&request).await {
        Ok(forwarded) => {
            debug!(status = forwarded.status.as_u16(), "Request forwarded");
            forwarded_response(forwarded)
        }
        Err(e) => error_response(&e),
    }
}

fn forwarded_response(forwarded: Forwarded) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(forwarded.body));
    *response.status_mut() = forwarded.status;

    for (name, value) in &forwarded.headers {
        if !is_hop_by_hop_header(name.as_str()) {
            response.headers_mut().append(name.clone(), value.clone());
        }
    }

    response
}

/// Map a dispatch failure onto what the caller sees. Proxy transport errors
/// never reach here; they are absorbed by failover.
fn error_response(err: &RotorError) -> Response<Full<Bytes>> {
    let (status, message) = match err {
        RotorError::CallerRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
        RotorError::NoProxiesAvailable => {
            (StatusCode::SERVICE_UNAVAILABLE, EXHAUSTED_MESSAGE.to_string())
        }
        other => {
            error!("Request handling error: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal proxy error".to_string(),
            )
        }
    };

    let mut response = Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::context::PoolContext;
    use crate::proxy::dispatcher::DispatcherConfig;
    use crate::proxy::testing::{seed_working, ScriptedClient};
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Serve on an ephemeral port. Returns the address and the shutdown sender.
    async fn start(client: Arc<ScriptedClient>, proxies: &[&str]) -> (SocketAddr, watch::Sender<bool>) {
        let context = PoolContext::in_memory();
        for address in proxies {
            seed_working(&context, address, 0.5, Utc::now()).await;
        }
        let dispatcher = Arc::new(Dispatcher::new(context, client, DispatcherConfig::default()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = ProxyServer::new(addr.to_string(), dispatcher);
        tokio::spawn(async move { server.serve(listener, rx).await });

        (addr, tx)
    }

    async fn exchange(addr: SocketAddr, head: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(head.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_forwards_through_pool() {
        let client = Arc::new(ScriptedClient::new());
        client.healthy("1.1.1.1:80", 100);
        let (addr, _tx) = start(client, &["1.1.1.1:80"]).await;

        let response = exchange(
            addr,
            "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("ok from 1.1.1.1:80"));
    }

    #[tokio::test]
    async fn test_exhausted_pool_is_503() {
        let (addr, _tx) = start(Arc::new(ScriptedClient::new()), &[]).await;

        let response = exchange(
            addr,
            "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"));
        assert!(response.ends_with(EXHAUSTED_MESSAGE));
    }

    #[tokio::test]
    async fn test_caller_error_is_verbatim() {
        let (addr, _tx) = start(Arc::new(ScriptedClient::new()), &["1.1.1.1:80"]).await;

        let response = exchange(
            addr,
            "GET ftp://example.com/file HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("unsupported scheme: ftp"));
    }

    #[tokio::test]
    async fn test_connect_is_rejected() {
        let (addr, _tx) = start(Arc::new(ScriptedClient::new()), &["1.1.1.1:80"]).await;

        let response = exchange(
            addr,
            "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with("CONNECT tunnelling is not supported"));
    }

    #[test]
    fn test_transport_errors_are_never_echoed() {
        let response = error_response(&RotorError::InvalidProxy("connection refused".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

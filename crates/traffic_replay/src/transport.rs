//! Transport layer abstraction for replayed requests.

use crate::error::{ReplayError, ReplayResult};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use traffic_codec::{Headers, Protocol};

/// A response that is still on its way.
///
/// Returned once the request has been fully written, so the caller can move
/// on to the next record and await the response elsewhere.
pub type InFlight = Pin<Box<dyn Future<Output = ReplayResult<ReplayResponse>> + Send>>;

/// Sends replayed requests to the target.
///
/// This trait abstracts the network layer so the engine can be driven
/// against real sockets or a scripted mock.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes `request` and returns once it is flushed.
    ///
    /// Errors returned here mean nothing (or not everything) was sent.
    /// Errors while reading the response come out of the [`InFlight`].
    async fn send(&self, request: OutboundRequest) -> ReplayResult<InFlight>;
}

/// A request ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Scheme to use.
    pub protocol: Protocol,
    /// Target host.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// HTTP method.
    pub method: String,
    /// Request target.
    pub path: String,
    /// Headers in send order.
    pub headers: Headers,
    /// Request body.
    pub body: Bytes,
}

impl OutboundRequest {
    /// Request line plus headers, terminated by the blank line.
    pub fn encode_head(&self) -> Vec<u8> {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, path);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    /// `host:port` of the target.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A response read back from the target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplayResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Response headers in received order.
    pub headers: Headers,
    /// Response body.
    pub body: Bytes,
}

impl ReplayResponse {
    /// Creates a response with no headers or body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true if the body is JSON, HTML or plain text.
    pub fn is_textual(&self) -> bool {
        self.headers.get("content-type").is_some_and(|ct| {
            let ct = ct.to_ascii_lowercase();
            ["application/json", "text/html", "text/plain"]
                .iter()
                .any(|t| ct.starts_with(t))
        })
    }
}

type Responder = dyn Fn(&OutboundRequest) -> ReplayResult<ReplayResponse> + Send + Sync;

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentRequest {
    /// The request as it would have gone on the wire.
    pub request: OutboundRequest,
    /// When the send completed.
    pub sent_at: Instant,
}

/// A mock transport for testing.
///
/// Records every request and answers from a responder closure. By default
/// every request gets an empty `200 OK`.
pub struct MockTransport {
    sent: Mutex<Vec<SentRequest>>,
    responder: Box<Responder>,
    response_delay: Duration,
    refuse: bool,
}

impl MockTransport {
    /// Creates a mock answering `200 OK` to everything.
    pub fn new() -> Self {
        Self::with_responder(|_| Ok(ReplayResponse::new(200)))
    }

    /// Creates a mock answering with `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&OutboundRequest) -> ReplayResult<ReplayResponse> + Send + Sync + 'static,
    {
        Self {
            sent: Mutex::new(Vec::new()),
            responder: Box::new(responder),
            response_delay: Duration::ZERO,
            refuse: false,
        }
    }

    /// Creates a mock whose sends all fail as if the connection was refused.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::new()
        }
    }

    /// Delays every response by `delay` after the send completes.
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Requests sent so far, in send order.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    /// Number of requests sent so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: OutboundRequest) -> ReplayResult<InFlight> {
        if self.refuse {
            return Err(ReplayError::transport(format!(
                "connection refused: {}",
                request.authority()
            )));
        }
        let response = (self.responder)(&request);
        self.sent.lock().push(SentRequest {
            request,
            sent_at: Instant::now(),
        });

        let delay = self.response_delay;
        Ok(Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            response
        }))
    }
}

/// Shared transports forward to the inner one.
#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    async fn send(&self, request: OutboundRequest) -> ReplayResult<InFlight> {
        (**self).send(request).await
    }
}

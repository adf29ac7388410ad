//! Turns records into outbound requests and tracks their responses.

use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::report::ReplayStats;
use crate::session::SessionMutator;
use crate::transport::{InFlight, OutboundRequest, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use traffic_codec::{Headers, LogRecord, Protocol};

/// Identity of one replayed request, carried into its response handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Per-run id, starting at 1.
    pub request_id: u64,
    /// Line of the record's header in the log.
    pub line_number: u64,
    /// HTTP method.
    pub method: String,
    /// Request target.
    pub path: String,
    /// When the request was handed to the transport.
    pub sent_at: Instant,
}

/// Sends records to the target one at a time.
///
/// A dispatch returns as soon as the request is written; the response is
/// awaited in a spawned task so slow responses do not hold up the schedule.
pub struct Dispatcher<T: Transport> {
    host: String,
    port: u16,
    debug: bool,
    response_timeout: Duration,
    transport: Arc<T>,
    session: Option<Arc<SessionMutator>>,
    stats: Arc<ReplayStats>,
    next_request_id: u64,
    in_flight: JoinSet<()>,
}

impl<T: Transport> Dispatcher<T> {
    /// Creates a dispatcher for the target in `config`.
    pub fn new(
        config: &ReplayConfig,
        transport: Arc<T>,
        session: Option<Arc<SessionMutator>>,
        stats: Arc<ReplayStats>,
    ) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            debug: config.debug,
            response_timeout: config.response_timeout,
            transport,
            session,
            stats,
            next_request_id: 0,
            in_flight: JoinSet::new(),
        }
    }

    /// Number of response handlers still running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Builds the request that replays `record`.
    ///
    /// Headers are copied in order, then the session cookie is translated,
    /// `content-length` is set to the real body length, `transfer-encoding`
    /// is dropped, `connection` is forced to `close` and a `host` header is
    /// added if the record has none.
    pub fn build_request(&self, record: &LogRecord) -> OutboundRequest {
        let mut headers = record.headers.clone();
        if let Some(session) = &self.session {
            session.translate(&record.headers, &mut headers);
        }

        if record.has_body() || headers.contains("content-length") {
            headers.set("content-length", record.body.len().to_string());
        }
        headers.remove("transfer-encoding");
        headers.set("connection", "close");
        if !headers.contains("host") {
            headers.append("host", host_header(&self.host, self.port, record.protocol));
        }

        OutboundRequest {
            protocol: record.protocol,
            host: self.host.clone(),
            port: self.port,
            method: record.method.clone(),
            path: record.path.clone(),
            headers,
            body: record.body.clone(),
        }
    }

    /// Sends `record` and waits until the request has been written.
    ///
    /// Failures are reported as request diagnostics and never returned.
    pub async fn dispatch(&mut self, record: LogRecord) {
        self.next_request_id += 1;
        let ctx = RequestContext {
            request_id: self.next_request_id,
            line_number: record.line(),
            method: record.method.clone(),
            path: record.path.clone(),
            sent_at: Instant::now(),
        };

        let request = self.build_request(&record);
        info!(
            request_id = ctx.request_id,
            line_number = ctx.line_number,
            method = %ctx.method,
            path = %ctx.path,
            protocol = %record.protocol,
            "playing back request"
        );
        if self.debug {
            debug!(request_id = ctx.request_id, headers = ?request.headers, "request headers");
        }
        self.stats.record_dispatched();

        match self.transport.send(request).await {
            Ok(response) => {
                let handler = ResponseHandler {
                    ctx,
                    original: self.session.as_ref().map(|_| record.headers),
                    session: self.session.clone(),
                    stats: Arc::clone(&self.stats),
                    timeout: self.response_timeout,
                    debug: self.debug,
                };
                self.in_flight.spawn(handler.run(response));
            }
            Err(err) => {
                self.stats
                    .request_error(ctx.request_id, ctx.line_number, err.to_string());
            }
        }
        self.reap();
    }

    /// Collects handlers that have already finished.
    fn reap(&mut self) {
        while let Some(result) = self.in_flight.try_join_next() {
            if let Err(err) = result {
                warn!(error = %err, "response handler failed");
            }
        }
    }

    /// Waits for every outstanding response handler.
    pub async fn finish(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            if let Err(err) = result {
                warn!(error = %err, "response handler failed");
            }
        }
    }
}

fn host_header(host: &str, port: u16, protocol: Protocol) -> String {
    let default_port = match protocol {
        Protocol::Http => 80,
        Protocol::Https => 443,
    };
    if port == default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

struct ResponseHandler {
    ctx: RequestContext,
    /// Recorded headers, kept only when sessions are translated.
    original: Option<Headers>,
    session: Option<Arc<SessionMutator>>,
    stats: Arc<ReplayStats>,
    timeout: Duration,
    debug: bool,
}

impl ResponseHandler {
    async fn run(self, response: InFlight) {
        let ctx = &self.ctx;
        let response = match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                self.stats
                    .request_error(ctx.request_id, ctx.line_number, err.to_string());
                return;
            }
            Err(_) => {
                let err = ReplayError::Timeout(self.timeout);
                self.stats
                    .request_error(ctx.request_id, ctx.line_number, err.to_string());
                return;
            }
        };

        self.stats.record_response();
        debug!(
            request_id = ctx.request_id,
            line_number = ctx.line_number,
            status = response.status,
            elapsed_ms = ctx.sent_at.elapsed().as_millis() as u64,
            "response received"
        );

        if let (Some(session), Some(original)) = (&self.session, &self.original) {
            if session.capture(original, &response.headers).is_some() {
                self.stats.record_session_captured();
            }
        }

        if self.debug && response.is_textual() {
            debug!(
                request_id = ctx.request_id,
                body = %String::from_utf8_lossy(&response.body),
                "response body"
            );
        }

        if !response.is_success() {
            let err = ReplayError::Status {
                status: response.status,
            };
            self.stats
                .request_error(ctx.request_id, ctx.line_number, err.to_string());
        }
    }
}

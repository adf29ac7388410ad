//! A scriptable HTTP target for end-to-end replay tests.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use traffic_codec::Headers;

/// A request as received by [`TargetServer`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// HTTP method.
    pub method: String,
    /// Request target.
    pub path: String,
    /// Headers in received order.
    pub headers: Headers,
    /// Request body.
    pub body: Bytes,
    /// When the request was fully read.
    pub received_at: Instant,
}

/// A canned response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    /// Status code.
    pub status: u16,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ScriptedResponse {
    /// An empty `200 OK`.
    pub fn ok() -> Self {
        Self::status(200)
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} Scripted\r\n", self.status);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!("content-length: {}\r\nconnection: close\r\n\r\n", self.body.len()));
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

type Responder = dyn Fn(&CapturedRequest) -> ScriptedResponse + Send + Sync;

/// A local HTTP/1.1 server that records every request it receives.
///
/// Connections are served one at a time in accept order, so the recorded
/// order matches the order the client connected in.
pub struct TargetServer {
    port: u16,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    received: Arc<Notify>,
    task: JoinHandle<()>,
}

impl TargetServer {
    /// Starts a server answering `200 OK` to everything.
    pub async fn start() -> Self {
        Self::start_with(|_| ScriptedResponse::ok()).await
    }

    /// Starts a server answering with `responder`.
    pub async fn start_with<F>(responder: F) -> Self
    where
        F: Fn(&CapturedRequest) -> ScriptedResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind target server");
        let port = listener.local_addr().expect("Failed to read local address").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let received = Arc::new(Notify::new());
        let responder: Arc<Responder> = Arc::new(responder);

        let task = {
            let requests = Arc::clone(&requests);
            let received = Arc::clone(&received);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    if let Some(request) = serve(stream, responder.as_ref()).await {
                        requests.lock().push(request);
                        received.notify_waiters();
                    }
                }
            })
        };

        Self {
            port,
            requests,
            received,
            task,
        }
    }

    /// Port the server listens on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().clone()
    }

    /// Waits until at least `count` requests have arrived.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within `timeout`.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<CapturedRequest> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.received.notified();
            let requests = self.requests();
            if requests.len() >= count {
                return requests;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!(
                    "expected {count} requests within {timeout:?}, got {}",
                    self.requests().len()
                );
            }
        }
    }
}

impl Drop for TargetServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, responder: &Responder) -> Option<CapturedRequest> {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line).await.ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Headers::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.append(name.trim(), value.trim());
    }

    let length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    let request = CapturedRequest {
        method,
        path,
        headers,
        body: body.into(),
        received_at: Instant::now(),
    };
    let response = responder(&request);
    let mut stream = reader.into_inner();
    // The client may already have given up; the request still counts.
    let _ = stream.write_all(&response.encode()).await;
    let _ = stream.shutdown().await;
    Some(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_requests_and_answers() {
        let server = TargetServer::start_with(|req| {
            ScriptedResponse::status(201)
                .with_header("set-cookie", "sid=NEW")
                .with_body(format!("saw {}", req.path))
        })
        .await;

        let mut stream = TcpStream::connect(("127.0.0.1", server.port())).await.unwrap();
        stream
            .write_all(b"POST /items HTTP/1.1\r\nhost: test\r\ncontent-length: 2\r\n\r\nhi")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 201"));
        assert!(response.contains("set-cookie: sid=NEW\r\n"));
        assert!(response.ends_with("saw /items"));

        let requests = server.wait_for_requests(1, Duration::from_secs(5)).await;
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].headers.get("host"), Some("test"));
        assert_eq!(&requests[0].body[..], b"hi");
    }
}

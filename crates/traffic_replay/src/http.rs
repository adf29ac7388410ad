//! HTTP/1.1 transport over TCP and TLS.
//!
//! Every request uses its own connection and is sent with
//! `connection: close`, so the response body may be delimited by EOF.

use crate::error::{ReplayError, ReplayResult};
use crate::tls;
use crate::transport::{InFlight, OutboundRequest, ReplayResponse, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::debug;
use traffic_codec::{Headers, Protocol};

/// Longest status or header line accepted from the target.
const MAX_LINE: usize = 16 * 1024;

/// Largest response body accepted from the target.
const MAX_BODY: usize = 64 * 1024 * 1024;

/// Sends requests over real sockets.
pub struct TcpTransport {
    connect_timeout: Duration,
    send_timeout: Duration,
    tls: TlsConnector,
}

impl TcpTransport {
    /// Creates a transport that gives up on connecting after `connect_timeout`.
    ///
    /// Writing the request is bounded by the same duration until
    /// [`with_send_timeout`](Self::with_send_timeout) says otherwise.
    pub fn new(connect_timeout: Duration) -> ReplayResult<Self> {
        Ok(Self {
            connect_timeout,
            send_timeout: connect_timeout,
            tls: tls::insecure_connector()?,
        })
    }

    /// Sets how long writing a request may take once connected.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    async fn connect(&self, authority: &str) -> ReplayResult<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(authority))
            .await
            .map_err(|_| ReplayError::Timeout(self.connect_timeout))?
            .map_err(|e| ReplayError::transport(format!("connect to {authority}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable nagle");
        }
        Ok(stream)
    }

    async fn write<W>(&self, stream: &mut W, request: &OutboundRequest) -> ReplayResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        timeout(self.send_timeout, write_request(stream, request))
            .await
            .map_err(|_| ReplayError::Timeout(self.send_timeout))?
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, request: OutboundRequest) -> ReplayResult<InFlight> {
        let authority = request.authority();
        let stream = self.connect(&authority).await?;
        let head_only = request.method.eq_ignore_ascii_case("HEAD");

        match request.protocol {
            Protocol::Http => {
                let mut stream = stream;
                self.write(&mut stream, &request).await?;
                Ok(Box::pin(read_response(BufReader::new(stream), head_only)))
            }
            Protocol::Https => {
                debug!(target = %authority, "replaying https record over TLS");
                let name = tls::server_name(&request.host)?;
                let mut stream = timeout(self.connect_timeout, self.tls.connect(name, stream))
                    .await
                    .map_err(|_| ReplayError::Timeout(self.connect_timeout))?
                    .map_err(|e| ReplayError::Tls(format!("handshake with {authority}: {e}")))?;
                self.write(&mut stream, &request).await?;
                Ok(Box::pin(read_response(BufReader::new(stream), head_only)))
            }
        }
    }
}

async fn write_request<W>(stream: &mut W, request: &OutboundRequest) -> ReplayResult<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&request.encode_head()).await?;
    if !request.body.is_empty() {
        stream.write_all(&request.body).await?;
    }
    stream.flush().await?;
    Ok(())
}

/// Reads one HTTP/1.x response, skipping interim 1xx responses.
pub(crate) async fn read_response<R>(mut reader: R, head_only: bool) -> ReplayResult<ReplayResponse>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (status, reason) = read_status_line(&mut reader).await?;
        let headers = read_headers(&mut reader).await?;
        if (100..200).contains(&status) {
            continue;
        }

        let body = if head_only || status == 204 || status == 304 {
            Bytes::new()
        } else {
            read_body(&mut reader, &headers).await?
        };
        return Ok(ReplayResponse {
            status,
            reason,
            headers,
            body,
        });
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> ReplayResult<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        return Err(ReplayError::MalformedResponse("line too long or unterminated".into()));
    }
    let line = String::from_utf8(buf)
        .map_err(|_| ReplayError::MalformedResponse("non UTF-8 header line".into()))?;
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn read_status_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> ReplayResult<(u16, String)> {
    let line = read_line(reader)
        .await?
        .ok_or_else(|| ReplayError::MalformedResponse("connection closed before status line".into()))?;

    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(ReplayError::MalformedResponse(format!("bad status line {line:?}")));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|s| (100..1000).contains(s))
        .ok_or_else(|| ReplayError::MalformedResponse(format!("bad status code in {line:?}")))?;
    let reason = parts.next().unwrap_or_default().to_string();
    Ok((status, reason))
}

async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> ReplayResult<Headers> {
    let mut headers = Headers::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| ReplayError::MalformedResponse("connection closed inside headers".into()))?;
        if line.is_empty() {
            return Ok(headers);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ReplayError::MalformedResponse(format!("bad header line {line:?}")))?;
        headers.append(name.trim(), value.trim());
    }
}

async fn read_body<R: AsyncBufRead + Unpin>(reader: &mut R, headers: &Headers) -> ReplayResult<Bytes> {
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return read_chunked(reader).await;
    }

    if let Some(length) = headers.get("content-length") {
        let length: usize = length
            .trim()
            .parse()
            .map_err(|_| ReplayError::MalformedResponse(format!("bad content-length {length:?}")))?;
        if length > MAX_BODY {
            return Err(body_too_large());
        }
        let mut body = Vec::with_capacity(length);
        read_exactly(reader, &mut body, length).await?;
        return Ok(body.into());
    }

    let mut body = Vec::new();
    let read = (&mut *reader)
        .take(MAX_BODY as u64 + 1)
        .read_to_end(&mut body)
        .await?;
    if read > MAX_BODY {
        return Err(body_too_large());
    }
    Ok(body.into())
}

fn body_too_large() -> ReplayError {
    ReplayError::MalformedResponse(format!("response body exceeds {MAX_BODY} bytes"))
}

/// Appends exactly `length` bytes from `reader` to `body`.
async fn read_exactly<R>(reader: &mut R, body: &mut Vec<u8>, length: usize) -> ReplayResult<()>
where
    R: AsyncBufRead + Unpin,
{
    let read = (&mut *reader)
        .take(length as u64)
        .read_to_end(body)
        .await?;
    if read < length {
        return Err(ReplayError::transport(format!(
            "connection closed after {read} of {length} body bytes"
        )));
    }
    Ok(())
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> ReplayResult<Bytes> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| ReplayError::MalformedResponse("connection closed inside chunked body".into()))?;
        let size = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size, 16)
            .map_err(|_| ReplayError::MalformedResponse(format!("bad chunk size {line:?}")))?;
        if size == 0 {
            // Trailers, up to the blank line.
            while let Some(trailer) = read_line(reader).await? {
                if trailer.is_empty() {
                    break;
                }
            }
            return Ok(body.into());
        }

        let total = body.len().checked_add(size).ok_or_else(body_too_large)?;
        if total > MAX_BODY {
            return Err(body_too_large());
        }
        read_exactly(reader, &mut body, size).await?;
        read_line(reader).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nSet-Cookie: sid=NEW\r\nContent-Length: 5\r\n\r\nhello extra";
        let response = read_response(&raw[..], false).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.headers.get("set-cookie"), Some("sid=NEW"));
        assert_eq!(&response.body[..], b"hello");
    }

    #[tokio::test]
    async fn interim_responses_are_skipped() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 201 Created\r\ncontent-length: 0\r\n\r\n";
        let response = read_response(&raw[..], false).await.unwrap();
        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn chunked_and_eof_bodies() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\n";
        let response = read_response(&raw[..], false).await.unwrap();
        assert_eq!(&response.body[..], b"Wikipedia");

        let raw = b"HTTP/1.0 500 Internal Server Error\r\n\r\nboom";
        let response = read_response(&raw[..], false).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.reason, "Internal Server Error");
        assert_eq!(&response.body[..], b"boom");
    }

    #[tokio::test]
    async fn head_responses_have_no_body() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n";
        let response = read_response(&raw[..], true).await.unwrap();
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn malformed_responses() {
        let cases: [&[u8]; 4] = [
            b"",
            b"SSH-2.0-OpenSSH\r\n",
            b"HTTP/1.1 abc OK\r\n\r\n",
            b"HTTP/1.1 200 OK\r\nno-colon\r\n\r\n",
        ];
        for raw in cases {
            let err = read_response(raw, false).await.unwrap_err();
            assert!(matches!(err, ReplayError::MalformedResponse(_)), "{raw:?}: {err}");
        }
    }

    #[tokio::test]
    async fn plain_http_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                head.push_str(&line);
                if line == "\r\n" {
                    break;
                }
            }
            let mut body = [0u8; 2];
            reader.read_exact(&mut body).await.unwrap();
            reader
                .get_mut()
                .write_all(b"HTTP/1.1 202 Accepted\r\ncontent-length: 2\r\n\r\nok")
                .await
                .unwrap();
            (head, body)
        });

        let transport = TcpTransport::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest {
            protocol: Protocol::Http,
            host: "127.0.0.1".into(),
            port,
            method: "PUT".into(),
            path: "/items/1".into(),
            headers: [("host", "127.0.0.1"), ("content-length", "2")].into_iter().collect(),
            body: Bytes::from_static(b"{}"),
        };
        let response = transport.send(request).await.unwrap().await.unwrap();
        assert_eq!(response.status, 202);
        assert_eq!(&response.body[..], b"ok");

        let (head, body) = server.await.unwrap();
        assert!(head.starts_with("PUT /items/1 HTTP/1.1\r\n"));
        assert!(head.contains("content-length: 2\r\n"));
        assert_eq!(&body, b"{}");
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let cases: [&[u8]; 3] = [
            b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nhi",
            b"HTTP/1.1 200 OK\r\nContent-Length: 107374182400\r\n\r\nhi",
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nhi\r\n",
        ];
        for raw in cases {
            let err = read_response(raw, false).await.unwrap_err();
            assert!(matches!(err, ReplayError::MalformedResponse(_)), "{raw:?}: {err}");
        }
    }

    #[tokio::test]
    async fn short_body_is_a_transport_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhi";
        let err = read_response(&raw[..], false).await.unwrap_err();
        assert!(matches!(err, ReplayError::Transport(_)), "{err}");
    }

    #[tokio::test]
    async fn stalled_target_times_out_the_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept, then never read.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let transport = TcpTransport::new(Duration::from_secs(5))
            .unwrap()
            .with_send_timeout(Duration::from_millis(200));
        let request = OutboundRequest {
            protocol: Protocol::Http,
            host: "127.0.0.1".into(),
            port,
            method: "POST".into(),
            path: "/upload".into(),
            headers: Headers::new(),
            body: Bytes::from(vec![b'x'; 64 * 1024 * 1024]),
        };

        let sent = tokio::time::timeout(Duration::from_secs(5), transport.send(request)).await;
        server.abort();
        match sent {
            Ok(Err(ReplayError::Timeout(limit))) => assert_eq!(limit, Duration::from_millis(200)),
            Ok(Err(other)) => panic!("expected a timeout, got {other}"),
            Ok(Ok(_)) => panic!("write to a stalled target should not complete"),
            Err(_) => panic!("send was not bounded by its timeout"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(Duration::from_secs(5)).unwrap();
        let request = OutboundRequest {
            protocol: Protocol::Http,
            host: "127.0.0.1".into(),
            port,
            method: "GET".into(),
            path: "/".into(),
            headers: Headers::new(),
            body: Bytes::new(),
        };
        let err = match transport.send(request).await {
            Err(err) => err,
            Ok(_) => panic!("connect should fail"),
        };
        assert!(matches!(err, ReplayError::Transport(_)));
    }
}

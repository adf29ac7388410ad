//! Log record types.

use crate::headers::Headers;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme a request was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// Returns the lowercase scheme name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One captured HTTP request plus its capture-time metadata.
///
/// The body is never part of the JSON header line; it follows the header
/// as raw bytes in the log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// HTTP verb.
    pub method: String,
    /// Request headers as captured.
    pub headers: Headers,
    /// Request target, including the query string if one was captured.
    pub path: String,
    /// Scheme the request arrived on.
    pub protocol: Protocol,
    /// Absolute capture time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Milliseconds since the first captured request.
    pub time_delta: u64,
    /// Length of the body in bytes.
    pub content_length: usize,
    /// 1-based line of the header in the source file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    /// Raw request body.
    #[serde(skip)]
    pub body: Bytes,
}

impl LogRecord {
    /// Creates a record with no headers and an empty body.
    pub fn new(method: impl Into<String>, path: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            method: method.into(),
            headers: Headers::new(),
            path: path.into(),
            protocol,
            timestamp: 0,
            time_delta: 0,
            content_length: 0,
            line_number: None,
            body: Bytes::new(),
        }
    }

    /// Sets the capture timestamp and offset.
    pub fn with_timing(mut self, timestamp: u64, time_delta: u64) -> Self {
        self.timestamp = timestamp;
        self.time_delta = time_delta;
        self
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body and updates `content_length` to match.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.set_body(body);
        self
    }

    /// Replaces the body and keeps `content_length` in sync.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
        self.content_length = self.body.len();
    }

    /// Returns true if the record carries a body.
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Line number for diagnostics, 0 when unassigned.
    pub fn line(&self) -> u64 {
        self.line_number.unwrap_or(0)
    }
}

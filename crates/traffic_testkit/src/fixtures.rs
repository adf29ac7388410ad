//! Test fixtures for traffic logs.
//!
//! Provides a builder that writes framed logs into a temporary directory,
//! including deliberately broken lines for diagnostics tests.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use traffic_codec::{encode_record, LogRecord, Protocol};

/// A log file on disk with automatic cleanup.
pub struct TestLog {
    path: PathBuf,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: TempDir,
}

impl TestLog {
    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builds a traffic log record by record.
///
/// Tracks the physical line each entry starts on, so tests can assert on
/// the line numbers reported by the reader.
///
/// # Example
///
/// ```rust,ignore
/// use traffic_testkit::{request, LogFileBuilder};
///
/// let log = LogFileBuilder::new()
///     .record(request("GET", "/", 0))
///     .raw_line("not json")
///     .write();
/// ```
#[derive(Debug, Clone)]
pub struct LogFileBuilder {
    bytes: Vec<u8>,
    next_line: u64,
    entry_lines: Vec<u64>,
}

impl LogFileBuilder {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next_line: 1,
            entry_lines: Vec::new(),
        }
    }

    /// Appends a well-formed record.
    pub fn record(mut self, record: LogRecord) -> Self {
        let framed = encode_record(&record).expect("Failed to encode record");
        self.push(&framed);
        self
    }

    /// Appends several well-formed records.
    pub fn records(self, records: impl IntoIterator<Item = LogRecord>) -> Self {
        records.into_iter().fold(self, Self::record)
    }

    /// Appends one line verbatim, adding the newline.
    pub fn raw_line(mut self, line: &str) -> Self {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.push(&bytes);
        self
    }

    /// Appends raw bytes with no framing at all.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.push(bytes);
        self
    }

    /// Line on which the `index`th appended entry starts.
    pub fn line_of(&self, index: usize) -> u64 {
        self.entry_lines[index]
    }

    /// The log contents.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Writes the log to a fresh temporary directory.
    pub fn write(&self) -> TestLog {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("traffic.log");
        std::fs::write(&path, &self.bytes).expect("Failed to write log");
        TestLog {
            path,
            _temp_dir: temp_dir,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.entry_lines.push(self.next_line);
        self.next_line += bytes.iter().filter(|&&b| b == b'\n').count() as u64;
        self.bytes.extend_from_slice(bytes);
    }
}

impl Default for LogFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bodiless request recorded `time_delta` ms into the capture.
pub fn request(method: &str, path: &str, time_delta: u64) -> LogRecord {
    LogRecord::new(method, path, Protocol::Http)
        .with_timing(1_456_826_400_000 + time_delta, time_delta)
        .with_header("accept", "*/*")
}

/// A request carrying session cookie `key=id`.
pub fn session_request(path: &str, time_delta: u64, key: &str, id: &str) -> LogRecord {
    request("GET", path, time_delta).with_header("cookie", format!("{key}={id}"))
}

/// A JSON `POST` request.
pub fn json_request(path: &str, time_delta: u64, body: &str) -> LogRecord {
    request("POST", path, time_delta)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_physical_lines() {
        let builder = LogFileBuilder::new()
            .record(request("GET", "/a", 0))
            .record(json_request("/b", 10, "{\n}"))
            .raw_line("garbage")
            .record(request("GET", "/c", 20));

        assert_eq!(builder.line_of(0), 1);
        assert_eq!(builder.line_of(1), 3);
        // The body holds a newline of its own.
        assert_eq!(builder.line_of(2), 6);
        assert_eq!(builder.line_of(3), 7);
    }

    #[test]
    fn writes_to_disk() {
        let builder = LogFileBuilder::new().record(request("GET", "/", 0));
        let log = builder.write();
        assert_eq!(std::fs::read(log.path()).unwrap(), builder.bytes());
    }
}

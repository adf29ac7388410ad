//! Run statistics and diagnostics.
//!
//! Counters are atomic so the producer, scheduler and response handlers can
//! update them concurrently. A [`ReplayReport`] is the plain snapshot handed
//! back when the run ends.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;
use traffic_codec::{CodecError, FramingWarning};

/// Category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A record could not be decoded.
    Decode,
    /// A record decoded but its terminator was wrong.
    Framing,
    /// A replayed request failed.
    Request,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Decode => "decode",
            DiagnosticKind::Framing => "framing",
            DiagnosticKind::Request => "request",
        };
        f.write_str(name)
    }
}

/// A problem reported during the run that did not stop it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Category.
    pub kind: DiagnosticKind,
    /// Line of the record's header, when known.
    pub line_number: Option<u64>,
    /// Request id, for request failures.
    pub request_id: Option<u64>,
    /// Human readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(line) = self.line_number {
            write!(f, " line {line}")?;
        }
        if let Some(id) = self.request_id {
            write!(f, " request {id}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Live counters for a run.
#[derive(Debug, Default)]
pub struct ReplayStats {
    records_read: AtomicU64,
    dispatched: AtomicU64,
    skipped: AtomicU64,
    validated: AtomicU64,
    decode_errors: AtomicU64,
    framing_warnings: AtomicU64,
    request_errors: AtomicU64,
    responses: AtomicU64,
    sessions_captured: AtomicU64,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl ReplayStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_validated(&self) {
        self.validated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_captured(&self) {
        self.sessions_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record that failed to decode.
    pub(crate) fn decode_error(&self, err: &CodecError) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        let line_number = err.line_number();
        warn!(line_number = ?line_number, error = %err, "skipping undecodable record");
        self.push(Diagnostic {
            kind: DiagnosticKind::Decode,
            line_number,
            request_id: None,
            message: err.to_string(),
        });
    }

    /// Records a framing problem after a decoded record.
    pub(crate) fn framing_warning(&self, warning: &FramingWarning) {
        self.framing_warnings.fetch_add(1, Ordering::Relaxed);
        warn!(line_number = warning.line_number(), "{warning}");
        self.push(Diagnostic {
            kind: DiagnosticKind::Framing,
            line_number: Some(warning.line_number()),
            request_id: None,
            message: warning.to_string(),
        });
    }

    /// Records a failed request.
    pub(crate) fn request_error(&self, request_id: u64, line_number: u64, message: impl Into<String>) {
        self.request_errors.fetch_add(1, Ordering::Relaxed);
        let message = message.into();
        warn!(request_id, line_number, error = %message, "request failed");
        self.push(Diagnostic {
            kind: DiagnosticKind::Request,
            line_number: Some(line_number),
            request_id: Some(request_id),
            message,
        });
    }

    fn push(&self, diagnostic: Diagnostic) {
        self.diagnostics.lock().push(diagnostic);
    }

    /// Number of records dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Number of records decoded so far.
    pub fn records_read(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    /// Builds the final report.
    pub fn report(&self, max_queue_depth: usize, elapsed: Duration) -> ReplayReport {
        ReplayReport {
            records_read: self.records_read(),
            dispatched: self.dispatched(),
            skipped: self.skipped.load(Ordering::Relaxed),
            validated: self.validated.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            framing_warnings: self.framing_warnings.load(Ordering::Relaxed),
            request_errors: self.request_errors.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            sessions_captured: self.sessions_captured.load(Ordering::Relaxed),
            max_queue_depth,
            elapsed,
            diagnostics: self.diagnostics.lock().clone(),
        }
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplayReport {
    /// Records decoded from the log.
    pub records_read: u64,
    /// Requests sent to the target.
    pub dispatched: u64,
    /// Records skipped by fast-forward.
    pub skipped: u64,
    /// Records walked in validate-only mode.
    pub validated: u64,
    /// Records that failed to decode.
    pub decode_errors: u64,
    /// Records with a bad terminator.
    pub framing_warnings: u64,
    /// Requests that failed.
    pub request_errors: u64,
    /// Responses received (any status).
    pub responses: u64,
    /// Session ids learned from responses.
    pub sessions_captured: u64,
    /// Most records ever held in the queue at once.
    pub max_queue_depth: usize,
    /// Wall time of the run.
    pub elapsed: Duration,
    /// Every diagnostic, in the order it was reported.
    pub diagnostics: Vec<Diagnostic>,
}

impl ReplayReport {
    /// Returns true if the log decoded without any diagnostic.
    pub fn is_clean(&self) -> bool {
        self.decode_errors == 0 && self.framing_warnings == 0
    }

    /// Diagnostics of one kind.
    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(move |d| d.kind == kind)
    }
}

impl fmt::Display for ReplayReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} read, {} dispatched, {} skipped, {} validated, {} decode errors, \
             {} framing warnings, {} request errors, {} responses in {:.2?}",
            self.records_read,
            self.dispatched,
            self.skipped,
            self.validated,
            self.decode_errors,
            self.framing_warnings,
            self.request_errors,
            self.responses,
            self.elapsed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_keep_order_and_context() {
        let stats = ReplayStats::new();
        stats.decode_error(&CodecError::malformed_header(7, "expected value"));
        stats.framing_warning(&FramingWarning::MissingTerminator { line_number: 9 });
        stats.request_error(3, 12, "connection refused");

        let report = stats.report(4, Duration::from_millis(10));
        assert_eq!(report.decode_errors, 1);
        assert_eq!(report.framing_warnings, 1);
        assert_eq!(report.request_errors, 1);
        assert_eq!(report.max_queue_depth, 4);
        assert!(!report.is_clean());

        let lines: Vec<_> = report.diagnostics.iter().map(|d| d.line_number).collect();
        assert_eq!(lines, vec![Some(7), Some(9), Some(12)]);
        let request = report.diagnostics_of(DiagnosticKind::Request).next().unwrap();
        assert_eq!(request.request_id, Some(3));
        assert_eq!(request.to_string(), "request line 12 request 3: connection refused");
    }

    #[test]
    fn request_errors_do_not_dirty_validation() {
        let stats = ReplayStats::new();
        stats.record_read();
        stats.request_error(1, 1, "status 500");
        assert!(stats.report(1, Duration::ZERO).is_clean());
    }
}

//! Request processors applied to records before they are queued.

use crate::error::{ReplayError, ReplayResult};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use traffic_codec::LogRecord;

/// Error type processors may return.
pub type ProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// A hook that may rewrite a record in place before it is replayed.
///
/// Processors run in registration order on every decoded record. Any error
/// aborts the whole run.
pub trait Processor: Send {
    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Inspects and optionally mutates a record.
    fn process(&mut self, record: &mut LogRecord) -> Result<(), ProcessorError>;
}

impl<F> Processor for F
where
    F: FnMut(&mut LogRecord) -> Result<(), ProcessorError> + Send,
{
    fn process(&mut self, record: &mut LogRecord) -> Result<(), ProcessorError> {
        self(record)
    }
}

/// Ordered list of processors.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a processor; it runs after every processor already added.
    pub fn push(&mut self, processor: impl Processor + 'static) {
        self.processors.push(Box::new(processor));
    }

    /// Appends a boxed processor.
    pub fn push_boxed(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    /// Number of processors.
    pub fn len(&self) -> usize {
        self.processors.len()
    }

    /// Returns true if no processors are registered.
    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Runs every processor on `record`, stopping at the first failure.
    pub fn apply(&mut self, record: &mut LogRecord) -> ReplayResult<()> {
        for processor in &mut self.processors {
            processor
                .process(record)
                .map_err(|e| ReplayError::Processor {
                    name: processor.name().to_string(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.processors.iter().map(|p| p.name()))
            .finish()
    }
}

/// `YYYY-MM-DDTHH:MM:SS.mmmZ` as written by `Date.toISOString`.
static ISO_DATE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"2[0-9]{3}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2}\.[0-9]{3}Z")
});

/// Shifts ISO-8601 timestamps embedded in request bodies.
///
/// The first record seen fixes the original session start. Every
/// `YYYY-MM-DDTHH:MM:SS.mmmZ` value in a body is moved so that it keeps
/// the same offset from the replay start as it had from the original start.
pub struct JsonDateForwarding {
    replay_start_ms: i64,
    original_start_ms: Option<i64>,
}

impl JsonDateForwarding {
    /// Registered name of this processor.
    pub const NAME: &'static str = "json_date_forwarding";

    /// Creates the processor anchored at the current time.
    pub fn new() -> Self {
        Self::with_replay_start(Utc::now().timestamp_millis())
    }

    /// Creates the processor anchored at an explicit replay start (ms since epoch).
    pub fn with_replay_start(replay_start_ms: i64) -> Self {
        Self {
            replay_start_ms,
            original_start_ms: None,
        }
    }

    fn shift(&self, original_start: i64, matched: &str) -> Option<String> {
        let date = DateTime::parse_from_rfc3339(matched).ok()?;
        let offset = date.timestamp_millis() - original_start;
        let shifted: DateTime<Utc> = Utc
            .timestamp_millis_opt(self.replay_start_ms + offset)
            .single()?;
        Some(shifted.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Default for JsonDateForwarding {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for JsonDateForwarding {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn process(&mut self, record: &mut LogRecord) -> Result<(), ProcessorError> {
        let original_start = *self
            .original_start_ms
            .get_or_insert(i64::try_from(record.timestamp)?);

        if !record.has_body() {
            return Ok(());
        }
        let Ok(text) = std::str::from_utf8(&record.body) else {
            return Ok(());
        };

        let pattern = ISO_DATE.as_ref().map_err(|e| e.clone())?;
        let rewritten = pattern.replace_all(text, |caps: &regex::Captures<'_>| {
            let matched = &caps[0];
            self.shift(original_start, matched)
                .unwrap_or_else(|| matched.to_string())
        });
        if let std::borrow::Cow::Owned(body) = rewritten {
            record.set_body(body.into_bytes());
        }
        Ok(())
    }
}

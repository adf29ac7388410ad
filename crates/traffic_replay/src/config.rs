//! Configuration for a replay run.

use crate::error::{ReplayError, ReplayResult};
use crate::processor::{Processor, ProcessorChain};
use std::path::PathBuf;
use std::time::Duration;

/// Resolved configuration for one replay run.
///
/// Built by the front end and handed to the engine, which does not change
/// it for the duration of the run.
#[derive(Debug)]
pub struct ReplayConfig {
    /// Path of the captured traffic log.
    pub path: PathBuf,
    /// Host to replay against.
    pub host: String,
    /// Port to replay against.
    pub port: u16,
    /// Maximum number of decoded records held ahead of the scheduler.
    pub queue_size: usize,
    /// Wall-clock start of the replay in ms since the Unix epoch. `None`
    /// starts immediately.
    pub start_time: Option<u64>,
    /// Whether to translate session cookies.
    pub mutate_session: bool,
    /// Cookie name carrying the session id.
    pub session_key: String,
    /// Offset in ms into the recording at which to start; earlier records
    /// are skipped.
    pub fastforward: u64,
    /// Only decode the log, never send anything.
    pub validate: bool,
    /// Processors applied to each record before it is queued.
    pub processors: ProcessorChain,
    /// Verbose request and response logging.
    pub debug: bool,
    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,
    /// Deadline for a response once the request has been written. Also
    /// bounds writing the request itself.
    pub response_timeout: Duration,
}

impl ReplayConfig {
    /// Default target port.
    pub const DEFAULT_PORT: u16 = 80;
    /// Default queue capacity.
    pub const DEFAULT_QUEUE_SIZE: usize = 20;
    /// Default session cookie name.
    pub const DEFAULT_SESSION_KEY: &'static str = "sid";

    /// Creates a configuration with defaults for everything but the source
    /// and target.
    pub fn new(path: impl Into<PathBuf>, host: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            port: Self::DEFAULT_PORT,
            queue_size: Self::DEFAULT_QUEUE_SIZE,
            start_time: None,
            mutate_session: false,
            session_key: Self::DEFAULT_SESSION_KEY.to_string(),
            fastforward: 0,
            validate: false,
            processors: ProcessorChain::new(),
            debug: false,
            connect_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the target port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the queue capacity.
    pub fn with_queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Delays the replay until the given wall-clock time (ms since epoch).
    pub fn with_start_time(mut self, start_ms: u64) -> Self {
        self.start_time = Some(start_ms);
        self
    }

    /// Enables session translation on the given cookie.
    pub fn with_session_mutation(mut self, key: impl Into<String>) -> Self {
        self.mutate_session = true;
        self.session_key = key.into();
        self
    }

    /// Skips everything recorded before `offset_ms`.
    pub fn with_fastforward(mut self, offset_ms: u64) -> Self {
        self.fastforward = offset_ms;
        self
    }

    /// Switches to validate-only mode.
    pub fn with_validate(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Appends a processor.
    pub fn with_processor(mut self, processor: impl Processor + 'static) -> Self {
        self.processors.push(processor);
        self
    }

    /// Enables debug output.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the response timeout.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Checks the settings that must hold before a run starts.
    pub fn validate(&self) -> ReplayResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(ReplayError::MissingPath);
        }
        if self.host.trim().is_empty() {
            return Err(ReplayError::MissingHost);
        }
        if self.queue_size == 0 {
            return Err(ReplayError::InvalidConfig(
                "queue_size must be at least 1".into(),
            ));
        }
        if self.mutate_session && self.session_key.is_empty() {
            return Err(ReplayError::InvalidConfig(
                "session_key must be set when mutating sessions".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReplayConfig::new("traffic.log", "localhost");
        assert_eq!(config.port, 80);
        assert_eq!(config.queue_size, 20);
        assert_eq!(config.session_key, "sid");
        assert!(!config.mutate_session);
        assert!(!config.validate);
        assert_eq!(config.fastforward, 0);
        assert!(config.start_time.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_builder() {
        let config = ReplayConfig::new("traffic.log", "example.com")
            .with_port(3443)
            .with_queue_size(5)
            .with_session_mutation("app_sid")
            .with_fastforward(1_500)
            .with_debug(true)
            .with_response_timeout(Duration::from_secs(2));

        assert_eq!(config.port, 3443);
        assert_eq!(config.queue_size, 5);
        assert!(config.mutate_session);
        assert_eq!(config.session_key, "app_sid");
        assert_eq!(config.fastforward, 1_500);
        assert!(config.debug);
        assert_eq!(config.response_timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_source_and_target_are_rejected() {
        let err = ReplayConfig::new("", "localhost").validate().unwrap_err();
        assert!(matches!(err, ReplayError::MissingPath));

        let err = ReplayConfig::new("traffic.log", " ").validate().unwrap_err();
        assert!(matches!(err, ReplayError::MissingHost));
    }

    #[test]
    fn zero_queue_is_rejected() {
        let err = ReplayConfig::new("traffic.log", "localhost")
            .with_queue_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ReplayError::InvalidConfig(_)));
    }
}

//! Configuration file loading and merging.
//!
//! A config file is a JSON object using the same names as the flags:
//!
//! ```json
//! {
//!   "path": "traffic.log",
//!   "host": "staging.local",
//!   "port": 8080,
//!   "mutate_session": true,
//!   "session_key": "sid",
//!   "processors": ["json_date_forwarding"]
//! }
//! ```
//!
//! Values set in the file win over flags; built-in defaults fill the rest.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use traffic_replay::{JsonDateForwarding, Processor, ReplayConfig};

/// Errors raised while building the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON of the expected shape.
    #[error("invalid config file {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A processor name is not known.
    #[error("unknown processor {0:?}")]
    UnknownProcessor(String),
}

/// Settings from a config file or from flags. Unset fields are `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Traffic log to replay.
    pub path: Option<PathBuf>,
    /// Target host.
    pub host: Option<String>,
    /// Target port.
    pub port: Option<u16>,
    /// Translate session cookies.
    pub mutate_session: Option<bool>,
    /// Session cookie name.
    pub session_key: Option<String>,
    /// Verbose logging.
    pub debug: Option<bool>,
    /// Processor names, applied in order.
    pub processors: Option<Vec<String>>,
    /// Fast-forward offset in ms.
    pub fastforward: Option<u64>,
    /// Validate only.
    pub validate: Option<bool>,
    /// Queue capacity.
    pub queue_size: Option<usize>,
    /// Start time in ms since the Unix epoch.
    pub start_time: Option<u64>,
    /// Connect timeout in ms.
    pub connect_timeout_ms: Option<u64>,
    /// Response timeout in ms.
    pub response_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Reads a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fills every field unset here from `fallback`.
    pub fn or(self, fallback: FileConfig) -> FileConfig {
        FileConfig {
            path: self.path.or(fallback.path),
            host: self.host.or(fallback.host),
            port: self.port.or(fallback.port),
            mutate_session: self.mutate_session.or(fallback.mutate_session),
            session_key: self.session_key.or(fallback.session_key),
            debug: self.debug.or(fallback.debug),
            processors: self.processors.or(fallback.processors),
            fastforward: self.fastforward.or(fallback.fastforward),
            validate: self.validate.or(fallback.validate),
            queue_size: self.queue_size.or(fallback.queue_size),
            start_time: self.start_time.or(fallback.start_time),
            connect_timeout_ms: self.connect_timeout_ms.or(fallback.connect_timeout_ms),
            response_timeout_ms: self.response_timeout_ms.or(fallback.response_timeout_ms),
        }
    }

    /// Whether debug output was requested.
    pub fn debug(&self) -> bool {
        self.debug.unwrap_or(false)
    }

    /// Builds the engine configuration, applying defaults.
    ///
    /// Missing path or host are left empty here and rejected by
    /// [`ReplayConfig::validate`].
    pub fn into_replay_config(self) -> Result<ReplayConfig, ConfigError> {
        let mut config = ReplayConfig::new(self.path.unwrap_or_default(), self.host.unwrap_or_default())
            .with_debug(self.debug.unwrap_or(false))
            .with_validate(self.validate.unwrap_or(false))
            .with_fastforward(self.fastforward.unwrap_or(0));

        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(size) = self.queue_size {
            config = config.with_queue_size(size);
        }
        if let Some(start) = self.start_time {
            config = config.with_start_time(start);
        }
        if self.mutate_session.unwrap_or(false) {
            let key = self
                .session_key
                .unwrap_or_else(|| ReplayConfig::DEFAULT_SESSION_KEY.to_string());
            config = config.with_session_mutation(key);
        } else if let Some(key) = self.session_key {
            config.session_key = key;
        }
        if let Some(ms) = self.connect_timeout_ms {
            config = config.with_connect_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.response_timeout_ms {
            config = config.with_response_timeout(Duration::from_millis(ms));
        }

        for name in self.processors.unwrap_or_default() {
            config.processors.push_boxed(resolve_processor(&name)?);
        }
        Ok(config)
    }
}

/// Looks up a built-in processor by name.
pub fn resolve_processor(name: &str) -> Result<Box<dyn Processor>, ConfigError> {
    match name {
        JsonDateForwarding::NAME => Ok(Box::new(JsonDateForwarding::new())),
        other => Err(ConfigError::UnknownProcessor(other.to_string())),
    }
}

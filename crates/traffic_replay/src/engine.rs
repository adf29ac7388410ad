//! The replay engine.

use crate::config::ReplayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{ReplayError, ReplayResult};
use crate::http::TcpTransport;
use crate::producer::Producer;
use crate::queue::RecordQueue;
use crate::report::{ReplayReport, ReplayStats};
use crate::scheduler::Scheduler;
use crate::session::SessionMutator;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::time::Instant;
use tracing::info;
use traffic_codec::RecordReader;

/// Replays a captured log against a target.
///
/// All run state (queue, counters, session table, request ids) is created
/// per run and owned here, so independent engines can run side by side.
///
/// # Example
///
/// ```rust,ignore
/// use traffic_replay::{ReplayConfig, ReplayEngine, TcpTransport};
///
/// let config = ReplayConfig::new("traffic.log", "staging.local").with_port(8080);
/// let transport = TcpTransport::new(config.connect_timeout)?;
/// let report = ReplayEngine::new(config, transport).run().await?;
/// println!("{report}");
/// ```
pub struct ReplayEngine<T: Transport> {
    config: ReplayConfig,
    transport: Arc<T>,
}

impl<T: Transport> ReplayEngine<T> {
    /// Creates an engine.
    pub fn new(config: ReplayConfig, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
        }
    }

    /// The run configuration.
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Opens the configured log and replays it.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, an unreadable log, a
    /// failing processor or an I/O error mid-file. Per-record and
    /// per-request problems are reported in the [`ReplayReport`] instead.
    pub async fn run(self) -> ReplayResult<ReplayReport> {
        self.config.validate()?;
        let file = File::open(&self.config.path)
            .await
            .map_err(|source| ReplayError::Io {
                path: self.config.path.clone(),
                source,
            })?;
        self.run_with_source(BufReader::new(file)).await
    }

    /// Replays records read from `source` instead of the configured path.
    pub async fn run_with_source<R>(self, source: R) -> ReplayResult<ReplayReport>
    where
        R: AsyncBufRead + Unpin,
    {
        let Self {
            mut config,
            transport,
        } = self;
        config.validate()?;

        let started = Instant::now();
        let mut processors = std::mem::take(&mut config.processors);
        let queue = RecordQueue::new(config.queue_size);
        let stats = Arc::new(ReplayStats::new());
        let session = config
            .mutate_session
            .then(|| Arc::new(SessionMutator::new(config.session_key.clone())));
        let mut dispatcher = Dispatcher::new(&config, transport, session, Arc::clone(&stats));

        info!(
            path = %config.path.display(),
            host = %config.host,
            port = config.port,
            validate = config.validate,
            mutate_session = config.mutate_session,
            fastforward_ms = config.fastforward,
            processors = processors.len(),
            "starting replay"
        );

        let producer = Producer::new(RecordReader::new(source), &mut processors, &queue, &stats);
        let scheduler = Scheduler::new(&config, &queue, &mut dispatcher, &stats);
        tokio::try_join!(producer.run(), scheduler.run())?;
        dispatcher.finish().await;

        let report = stats.report(queue.high_water(), started.elapsed());
        info!(%report, "replay finished");
        Ok(report)
    }
}

/// Replays `config` over real sockets.
pub async fn replay(config: ReplayConfig) -> ReplayResult<ReplayReport> {
    let transport =
        TcpTransport::new(config.connect_timeout)?.with_send_timeout(config.response_timeout);
    ReplayEngine::new(config, transport).run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;

    #[tokio::test]
    async fn invalid_config_fails_before_reading() {
        let engine = ReplayEngine::new(ReplayConfig::new("traffic.log", ""), MockTransport::new());
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, ReplayError::MissingHost));
    }

    #[tokio::test]
    async fn unreadable_log_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReplayConfig::new(dir.path().join("missing.log"), "localhost");
        let err = ReplayEngine::new(config, MockTransport::new())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Io { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn empty_log_is_a_clean_run() {
        let transport = Arc::new(MockTransport::new());
        let report = ReplayEngine::new(ReplayConfig::new("memory", "localhost"), Arc::clone(&transport))
            .run_with_source(&b""[..])
            .await
            .unwrap();
        assert_eq!(report.records_read, 0);
        assert!(report.is_clean());
        assert_eq!(transport.sent_count(), 0);
    }
}

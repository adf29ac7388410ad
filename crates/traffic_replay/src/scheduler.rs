//! Drain loop: releases queued records at their recorded offsets.

use crate::config::ReplayConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ReplayResult;
use crate::queue::RecordQueue;
use crate::report::ReplayStats;
use crate::transport::Transport;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info};

/// Takes records off the queue in order and hands each to the dispatcher
/// once `run_start + (time_delta - fastforward)` has passed.
pub(crate) struct Scheduler<'a, T: Transport> {
    queue: &'a RecordQueue,
    dispatcher: &'a mut Dispatcher<T>,
    stats: &'a ReplayStats,
    start_time: Option<u64>,
    fastforward: u64,
    validate: bool,
}

impl<'a, T: Transport> Scheduler<'a, T> {
    pub(crate) fn new(
        config: &ReplayConfig,
        queue: &'a RecordQueue,
        dispatcher: &'a mut Dispatcher<T>,
        stats: &'a ReplayStats,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            stats,
            start_time: config.start_time,
            fastforward: config.fastforward,
            validate: config.validate,
        }
    }

    pub(crate) async fn run(mut self) -> ReplayResult<()> {
        // Validation walks the log as fast as it decodes; only replay waits.
        if self.validate {
            self.drain_unsent().await;
            return Ok(());
        }
        let run_start = wait_for_start(self.start_time).await;

        while let Some(time_delta) = self.queue.wait_for_head().await {
            if time_delta < self.fastforward {
                if let Some(record) = self.queue.pop() {
                    self.stats.record_skipped();
                    debug!(line_number = record.line(), time_delta, "skipping record before fast-forward offset");
                }
                continue;
            }

            let due = run_start + Duration::from_millis(time_delta - self.fastforward);
            sleep_until(due).await;
            if let Some(record) = self.queue.pop() {
                self.dispatcher.dispatch(record).await;
            }
        }
        Ok(())
    }

    async fn drain_unsent(&self) {
        while self.queue.wait_for_head().await.is_some() {
            if let Some(record) = self.queue.pop() {
                self.stats.record_validated();
                debug!(
                    line_number = record.line(),
                    method = %record.method,
                    path = %record.path,
                    "record decoded"
                );
            }
        }
    }
}

/// Sleeps until `start_time` (ms since the Unix epoch) and returns the
/// instant the run starts.
async fn wait_for_start(start_time: Option<u64>) -> Instant {
    if let Some(start_ms) = start_time {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        if start_ms > now_ms {
            let wait = Duration::from_millis(start_ms - now_ms);
            info!(wait_ms = wait.as_millis() as u64, "waiting for start time");
            sleep(wait).await;
        }
    }
    Instant::now()
}

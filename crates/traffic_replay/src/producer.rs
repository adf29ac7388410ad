//! Fill loop: decodes the log into the queue.

use crate::error::ReplayResult;
use crate::processor::ProcessorChain;
use crate::queue::RecordQueue;
use crate::report::ReplayStats;
use tokio::io::AsyncBufRead;
use tracing::debug;
use traffic_codec::{DecodedRecord, RecordReader};

/// Reads records in file order, runs the processors on each and queues it.
pub(crate) struct Producer<'a, R> {
    reader: RecordReader<R>,
    processors: &'a mut ProcessorChain,
    queue: &'a RecordQueue,
    stats: &'a ReplayStats,
}

impl<'a, R: AsyncBufRead + Unpin> Producer<'a, R> {
    pub(crate) fn new(
        reader: RecordReader<R>,
        processors: &'a mut ProcessorChain,
        queue: &'a RecordQueue,
        stats: &'a ReplayStats,
    ) -> Self {
        Self {
            reader,
            processors,
            queue,
            stats,
        }
    }

    /// Fills the queue until end of file, then closes it.
    ///
    /// The queue is closed on failure too, so the scheduler never waits on
    /// a producer that has stopped.
    pub(crate) async fn run(mut self) -> ReplayResult<()> {
        let result = self.fill().await;
        self.queue.close();
        debug!(
            records = self.reader.records_read(),
            lines = self.reader.lines_consumed(),
            "producer finished"
        );
        result
    }

    async fn fill(&mut self) -> ReplayResult<()> {
        loop {
            match self.reader.next_record().await {
                Ok(Some(DecodedRecord { mut record, warning })) => {
                    self.stats.record_read();
                    if let Some(warning) = warning {
                        self.stats.framing_warning(&warning);
                    }
                    self.processors.apply(&mut record)?;
                    self.queue.push(record).await;
                }
                Ok(None) => return Ok(()),
                Err(err) if err.is_recoverable() => self.stats.decode_error(&err),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

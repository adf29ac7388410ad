//! Bounded record queue between the producer and the scheduler.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;
use traffic_codec::LogRecord;

struct QueueState {
    records: VecDeque<LogRecord>,
    closed: bool,
    high_water: usize,
}

/// FIFO of decoded records with a fixed capacity.
///
/// The producer waits for room instead of growing the queue, and the
/// scheduler waits for a record or for the producer to close the queue.
/// Both waits are notification driven; neither side spins.
pub struct RecordQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    has_room: Notify,
    has_record: Notify,
}

impl RecordQueue {
    /// Creates a queue holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                records: VecDeque::with_capacity(capacity),
                closed: false,
                high_water: 0,
            }),
            capacity,
            has_room: Notify::new(),
            has_record: Notify::new(),
        }
    }

    /// Maximum number of queued records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Largest number of records held at once.
    pub fn high_water(&self) -> usize {
        self.state.lock().high_water
    }

    /// Returns true once the producer has closed the queue.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Appends a record, waiting while the queue is full.
    pub async fn push(&self, record: LogRecord) {
        loop {
            {
                let mut state = self.state.lock();
                if state.records.len() < self.capacity {
                    state.records.push_back(record);
                    state.high_water = state.high_water.max(state.records.len());
                    drop(state);
                    self.has_record.notify_one();
                    return;
                }
            }
            self.has_room.notified().await;
        }
    }

    /// Marks the end of input. Queued records can still be taken.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.has_record.notify_one();
    }

    /// Waits for a record at the head and returns its `time_delta`.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn wait_for_head(&self) -> Option<u64> {
        loop {
            {
                let state = self.state.lock();
                if let Some(head) = state.records.front() {
                    return Some(head.time_delta);
                }
                if state.closed {
                    return None;
                }
            }
            self.has_record.notified().await;
        }
    }

    /// Removes the head record.
    pub fn pop(&self) -> Option<LogRecord> {
        let record = self.state.lock().records.pop_front();
        if record.is_some() {
            self.has_room.notify_one();
        }
        record
    }
}

impl std::fmt::Debug for RecordQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RecordQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.records.len())
            .field("closed", &state.closed)
            .field("high_water", &state.high_water)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use traffic_codec::Protocol;

    fn record(time_delta: u64) -> LogRecord {
        LogRecord::new("GET", format!("/{time_delta}"), Protocol::Http).with_timing(0, time_delta)
    }

    #[tokio::test]
    async fn fifo_order() {
        let queue = RecordQueue::new(4);
        queue.push(record(1)).await;
        queue.push(record(2)).await;
        assert_eq!(queue.wait_for_head().await, Some(1));
        assert_eq!(queue.pop().unwrap().time_delta, 1);
        assert_eq!(queue.pop().unwrap().time_delta, 2);
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn closed_and_drained_ends() {
        let queue = RecordQueue::new(2);
        queue.push(record(5)).await;
        queue.close();
        assert_eq!(queue.wait_for_head().await, Some(5));
        queue.pop();
        assert_eq!(queue.wait_for_head().await, None);
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn push_waits_for_room() {
        let queue = Arc::new(RecordQueue::new(2));
        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                for i in 0..10 {
                    queue.push(record(i)).await;
                }
                queue.close();
            })
        };

        let mut seen = Vec::new();
        while queue.wait_for_head().await.is_some() {
            assert!(queue.len() <= 2);
            seen.push(queue.pop().unwrap().time_delta);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        producer.await.unwrap();

        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(queue.high_water(), 2);
    }

    #[tokio::test]
    async fn consumer_wakes_on_push() {
        let queue = Arc::new(RecordQueue::new(1));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.wait_for_head().await })
        };
        tokio::task::yield_now().await;
        queue.push(record(42)).await;
        assert_eq!(waiter.await.unwrap(), Some(42));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(RecordQueue::new(0).capacity(), 1);
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffered delivery from a single background task.
//!
//! # Lifecycle
//!
//! ```text
//!   Stopped ──start()──> Running ──stop()──> Draining ──> Stopped
//! ```
//!
//! Only `Running` accepts records. `stop()` cancels the background task, which performs a
//! final flush of the whole queue before exiting; `stop()` returns after the task has
//! finished.
//!
//! # Backpressure
//!
//! - At or above `discard_threshold` queued records, non-important records are dropped.
//! - When the queue is full, `append` waits up to `max_block` for space, then drops.
//!
//! Dropped records are counted; the next flush emits one warning with the count.
//!
//! # Flushing
//!
//! The task wakes when `max_flush_interval` elapses or when an append brings the queue to
//! `max_batch_size`. Each flush sends batches of at most `max_batch_size` records and
//! `max_batch_bytes` wire bytes. Records trimmed off an oversized batch go back to the front
//! of the queue.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::WorkerConfig;
use crate::metrics::Metrics;
use crate::record::{Importance, Record};
use crate::reporter::Reporter;
use crate::sink::SinkHandle;
use crate::worker::batch;
use crate::worker::queue::RecordQueue;
use crate::worker::Worker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Stopped = 0,
    Running = 1,
    Draining = 2,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Lifecycle::Running,
            2 => Lifecycle::Draining,
            _ => Lifecycle::Stopped,
        }
    }
}

struct Shared {
    config: WorkerConfig,
    queue: RecordQueue,
    flush_requested: Notify,
    lost: AtomicU64,
    lifecycle: AtomicU8,
    sink: Arc<SinkHandle>,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<dyn Metrics>,
}

struct Background {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct AsyncWorker {
    shared: Arc<Shared>,
    background: Mutex<Option<Background>>,
}

impl AsyncWorker {
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        sink: Arc<SinkHandle>,
        reporter: Arc<dyn Reporter>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let queue = RecordQueue::new(config.queue_capacity.max(1));
        AsyncWorker {
            shared: Arc::new(Shared {
                config,
                queue,
                flush_requested: Notify::new(),
                lost: AtomicU64::new(0),
                lifecycle: AtomicU8::new(Lifecycle::Stopped as u8),
                sink,
                reporter,
                metrics,
            }),
            background: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// Records currently waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }
}

#[async_trait]
impl Worker for AsyncWorker {
    async fn start(&self) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }
        let interval = self
            .shared
            .config
            .max_flush_interval
            .unwrap_or(Duration::MAX);
        self.shared.set_lifecycle(Lifecycle::Running);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self.shared.clone(), interval, cancel.clone()));
        *background = Some(Background { cancel, task });
        debug!("AWSLOGS | Delivery worker started");
    }

    async fn stop(&self) {
        let mut background = self.background.lock().await;
        let Some(Background { cancel, task }) = background.take() else {
            return;
        };
        self.shared.set_lifecycle(Lifecycle::Draining);
        cancel.cancel();
        if let Err(e) = task.await {
            self.shared
                .reporter
                .error("Delivery task terminated abnormally", &e);
        }

        // Appends that raced the final flush.
        let dropped = self.shared.queue.clear();
        for _ in 0..dropped {
            self.shared.metrics.record_lost();
        }
        if dropped > 0 {
            self.shared
                .reporter
                .warn(&format!("Dropped {dropped} log records queued during shutdown"));
        }
        self.shared.set_lifecycle(Lifecycle::Stopped);
        debug!("AWSLOGS | Delivery worker stopped");
    }

    async fn append(&self, record: Record, importance: Importance) {
        let shared = &self.shared;
        if shared.lifecycle() != Lifecycle::Running {
            debug!("AWSLOGS | Worker not running, dropping record");
            shared.metrics.record_lost();
            return;
        }

        if !importance.is_important() && shared.queue.len() >= shared.config.discard_threshold {
            shared.record_lost();
            return;
        }

        let deadline = Instant::now() + shared.config.max_block;
        match shared.queue.offer(record, deadline).await {
            Ok(len) => {
                shared.metrics.record_appended();
                if len >= shared.config.max_batch_size {
                    shared.flush_requested.notify_one();
                }
            }
            Err(_) => shared.record_lost(),
        }
    }
}

impl Shared {
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::SeqCst))
    }

    fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.store(lifecycle as u8, Ordering::SeqCst);
    }

    fn record_lost(&self) {
        self.lost.fetch_add(1, Ordering::Relaxed);
        self.metrics.record_lost();
    }

    /// Puts records trimmed off a batch back at the head of the queue. Records that no
    /// longer fit are lost.
    fn requeue(&self, overflow: Vec<Record>) {
        let rejected = self.queue.requeue_front(overflow);
        if rejected.is_empty() {
            return;
        }
        for _ in &rejected {
            self.metrics.requeue_failed();
        }
        self.reporter.warn(&format!(
            "Failed to requeue {} log records trimmed from an oversized batch",
            rejected.len()
        ));
    }

    /// Sends queued records. Without `all`, stops once less than a full batch is left.
    async fn flush(&self, all: bool) {
        let max_batch = self.config.max_batch_size.max(1);
        loop {
            let mut records = self.queue.drain(max_batch);
            if records.is_empty() {
                return;
            }

            let overflow = batch::split_oversized(&mut records, self.config.max_batch_bytes);
            let requeued = !overflow.is_empty();
            if requeued {
                self.requeue(overflow);
            }

            let lost = self.lost.swap(0, Ordering::Relaxed);
            if lost > 0 {
                self.reporter
                    .warn(&format!("Dropped {lost} log records since the last flush"));
            }

            let size = records.len();
            debug!(
                "AWSLOGS | Flushing {size} records ({} bytes)",
                batch::wire_size(&records)
            );
            match self.sink.send(records).await {
                Ok(()) => self.metrics.batch_sent(size),
                Err(e) => {
                    self.metrics.flush_failed(&e);
                    self.reporter.error("Failed to flush log records", &e);
                }
            }

            let remaining = self.queue.len();
            if remaining == 0 || (!all && !requeued && remaining < max_batch) {
                return;
            }
        }
    }
}

async fn run(shared: Arc<Shared>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = shared.flush_requested.notified() => {}
            () = tokio::time::sleep(interval) => {}
        }
        shared.flush(false).await;
    }
    shared.flush(true).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::constants::EVENT_SIZE_PADDING;
    use crate::metrics::CountingMetrics;
    use crate::worker::testing::{CollectingReporter, RecordingSink};

    struct Fixture {
        sink: RecordingSink,
        reporter: Arc<CollectingReporter>,
        metrics: Arc<CountingMetrics>,
        worker: AsyncWorker,
    }

    fn fixture(config: WorkerConfig) -> Fixture {
        let sink = RecordingSink::new();
        let reporter = CollectingReporter::new();
        let metrics = Arc::new(CountingMetrics::new());
        let worker = AsyncWorker::new(config, sink.handle(), reporter.clone(), metrics.clone());
        Fixture {
            sink,
            reporter,
            metrics,
            worker,
        }
    }

    async fn append_n(worker: &AsyncWorker, n: i64, importance: Importance) {
        for i in 0..n {
            worker.append(Record::new(i, format!("m{i}")), importance).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_records_wait_for_flush_interval() {
        let f = fixture(WorkerConfig::asynchronous(5, Duration::from_millis(1000)));
        f.worker.start().await;
        f.worker.append(Record::new(1, "one"), Importance::Normal).await;

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(f.sink.batches().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(f.sink.batch_sizes(), vec![1]);
        assert_eq!(f.worker.queued(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_is_sent_without_waiting() {
        let f = fixture(WorkerConfig::asynchronous(5, Duration::from_millis(u64::MAX)));
        f.worker.start().await;

        append_n(&f.worker, 5, Importance::Normal).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(f.sink.batch_sizes(), vec![5]);
        assert_eq!(f.metrics.snapshot().batches_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_everything_once() {
        let f = fixture(WorkerConfig::asynchronous(5, Duration::from_secs(3600)));
        f.worker.start().await;
        append_n(&f.worker, 3, Importance::Normal).await;
        assert_eq!(f.worker.queued(), 3);

        f.worker.stop().await;

        assert_eq!(f.sink.messages(), vec!["m0", "m1", "m2"]);
        assert_eq!(f.worker.queued(), 0);
        assert_eq!(f.worker.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_in_batch_sized_chunks() {
        let mut config = WorkerConfig::asynchronous(4, Duration::from_secs(3600));
        config.queue_capacity = 20;
        config.discard_threshold = 20;
        let f = fixture(config);
        f.worker.start().await;

        append_n(&f.worker, 10, Importance::Normal).await;
        f.worker.stop().await;

        assert_eq!(f.sink.batch_sizes(), vec![4, 4, 2]);
        assert_eq!(f.sink.messages().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_important_records_dropped_over_threshold() {
        let mut config = WorkerConfig::asynchronous(10, Duration::from_secs(3600));
        config.discard_threshold = 2;
        let f = fixture(config);
        f.worker.start().await;

        append_n(&f.worker, 3, Importance::Normal).await;
        f.worker
            .append(Record::new(9, "important"), Importance::Important)
            .await;
        f.worker.stop().await;

        assert_eq!(f.sink.messages(), vec!["m0", "m1", "important"]);
        let snapshot = f.metrics.snapshot();
        assert_eq!(snapshot.records_lost, 1);
        assert_eq!(snapshot.records_appended, 3);
        assert_eq!(
            f.reporter.warnings(),
            vec!["Dropped 1 log records since the last flush".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_append_gives_up_after_max_block() {
        let mut config = WorkerConfig::asynchronous(10, Duration::from_secs(3600));
        config.queue_capacity = 2;
        config.discard_threshold = 10;
        config.max_block = Duration::from_millis(100);
        let f = fixture(config);
        f.worker.start().await;

        append_n(&f.worker, 2, Importance::Normal).await;
        let start = Instant::now();
        f.worker
            .append(Record::new(3, "blocked"), Importance::Important)
            .await;

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(f.worker.queued(), 2);
        assert_eq!(f.metrics.snapshot().records_lost, 1);

        f.worker.stop().await;
        assert_eq!(f.sink.messages(), vec!["m0", "m1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_batches_are_split_in_order() {
        let mut config = WorkerConfig::asynchronous(5, Duration::from_millis(u64::MAX));
        config.max_batch_bytes = 2 * (EVENT_SIZE_PADDING + 24);
        let f = fixture(config);
        f.worker.start().await;

        for i in 0..5 {
            f.worker
                .append(Record::new(i, format!("{i:024}")), Importance::Normal)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(f.sink.batch_sizes(), vec![2, 2, 1]);
        let timestamps: Vec<i64> = f
            .sink
            .batches()
            .into_iter()
            .flatten()
            .map(|r| r.timestamp())
            .collect();
        assert_eq!(timestamps, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_into_full_queue_loses_records_and_keeps_running() {
        let mut config = WorkerConfig::asynchronous(4, Duration::from_secs(3600));
        config.queue_capacity = 3;
        config.discard_threshold = 10;
        let f = fixture(config);
        f.worker.start().await;

        // Producers refilled the queue while the trimmed tail was out of it.
        append_n(&f.worker, 2, Importance::Normal).await;
        f.worker.shared.requeue(vec![
            Record::new(10, "tail-a"),
            Record::new(11, "tail-b"),
            Record::new(12, "tail-c"),
        ]);

        assert_eq!(f.worker.queued(), 3);
        assert_eq!(f.metrics.snapshot().requeue_failures, 2);
        assert_eq!(
            f.reporter.warnings(),
            vec!["Failed to requeue 2 log records trimmed from an oversized batch".to_string()]
        );
        assert_eq!(f.worker.lifecycle(), Lifecycle::Running);

        f.worker.stop().await;
        assert_eq!(f.sink.messages(), vec!["tail-a", "m0", "m1"]);
        assert_eq!(f.metrics.snapshot().batches_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_is_reported_and_loop_continues() {
        let f = fixture(WorkerConfig::asynchronous(2, Duration::from_millis(u64::MAX)));
        f.worker.start().await;
        f.sink.fail_next(1);

        append_n(&f.worker, 2, Importance::Normal).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        append_n(&f.worker, 2, Importance::Normal).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(f.sink.batch_sizes(), vec![2]);
        assert_eq!(f.reporter.errors().len(), 1);
        assert_eq!(f.metrics.snapshot().flush_failures, 1);
        assert_eq!(f.worker.lifecycle(), Lifecycle::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_after_stop_is_not_sent() {
        let f = fixture(WorkerConfig::asynchronous(5, Duration::from_millis(100)));
        f.worker.start().await;
        f.worker.stop().await;

        f.worker.append(Record::new(1, "late"), Importance::Important).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(f.sink.batches().is_empty());
        assert_eq!(f.worker.queued(), 0);
        assert_eq!(f.metrics.snapshot().records_lost, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let f = fixture(WorkerConfig::asynchronous(5, Duration::from_secs(1)));
        f.worker.stop().await;
        f.worker.start().await;
        f.worker.start().await;
        f.worker.append(Record::new(1, "x"), Importance::Normal).await;
        f.worker.stop().await;
        f.worker.stop().await;

        assert_eq!(f.sink.messages(), vec!["x"]);

        f.worker.start().await;
        f.worker.append(Record::new(2, "y"), Importance::Normal).await;
        f.worker.stop().await;
        assert_eq!(f.sink.messages(), vec!["x", "y"]);
    }
}

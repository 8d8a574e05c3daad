// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Counters emitted by the pipeline.
//!
//! The pipeline only ever increments; where the counts end up is decided by whoever
//! implements [`Metrics`]. Every method has a no-op default so an implementation only
//! overrides what it cares about, and [`NoopMetrics`] is used when nothing is injected.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait Metrics: Send + Sync {
    /// A record was accepted by a worker.
    fn record_appended(&self) {}

    /// A batch of `size` records was handed to the sink.
    fn batch_sent(&self, _size: usize) {}

    /// A record was dropped by backpressure or because the worker was not running.
    fn record_lost(&self) {}

    /// Records trimmed off an oversized batch could not be put back in the queue.
    fn requeue_failed(&self) {}

    /// A flush ended with a sink error.
    fn flush_failed(&self, _error: &(dyn Error + 'static)) {}

    /// A remote call made by a sink failed.
    fn send_failed(&self, _error: &(dyn Error + 'static)) {}

    /// `count` events are about to be delivered in one remote call.
    fn log_events_sent(&self, _count: usize) {}

    /// One remote delivery call is about to be made.
    fn put_log(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

#[must_use]
pub fn noop() -> Arc<dyn Metrics> {
    Arc::new(NoopMetrics)
}

/// In-process counters, readable through [`CountingMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct CountingMetrics {
    records_appended: AtomicU64,
    batches_sent: AtomicU64,
    records_lost: AtomicU64,
    requeue_failures: AtomicU64,
    flush_failures: AtomicU64,
    send_failures: AtomicU64,
    log_events_sent: AtomicU64,
    put_logs: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub records_appended: u64,
    pub batches_sent: u64,
    pub records_lost: u64,
    pub requeue_failures: u64,
    pub flush_failures: u64,
    pub send_failures: u64,
    pub log_events_sent: u64,
    pub put_logs: u64,
}

impl CountingMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_appended: self.records_appended.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            records_lost: self.records_lost.load(Ordering::Relaxed),
            requeue_failures: self.requeue_failures.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            log_events_sent: self.log_events_sent.load(Ordering::Relaxed),
            put_logs: self.put_logs.load(Ordering::Relaxed),
        }
    }
}

impl Metrics for CountingMetrics {
    fn record_appended(&self) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
    }

    fn batch_sent(&self, _size: usize) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
    }

    fn record_lost(&self) {
        self.records_lost.fetch_add(1, Ordering::Relaxed);
    }

    fn requeue_failed(&self) {
        self.requeue_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_failed(&self, _error: &(dyn Error + 'static)) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn send_failed(&self, _error: &(dyn Error + 'static)) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn log_events_sent(&self, count: usize) {
        self.log_events_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    fn put_log(&self) {
        self.put_logs.fetch_add(1, Ordering::Relaxed);
    }
}

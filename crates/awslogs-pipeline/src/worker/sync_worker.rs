// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::metrics::Metrics;
use crate::record::{Importance, Record};
use crate::reporter::Reporter;
use crate::sink::SinkHandle;
use crate::worker::Worker;

/// Delivers each record as a one-record batch on the caller's task.
///
/// Concurrent callers are serialized by the sink handle, so the sink still sees one send at
/// a time.
pub struct SyncWorker {
    sink: Arc<SinkHandle>,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<dyn Metrics>,
    running: AtomicBool,
}

impl SyncWorker {
    #[must_use]
    pub fn new(
        sink: Arc<SinkHandle>,
        reporter: Arc<dyn Reporter>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        SyncWorker {
            sink,
            reporter,
            metrics,
            running: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Worker for SyncWorker {
    async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn append(&self, record: Record, _importance: Importance) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("AWSLOGS | Worker not running, dropping record");
            self.metrics.record_lost();
            return;
        }
        self.metrics.record_appended();
        match self.sink.send(vec![record]).await {
            Ok(()) => self.metrics.batch_sent(1),
            Err(e) => {
                self.metrics.flush_failed(&e);
                self.reporter.error("Failed to flush log records", &e);
            }
        }
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery workers.
//!
//! A worker sits between producers and the [`SinkHandle`]:
//!
//! - [`SyncWorker`] sends every record as its own batch before `append` returns.
//! - [`AsyncWorker`] buffers records in a bounded [`queue::RecordQueue`] and delivers them
//!   from one background task, in batches capped by count and by wire size.
//!
//! Neither propagates delivery failures to producers. They are counted through
//! [`Metrics`] and reported through the [`Reporter`].

pub mod async_worker;
pub mod batch;
pub mod queue;
pub mod sync_worker;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::metrics::Metrics;
use crate::record::{Importance, Record};
use crate::reporter::Reporter;
use crate::sink::SinkHandle;

pub use async_worker::AsyncWorker;
pub use sync_worker::SyncWorker;

#[async_trait]
pub trait Worker: Send + Sync {
    /// Begins accepting records. Calling it again while running does nothing.
    async fn start(&self);

    /// Delivers whatever is still pending and stops accepting records. Returns once
    /// delivery has finished. Calling it while stopped does nothing.
    async fn stop(&self);

    /// Hands one record to the worker. Never fails; records that cannot be accepted are
    /// counted as lost.
    async fn append(&self, record: Record, importance: Importance);
}

/// Synchronous worker when `config.max_flush_interval` is unset, asynchronous otherwise.
#[must_use]
pub fn build(
    config: WorkerConfig,
    sink: Arc<SinkHandle>,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<dyn Metrics>,
) -> Box<dyn Worker> {
    match config.max_flush_interval {
        Some(_) => Box::new(AsyncWorker::new(config, sink, reporter, metrics)),
        None => Box::new(SyncWorker::new(sink, reporter, metrics)),
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch destinations.
//!
//! A [`Sink`] receives whole batches from a worker and delivers each one in a single remote
//! call. Two destinations exist:
//!
//! ```text
//!                 ┌────────────────────┐
//!   Worker ─────> │     SinkHandle     │  lazy, built once on first send
//!                 └─────────┬──────────┘
//!                           │ OutputType
//!              ┌────────────┴─────────────┐
//!              v                          v
//!   ┌────────────────────┐     ┌────────────────────┐
//!   │   CloudWatchSink   │     │  ObjectStoreSink   │
//!   │ ordered, sequenced │     │ one object / batch │
//!   └────────────────────┘     └────────────────────┘
//! ```
//!
//! Sinks are driven by exactly one caller at a time: the background task of an asynchronous
//! worker, or the handle's mutex in synchronous mode. They therefore take `&mut self` and
//! keep their state without further locking.

pub mod cloudwatch;
pub mod handle;
pub mod object_store;
pub mod ordering;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::client::ClientFactory;
use crate::config::{ClientProperties, OutputType};
use crate::errors::SinkError;
use crate::metrics::Metrics;
use crate::record::Record;

pub use handle::SinkHandle;

#[async_trait]
pub trait Sink: Send {
    /// Delivers one batch. An empty batch is a no-op.
    async fn send(&mut self, records: Vec<Record>) -> Result<(), SinkError>;

    /// Releases the underlying client. The sink is not used afterwards.
    async fn close(&mut self);
}

/// Builds the sink selected by `properties.output_type`, provisioning remote resources
/// where the destination needs them.
pub async fn build(
    factory: &dyn ClientFactory,
    properties: &ClientProperties,
    metrics: Arc<dyn Metrics>,
) -> Result<Box<dyn Sink>, SinkError> {
    debug!(
        "AWSLOGS | Creating {:?} sink for {}/{}",
        properties.output_type, properties.log_group_name, properties.log_stream_name
    );
    match properties.output_type {
        OutputType::Cloudwatch => {
            let client = factory
                .cloudwatch_logs(properties)
                .map_err(SinkError::Client)?;
            let sink = cloudwatch::CloudWatchSink::connect(client, properties, metrics).await;
            Ok(Box::new(sink))
        }
        OutputType::S3 => {
            let client = factory
                .object_store(properties)
                .map_err(SinkError::Client)?;
            Ok(Box::new(object_store::ObjectStoreSink::new(
                client, properties, metrics,
            )))
        }
    }
}

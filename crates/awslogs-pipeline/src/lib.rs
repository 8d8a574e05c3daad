// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Asynchronous delivery pipeline for application log records.
//!
//! Records produced by the application are handed to a [`worker::Worker`], which either
//! forwards each one immediately (synchronous mode) or buffers them in a bounded queue that a
//! single background task flushes in size- and time-bounded batches (asynchronous mode).
//! Batches are delivered through a [`sink::Sink`]:
//!
//! - [`sink::cloudwatch::CloudWatchSink`] appends to a sequenced log stream, keeping
//!   timestamps monotonic and following the service's sequence-token protocol.
//! - [`sink::object_store::ObjectStoreSink`] writes one JSON object per batch to a bucket.
//!
//! The [`appender::Appender`] ties configuration, sink and worker together and owns their
//! lifecycle.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod appender;
pub mod client;
pub mod config;
pub mod constants;
pub mod errors;
pub mod metrics;
pub mod path_template;
pub mod record;
pub mod reporter;
pub mod sink;
pub mod worker;

pub use appender::{Appender, LogEvent};
pub use config::AppenderConfig;
pub use errors::{ApiError, ConfigError, SinkError};
pub use record::{Importance, Record};

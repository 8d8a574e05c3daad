// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Limits imposed by the CloudWatch Logs `PutLogEvents` API and pipeline defaults.
//!
//! See <https://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_PutLogEvents.html>.

/// Fixed protocol overhead, in bytes, charged for every event in a `PutLogEvents` call.
///
/// The wire size of a record is `utf8_len(message) + EVENT_SIZE_PADDING`. This value is
/// only used for batch-size accounting; queue capacity is counted in records.
pub const EVENT_SIZE_PADDING: usize = 26;

/// Maximum wire size of a single event (256 KiB).
///
/// Messages that would exceed it are truncated by the appender and suffixed with
/// [`TRUNCATION_SUFFIX`].
pub const MAX_EVENT_SIZE_BYTES: usize = 262_144;

/// Maximum cumulative wire size of one batch (1 MiB).
///
/// Batches drained from the queue are shrunk from the tail until they fit; the removed
/// records go back to the front of the queue for the next flush.
pub const MAX_BATCH_SIZE_BYTES: usize = 1_048_576;

/// Maximum number of events accepted in one batch.
pub const MAX_BATCH_LOG_EVENTS: usize = 10_000;

/// Appended to messages cut down to [`MAX_EVENT_SIZE_BYTES`].
pub const TRUNCATION_SUFFIX: &str = "...";

pub const DEFAULT_MAX_BATCH_LOG_EVENTS: usize = 50;
pub const DEFAULT_MAX_BLOCK_TIME_MILLIS: u64 = 5_000;
pub const DEFAULT_LOG_GROUP_NAME: &str = "awslogs";
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Object key template used when no bucket path is configured.
pub const DEFAULT_BUCKET_PATH: &str =
    "logs/log_group=%{log_group}/date=%{date}/log_stream=%{log_stream}/%{uuid}.log";

pub const CONTENT_TYPE_APPLICATION_JSON: &str = "application/json";

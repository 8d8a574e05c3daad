// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Appender configuration.
//!
//! [`AppenderConfig`] is what the host hands over, either deserialized with serde or read
//! from `AWSLOGS_*` environment variables through [`AppenderConfig::from_env`]. At start it
//! is resolved into a [`WorkerConfig`] for the delivery worker and a [`ClientProperties`]
//! for the sink and the remote client factory.

use chrono::{DateTime, FixedOffset, Local, SecondsFormat, TimeZone as _, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_COMPRESSION_LEVEL, DEFAULT_MAX_BATCH_LOG_EVENTS, DEFAULT_MAX_BLOCK_TIME_MILLIS,
    EVENT_SIZE_PADDING, MAX_BATCH_LOG_EVENTS, MAX_BATCH_SIZE_BYTES, MAX_EVENT_SIZE_BYTES,
    TRUNCATION_SUFFIX,
};
use crate::errors::ConfigError;

const ENV_PREFIX: &str = "AWSLOGS_";

/// Destination selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Sequenced CloudWatch Logs stream.
    #[default]
    #[serde(alias = "stream")]
    Cloudwatch,
    /// One object per flush in an S3 bucket.
    #[serde(alias = "object-storage", alias = "object_storage")]
    S3,
}

impl FromStr for OutputType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloudwatch" | "stream" => Ok(OutputType::Cloudwatch),
            "s3" | "object-storage" | "object_storage" => Ok(OutputType::S3),
            other => Err(ConfigError::UnknownOutputType(other.to_string())),
        }
    }
}

/// Layout of the JSON document written per object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// One JSON object per line.
    #[default]
    JsonHive,
    /// `[ ... ]`
    JsonArray,
    /// `{"Records": [ ... ]}`
    JsonRecordsArray,
}

impl FromStr for FileFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json_hive" => Ok(FileFormat::JsonHive),
            "json_array" => Ok(FileFormat::JsonArray),
            "json_records_array" => Ok(FileFormat::JsonRecordsArray),
            other => Err(ConfigError::InvalidValue {
                field: "file_format",
                reason: format!("unknown file format {other}"),
            }),
        }
    }
}

/// How messages are embedded in object bodies. Unset means "detect per message".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "plain" => Ok(LogFormat::Text),
            other => Err(ConfigError::InvalidValue {
                field: "log_format",
                reason: format!("unknown log format {other}"),
            }),
        }
    }
}

/// Zone used to render `%{date}` tokens and `@timestamp` fields.
///
/// Accepts `UTC`, `local`, IANA names (`Europe/Paris`) and fixed offsets (`+02:00`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeZone {
    Utc,
    Local,
    Named(Tz),
    Fixed(FixedOffset),
}

impl FromStr for TimeZone {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "utc" | "z" | "gmt" | "etc/utc" => return Ok(TimeZone::Utc),
            "local" | "system" => return Ok(TimeZone::Local),
            _ => {}
        }
        if let Ok(zone) = trimmed.parse::<Tz>() {
            return Ok(TimeZone::Named(zone));
        }
        let offset = trimmed
            .strip_prefix("UTC")
            .or_else(|| trimmed.strip_prefix("GMT"))
            .unwrap_or(trimmed);
        parse_offset(offset)
            .map(TimeZone::Fixed)
            .ok_or_else(|| ConfigError::UnknownTimeZone(s.to_string()))
    }
}

fn parse_offset(offset: &str) -> Option<FixedOffset> {
    let (sign, rest) = match offset.as_bytes().first()? {
        b'+' => (1, &offset[1..]),
        b'-' => (-1, &offset[1..]),
        _ => return None,
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl TimeZone {
    /// `yyyy-MM-dd` of `instant` in this zone.
    #[must_use]
    pub fn format_date(&self, instant: DateTime<Utc>) -> String {
        self.format(instant, "%Y-%m-%d")
    }

    #[must_use]
    pub fn format(&self, instant: DateTime<Utc>, pattern: &str) -> String {
        match self {
            TimeZone::Utc => instant.format(pattern).to_string(),
            TimeZone::Local => instant.with_timezone(&Local).format(pattern).to_string(),
            TimeZone::Named(zone) => instant.with_timezone(zone).format(pattern).to_string(),
            TimeZone::Fixed(offset) => instant.with_timezone(offset).format(pattern).to_string(),
        }
    }

    /// ISO-8601 timestamp with offset for an epoch-millisecond value.
    #[must_use]
    pub fn iso_timestamp(&self, epoch_millis: i64) -> String {
        let instant = Utc
            .timestamp_millis_opt(epoch_millis)
            .single()
            .unwrap_or_default();
        match self {
            TimeZone::Utc => instant.to_rfc3339_opts(SecondsFormat::Millis, true),
            TimeZone::Local => instant
                .with_timezone(&Local)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            TimeZone::Named(zone) => instant
                .with_timezone(zone)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            TimeZone::Fixed(offset) => instant
                .with_timezone(offset)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Configuration consumed from the host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    pub log_group_name: Option<String>,
    pub log_stream_name: Option<String>,
    /// Supports `%{uuid}` and `%{datetime}`, both fixed for the life of the process.
    pub log_stream_name_pattern: Option<String>,
    pub log_stream_uuid_prefix: Option<String>,
    pub log_region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Records per remote call, 1..=10000.
    pub max_batch_log_events: usize,
    /// 0 selects synchronous delivery on the caller's task.
    pub max_flush_time_millis: u64,
    pub max_block_time_millis: u64,
    /// Defaults to twice `max_batch_log_events`.
    pub max_queue_size: Option<usize>,
    /// Defaults to one and a half times `max_batch_log_events`.
    pub discard_threshold: Option<usize>,
    pub max_batch_size_bytes: usize,
    pub max_event_size_bytes: usize,
    pub retention_time_days: u32,
    pub verbose: bool,
    pub log_output_type: OutputType,
    pub bucket_name: Option<String>,
    pub bucket_path: Option<String>,
    pub file_format: FileFormat,
    pub log_format: Option<LogFormat>,
    pub compression_level: u32,
    pub timezone: Option<String>,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        AppenderConfig {
            log_group_name: None,
            log_stream_name: None,
            log_stream_name_pattern: None,
            log_stream_uuid_prefix: None,
            log_region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            max_batch_log_events: DEFAULT_MAX_BATCH_LOG_EVENTS,
            max_flush_time_millis: 0,
            max_block_time_millis: DEFAULT_MAX_BLOCK_TIME_MILLIS,
            max_queue_size: None,
            discard_threshold: None,
            max_batch_size_bytes: MAX_BATCH_SIZE_BYTES,
            max_event_size_bytes: MAX_EVENT_SIZE_BYTES,
            retention_time_days: 0,
            verbose: true,
            log_output_type: OutputType::default(),
            bucket_name: None,
            bucket_path: None,
            file_format: FileFormat::default(),
            log_format: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            timezone: None,
        }
    }
}

impl AppenderConfig {
    /// Reads `AWSLOGS_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AppenderConfig::from_env`] with an arbitrary variable source.
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
        };
        let mut config = AppenderConfig::default();

        config.log_group_name = get("LOG_GROUP_NAME");
        config.log_stream_name = get("LOG_STREAM_NAME");
        config.log_stream_name_pattern = get("LOG_STREAM_NAME_PATTERN");
        config.log_stream_uuid_prefix = get("LOG_STREAM_UUID_PREFIX");
        config.log_region = get("LOG_REGION");
        config.endpoint = get("ENDPOINT");
        config.access_key_id = get("ACCESS_KEY_ID");
        config.secret_access_key = get("SECRET_ACCESS_KEY");
        config.bucket_name = get("BUCKET_NAME");
        config.bucket_path = get("BUCKET_PATH");
        config.timezone = get("TIMEZONE");

        if let Some(value) = get("MAX_BATCH_LOG_EVENTS") {
            config.max_batch_log_events = parse_number("max_batch_log_events", &value)?;
        }
        if let Some(value) = get("MAX_FLUSH_TIME_MILLIS") {
            config.max_flush_time_millis = parse_number("max_flush_time_millis", &value)?;
        }
        if let Some(value) = get("MAX_BLOCK_TIME_MILLIS") {
            config.max_block_time_millis = parse_number("max_block_time_millis", &value)?;
        }
        if let Some(value) = get("MAX_QUEUE_SIZE") {
            config.max_queue_size = Some(parse_number("max_queue_size", &value)?);
        }
        if let Some(value) = get("DISCARD_THRESHOLD") {
            config.discard_threshold = Some(parse_number("discard_threshold", &value)?);
        }
        if let Some(value) = get("RETENTION_TIME_DAYS") {
            config.retention_time_days = parse_number("retention_time_days", &value)?;
        }
        if let Some(value) = get("COMPRESSION_LEVEL") {
            config.compression_level = parse_number("compression_level", &value)?;
        }
        if let Some(value) = get("VERBOSE") {
            config.verbose = value.to_lowercase() != "false";
        }
        if let Some(value) = get("LOG_OUTPUT_TYPE") {
            config.log_output_type = value.parse()?;
        }
        if let Some(value) = get("FILE_FORMAT") {
            config.file_format = value.parse()?;
        }
        if let Some(value) = get("LOG_FORMAT") {
            config.log_format = Some(value.parse()?);
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_log_events == 0 || self.max_batch_log_events > MAX_BATCH_LOG_EVENTS {
            return Err(ConfigError::InvalidValue {
                field: "max_batch_log_events",
                reason: format!("must be within 1 and {MAX_BATCH_LOG_EVENTS}"),
            });
        }
        if let Some(size) = self.max_queue_size {
            if size < self.max_batch_log_events {
                return Err(ConfigError::InvalidValue {
                    field: "max_queue_size",
                    reason: "must hold at least one full batch".to_string(),
                });
            }
        }
        if self.max_event_size_bytes <= EVENT_SIZE_PADDING + TRUNCATION_SUFFIX.len() {
            return Err(ConfigError::InvalidValue {
                field: "max_event_size_bytes",
                reason: format!(
                    "must be larger than {}",
                    EVENT_SIZE_PADDING + TRUNCATION_SUFFIX.len()
                ),
            });
        }
        if self.max_batch_size_bytes < self.max_event_size_bytes {
            return Err(ConfigError::InvalidValue {
                field: "max_batch_size_bytes",
                reason: "must fit at least one maximum-size event".to_string(),
            });
        }
        if self.compression_level > 9 {
            return Err(ConfigError::InvalidValue {
                field: "compression_level",
                reason: "must be within 0 and 9".to_string(),
            });
        }
        if self.log_output_type == OutputType::S3 && self.bucket_name.is_none() {
            return Err(ConfigError::Missing("bucket_name"));
        }
        self.time_zone()?;
        Ok(())
    }

    /// Zone for date tokens; the host zone when unset.
    pub fn time_zone(&self) -> Result<TimeZone, ConfigError> {
        self.timezone
            .as_deref()
            .map_or(Ok(TimeZone::Local), str::parse)
    }

    #[must_use]
    pub fn worker_config(&self) -> WorkerConfig {
        let max_batch_size = self.max_batch_log_events;
        WorkerConfig {
            max_batch_size,
            max_flush_interval: (self.max_flush_time_millis > 0)
                .then(|| Duration::from_millis(self.max_flush_time_millis)),
            max_block: Duration::from_millis(self.max_block_time_millis),
            queue_capacity: self.max_queue_size.unwrap_or(max_batch_size * 2),
            discard_threshold: self
                .discard_threshold
                .unwrap_or(max_batch_size + max_batch_size / 2),
            max_batch_bytes: self.max_batch_size_bytes,
        }
    }
}

fn parse_number<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field,
        reason: format!("{value:?} is not a valid number"),
    })
}

/// Settings of the delivery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub max_batch_size: usize,
    /// `None` means synchronous delivery.
    pub max_flush_interval: Option<Duration>,
    pub max_block: Duration,
    pub queue_capacity: usize,
    pub discard_threshold: usize,
    pub max_batch_bytes: usize,
}

impl WorkerConfig {
    /// Asynchronous settings with the default queue sizing for `max_batch_size`.
    #[must_use]
    pub fn asynchronous(max_batch_size: usize, max_flush_interval: Duration) -> Self {
        WorkerConfig {
            max_batch_size,
            max_flush_interval: Some(max_flush_interval),
            max_block: Duration::from_millis(DEFAULT_MAX_BLOCK_TIME_MILLIS),
            queue_capacity: max_batch_size * 2,
            discard_threshold: max_batch_size + max_batch_size / 2,
            max_batch_bytes: MAX_BATCH_SIZE_BYTES,
        }
    }
}

/// Resolved destination settings handed to sinks and to the client factory.
#[derive(Debug, Clone)]
pub struct ClientProperties {
    pub log_group_name: String,
    pub log_stream_name: String,
    pub log_region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub retention_time_days: u32,
    pub verbose: bool,
    pub output_type: OutputType,
    pub bucket_name: Option<String>,
    pub bucket_path: Option<String>,
    pub file_format: FileFormat,
    pub log_format: Option<LogFormat>,
    pub compression_level: u32,
    pub time_zone: TimeZone,
}

impl ClientProperties {
    /// Properties for a stream destination with every optional setting left unset.
    #[must_use]
    pub fn new(log_group_name: impl Into<String>, log_stream_name: impl Into<String>) -> Self {
        ClientProperties {
            log_group_name: log_group_name.into(),
            log_stream_name: log_stream_name.into(),
            log_region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            retention_time_days: 0,
            verbose: true,
            output_type: OutputType::Cloudwatch,
            bucket_name: None,
            bucket_path: None,
            file_format: FileFormat::JsonHive,
            log_format: None,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            time_zone: TimeZone::Utc,
        }
    }
}

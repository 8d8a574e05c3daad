// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry point for hosts.
//!
//! An [`Appender`] owns the configuration, one [`SinkHandle`] and one [`Worker`]. The sink
//! is built lazily by the first delivery, so `start` never waits on the network.
//!
//! ```rust,ignore
//! let appender = Appender::new(AppenderConfig::from_env()?, factory);
//! appender.start().await?;
//! appender.append(LogEvent::new(Level::INFO, "hello")).await;
//! appender.stop().await;
//! ```

use chrono::{DateTime, Utc};
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tracing::{debug, Level};
use uuid::Uuid;

use crate::client::ClientFactory;
use crate::config::{AppenderConfig, ClientProperties, TimeZone};
use crate::constants::DEFAULT_LOG_GROUP_NAME;
use crate::errors::ConfigError;
use crate::metrics::{self, Metrics};
use crate::path_template::PathTemplate;
use crate::record::{Importance, Record};
use crate::reporter::{tracing_reporter, Reporter};
use crate::sink::SinkHandle;
use crate::worker::{self, Worker};

const STREAM_DATETIME_FORMAT: &str = "%Y%m%dT%H%M%S";

/// A formatted event handed over by the host logging framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub level: Level,
    pub message: String,
}

impl LogEvent {
    /// An event stamped with the current time.
    #[must_use]
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self::at(Utc::now().timestamp_millis(), level, message)
    }

    #[must_use]
    pub fn at(timestamp: i64, level: Level, message: impl Into<String>) -> Self {
        LogEvent {
            timestamp,
            level,
            message: message.into(),
        }
    }

    /// `WARN` and `ERROR` events survive the discard threshold.
    #[must_use]
    pub fn importance(&self) -> Importance {
        if self.level <= Level::WARN {
            Importance::Important
        } else {
            Importance::Normal
        }
    }
}

/// Identifiers fixed once per process, shared by every appender.
struct Startup {
    id: String,
    instant: DateTime<Utc>,
}

fn startup() -> &'static Startup {
    static STARTUP: OnceLock<Startup> = OnceLock::new();
    STARTUP.get_or_init(|| Startup {
        id: Uuid::new_v4().to_string(),
        instant: Utc::now(),
    })
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

struct Active {
    worker: Box<dyn Worker>,
    sink: Arc<SinkHandle>,
    max_event_size: usize,
}

pub struct Appender {
    config: AppenderConfig,
    factory: Arc<dyn ClientFactory>,
    reporter: Arc<dyn Reporter>,
    metrics: Arc<dyn Metrics>,
    active: RwLock<Option<Active>>,
}

impl Appender {
    /// An appender reporting through `tracing` and counting nothing.
    #[must_use]
    pub fn new(config: AppenderConfig, factory: Arc<dyn ClientFactory>) -> Self {
        Appender {
            config,
            factory,
            reporter: tracing_reporter(),
            metrics: metrics::noop(),
            active: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AppenderConfig {
        &self.config
    }

    pub async fn is_started(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Validates the configuration, resolves the destination and starts the worker.
    /// Does nothing if already started.
    pub async fn start(&self) -> Result<(), ConfigError> {
        let mut active = self.active.write().await;
        if active.is_some() {
            debug!("AWSLOGS | Appender already started");
            return Ok(());
        }
        self.config.validate()?;
        let properties = self.client_properties()?;
        debug!(
            "AWSLOGS | Starting appender for {}/{} ({:?})",
            properties.log_group_name, properties.log_stream_name, properties.output_type
        );

        let sink = Arc::new(SinkHandle::lazy(
            self.factory.clone(),
            properties,
            self.metrics.clone(),
        ));
        let worker = worker::build(
            self.config.worker_config(),
            sink.clone(),
            self.reporter.clone(),
            self.metrics.clone(),
        );
        worker.start().await;

        *active = Some(Active {
            worker,
            sink,
            max_event_size: self.config.max_event_size_bytes,
        });
        Ok(())
    }

    /// Destination settings derived from the configuration. Missing names fall back to
    /// defaults with a warning.
    pub fn client_properties(&self) -> Result<ClientProperties, ConfigError> {
        let time_zone = self.config.time_zone()?;
        let log_group_name = match non_blank(&self.config.log_group_name) {
            Some(name) => name.to_string(),
            None => {
                self.reporter.warn(&format!(
                    "No log group name configured, using {DEFAULT_LOG_GROUP_NAME}"
                ));
                DEFAULT_LOG_GROUP_NAME.to_string()
            }
        };
        let log_stream_name = self.resolve_stream_name(time_zone);

        let config = &self.config;
        Ok(ClientProperties {
            log_group_name,
            log_stream_name,
            log_region: config.log_region.clone(),
            endpoint: config.endpoint.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            retention_time_days: config.retention_time_days,
            verbose: config.verbose,
            output_type: config.log_output_type,
            bucket_name: config.bucket_name.clone(),
            bucket_path: config.bucket_path.clone(),
            file_format: config.file_format,
            log_format: config.log_format,
            compression_level: config.compression_level,
            time_zone,
        })
    }

    fn resolve_stream_name(&self, time_zone: TimeZone) -> String {
        let startup = startup();
        let datetime = time_zone.format(startup.instant, STREAM_DATETIME_FORMAT);

        if let Some(name) = non_blank(&self.config.log_stream_name) {
            return name.to_string();
        }
        if let Some(pattern) = non_blank(&self.config.log_stream_name_pattern) {
            return PathTemplate::parse(pattern).render(|token| match token {
                "uuid" => Some(startup.id.clone()),
                "datetime" => Some(datetime.clone()),
                _ => None,
            });
        }
        if let Some(prefix) = non_blank(&self.config.log_stream_uuid_prefix) {
            return format!("{prefix}{}", startup.id);
        }
        self.reporter
            .warn(&format!("No log stream name configured, using {datetime}"));
        datetime
    }

    /// Hands `event` to the worker. Oversized messages are truncated; events arriving while
    /// the appender is stopped are counted as lost.
    pub async fn append(&self, event: LogEvent) {
        let active = self.active.read().await;
        let Some(active) = active.as_ref() else {
            debug!("AWSLOGS | Appender not started, dropping event");
            self.metrics.record_lost();
            return;
        };

        let importance = event.importance();
        let (record, truncated) =
            Record::bounded(event.timestamp, event.message, active.max_event_size);
        if truncated {
            self.reporter.warn(&format!(
                "Log event exceeds {} bytes and was truncated",
                active.max_event_size
            ));
        }
        active.worker.append(record, importance).await;
    }

    /// Delivers pending records, then closes the sink. Does nothing if not started.
    pub async fn stop(&self) {
        let mut active = self.active.write().await;
        let Some(Active { worker, sink, .. }) = active.take() else {
            return;
        };
        worker.stop().await;
        sink.close().await;
        debug!("AWSLOGS | Appender stopped");
    }
}

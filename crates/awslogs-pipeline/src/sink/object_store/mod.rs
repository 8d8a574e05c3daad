// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bucket destination: every batch becomes one new object.
//!
//! The key comes from the configured path template. Recognized tokens:
//!
//! | Token            | Value                                        |
//! |------------------|----------------------------------------------|
//! | `%{log_group}`   | log group name                               |
//! | `%{log_stream}`  | log stream name                              |
//! | `%{date}`        | `yyyy-MM-dd` in the configured time zone     |
//! | `%{uuid}`        | random v4 UUID                               |
//! | `%{counter}`     | per-sink counter, 20 digits, zero padded     |
//! | `%{millis}`      | wall clock milliseconds, 20 digits           |
//! | `%{nanos}`       | wall clock nanoseconds, 20 digits            |
//!
//! Unknown tokens render as empty strings. A key ending in `.gz` gets a gzip body.

mod body;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::client::{ObjectStoreApi, PutObjectRequest};
use crate::config::ClientProperties;
use crate::constants::{CONTENT_TYPE_APPLICATION_JSON, DEFAULT_BUCKET_PATH};
use crate::errors::SinkError;
use crate::metrics::Metrics;
use crate::path_template::PathTemplate;
use crate::record::Record;
use crate::sink::Sink;

pub use body::{gzip, BodyFormat};

const GZIP_EXTENSION: &str = ".gz";

pub struct ObjectStoreSink {
    client: Arc<dyn ObjectStoreApi>,
    bucket: String,
    template: PathTemplate,
    log_group_name: String,
    log_stream_name: String,
    format: BodyFormat,
    compression_level: u32,
    counter: u64,
    metrics: Arc<dyn Metrics>,
}

impl ObjectStoreSink {
    #[must_use]
    pub fn new(
        client: Arc<dyn ObjectStoreApi>,
        properties: &ClientProperties,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        let path = properties
            .bucket_path
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(DEFAULT_BUCKET_PATH);
        ObjectStoreSink {
            client,
            bucket: properties.bucket_name.clone().unwrap_or_default(),
            template: PathTemplate::parse(path),
            log_group_name: properties.log_group_name.clone(),
            log_stream_name: properties.log_stream_name.clone(),
            format: BodyFormat {
                file_format: properties.file_format,
                log_format: properties.log_format,
                time_zone: properties.time_zone,
            },
            compression_level: properties.compression_level.min(9),
            counter: 0,
            metrics,
        }
    }

    /// Renders the key for the next object. Advances `%{counter}` once per occurrence.
    pub fn next_key(&mut self) -> String {
        let now = Utc::now();
        self.template.render(|token| match token {
            "log_group" => Some(self.log_group_name.clone()),
            "log_stream" => Some(self.log_stream_name.clone()),
            "date" => Some(self.format.time_zone.format_date(now)),
            "uuid" => Some(Uuid::new_v4().to_string()),
            "counter" => {
                let value = self.counter;
                self.counter += 1;
                Some(format!("{value:020}"))
            }
            "millis" => Some(format!("{:020}", now.timestamp_millis())),
            "nanos" => Some(format!("{:020}", now.timestamp_nanos_opt().unwrap_or_default())),
            _ => None,
        })
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn send(&mut self, records: Vec<Record>) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let key = self.next_key();
        let mut body = self.format.render(&records)?;
        if key.ends_with(GZIP_EXTENSION) {
            body = gzip(&body, self.compression_level)?;
        }
        debug!(
            "AWSLOGS | Writing {} records ({} bytes) to {}/{}",
            records.len(),
            body.len(),
            self.bucket,
            key
        );

        let request = PutObjectRequest {
            bucket: self.bucket.clone(),
            key: key.clone(),
            body,
            content_type: CONTENT_TYPE_APPLICATION_JSON,
        };
        self.client.put_object(request).await.map_err(|source| {
            self.metrics.send_failed(&source);
            SinkError::PutObject { key, source }
        })
    }

    async fn close(&mut self) {
        self.client.close().await;
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote service capabilities used by the sinks.
//!
//! The pipeline does not speak the wire protocol itself. Whatever SDK the host uses is
//! wrapped behind [`CloudWatchLogsApi`] or [`ObjectStoreApi`] and mapped onto
//! [`ApiError`] so the sinks can apply the sequencing rules independently of the client.

pub mod memory;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ClientProperties;
use crate::errors::ApiError;
use crate::record::Record;

#[derive(Debug, Clone, Copy)]
pub struct PutLogEventsRequest<'a> {
    pub log_group_name: &'a str,
    pub log_stream_name: &'a str,
    pub sequence_token: Option<&'a str>,
    pub log_events: &'a [Record],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutLogEventsResponse {
    pub next_sequence_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

/// Operations of a CloudWatch-Logs-like sequenced log service.
///
/// Implementations must report an existing group or stream as
/// [`ApiError::ResourceAlreadyExists`], and a token conflict as
/// [`ApiError::InvalidSequenceToken`] or [`ApiError::DataAlreadyAccepted`] carrying the token
/// the service expects next.
#[async_trait]
pub trait CloudWatchLogsApi: Send + Sync {
    async fn create_log_group(&self, log_group_name: &str) -> Result<(), ApiError>;

    async fn put_retention_policy(
        &self,
        log_group_name: &str,
        retention_in_days: u32,
    ) -> Result<(), ApiError>;

    async fn create_log_stream(
        &self,
        log_group_name: &str,
        log_stream_name: &str,
    ) -> Result<(), ApiError>;

    async fn put_log_events(
        &self,
        request: PutLogEventsRequest<'_>,
    ) -> Result<PutLogEventsResponse, ApiError>;

    /// Releases connections. Called once when the owning sink is closed.
    async fn close(&self) {}
}

#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    async fn put_object(&self, request: PutObjectRequest) -> Result<(), ApiError>;

    async fn close(&self) {}
}

/// Builds remote clients from resolved properties (region, endpoint, credentials).
///
/// Called lazily on the first delivery, never on the producer's path.
pub trait ClientFactory: Send + Sync {
    fn cloudwatch_logs(
        &self,
        properties: &ClientProperties,
    ) -> Result<Arc<dyn CloudWatchLogsApi>, ApiError>;

    fn object_store(&self, properties: &ClientProperties)
        -> Result<Arc<dyn ObjectStoreApi>, ApiError>;
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sequenced log stream destination.
//!
//! The remote stream accepts an append only when it carries the sequence token returned by
//! the previous append, and only when its events are in chronological order. This sink owns
//! both pieces of state:
//!
//! - the current **sequence token**, replaced by whatever the service returns, and
//! - a [`TimestampFloor`] that sorts each batch and promotes late records.
//!
//! # Token conflicts
//!
//! | Response                 | Action                                          |
//! |--------------------------|-------------------------------------------------|
//! | success                  | adopt the returned token                        |
//! | `DataAlreadyAccepted`    | adopt the expected token, treat as delivered    |
//! | `InvalidSequenceToken`   | adopt the expected token, resend once           |
//! | anything else            | count a send failure, fail the flush            |
//!
//! A second `InvalidSequenceToken` in a row fails the flush with
//! [`SinkError::SequenceTokenRetryExhausted`] rather than retrying forever.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{CloudWatchLogsApi, PutLogEventsRequest};
use crate::config::ClientProperties;
use crate::errors::{ApiError, SinkError};
use crate::metrics::Metrics;
use crate::record::Record;
use crate::sink::ordering::TimestampFloor;
use crate::sink::Sink;

pub struct CloudWatchSink {
    client: Arc<dyn CloudWatchLogsApi>,
    log_group_name: String,
    log_stream_name: String,
    sequence_token: Option<String>,
    floor: TimestampFloor,
    metrics: Arc<dyn Metrics>,
}

impl CloudWatchSink {
    /// Creates the sink without touching the remote service.
    #[must_use]
    pub fn new(
        client: Arc<dyn CloudWatchLogsApi>,
        log_group_name: impl Into<String>,
        log_stream_name: impl Into<String>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        CloudWatchSink {
            client,
            log_group_name: log_group_name.into(),
            log_stream_name: log_stream_name.into(),
            sequence_token: None,
            floor: TimestampFloor::new(),
            metrics,
        }
    }

    /// Provisions the log group and stream, then creates the sink.
    ///
    /// Provisioning never fails the construction: resources that already exist are fine,
    /// and any other failure is logged and left for the first send to surface.
    pub async fn connect(
        client: Arc<dyn CloudWatchLogsApi>,
        properties: &ClientProperties,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        provision(client.as_ref(), properties).await;
        Self::new(
            client,
            properties.log_group_name.as_str(),
            properties.log_stream_name.as_str(),
            metrics,
        )
    }

    #[must_use]
    pub fn sequence_token(&self) -> Option<&str> {
        self.sequence_token.as_deref()
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.floor.last_timestamp()
    }

    fn fail(&self, error: ApiError) -> SinkError {
        self.metrics.send_failed(&error);
        match error {
            ApiError::InvalidSequenceToken { .. } => SinkError::SequenceTokenRetryExhausted(error),
            other => SinkError::PutLogEvents(other),
        }
    }
}

#[async_trait]
impl Sink for CloudWatchSink {
    async fn send(&mut self, records: Vec<Record>) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let events = self.floor.apply(records);

        let mut retried = false;
        loop {
            let request = PutLogEventsRequest {
                log_group_name: &self.log_group_name,
                log_stream_name: &self.log_stream_name,
                sequence_token: self.sequence_token.as_deref(),
                log_events: &events,
            };
            match self.client.put_log_events(request).await {
                Ok(response) => {
                    self.sequence_token = response.next_sequence_token;
                    return Ok(());
                }
                Err(ApiError::DataAlreadyAccepted {
                    expected_sequence_token,
                }) => {
                    debug!(
                        "AWSLOGS | Batch of {} events already accepted by {}/{}",
                        events.len(),
                        self.log_group_name,
                        self.log_stream_name
                    );
                    self.sequence_token = expected_sequence_token;
                    return Ok(());
                }
                Err(ApiError::InvalidSequenceToken {
                    expected_sequence_token,
                }) if !retried => {
                    debug!("AWSLOGS | Sequence token rejected, retrying with the expected token");
                    self.sequence_token = expected_sequence_token;
                    retried = true;
                }
                Err(error) => {
                    if let ApiError::InvalidSequenceToken {
                        expected_sequence_token,
                    } = &error
                    {
                        self.sequence_token.clone_from(expected_sequence_token);
                    }
                    return Err(self.fail(error));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.client.close().await;
    }
}

async fn provision(client: &dyn CloudWatchLogsApi, properties: &ClientProperties) {
    let group = properties.log_group_name.as_str();
    let stream = properties.log_stream_name.as_str();

    match client.create_log_group(group).await {
        Ok(()) => {
            debug!("AWSLOGS | Created log group {group}");
            if properties.retention_time_days > 0 {
                if let Err(e) = client
                    .put_retention_policy(group, properties.retention_time_days)
                    .await
                {
                    let verbose = properties.verbose;
                    report_provisioning_failure(verbose, "set retention policy", group, &e);
                }
            }
        }
        Err(ApiError::ResourceAlreadyExists) => {
            debug!("AWSLOGS | Log group {group} already exists");
        }
        Err(e) => report_provisioning_failure(properties.verbose, "create log group", group, &e),
    }

    match client.create_log_stream(group, stream).await {
        Ok(()) => debug!("AWSLOGS | Created log stream {group}/{stream}"),
        Err(ApiError::ResourceAlreadyExists) => {
            debug!("AWSLOGS | Log stream {group}/{stream} already exists");
        }
        Err(e) => report_provisioning_failure(
            properties.verbose,
            "create log stream",
            &format!("{group}/{stream}"),
            &e,
        ),
    }
}

fn report_provisioning_failure(verbose: bool, action: &str, target: &str, error: &ApiError) {
    if verbose {
        warn!("AWSLOGS | Failed to {action} {target}: {error}");
    } else {
        debug!("AWSLOGS | Failed to {action} {target}: {error}");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::memory::InMemoryCloudWatchLogs;
    use crate::metrics::CountingMetrics;

    const GROUP: &str = "group";
    const STREAM: &str = "stream";

    async fn connected(
        client: &Arc<InMemoryCloudWatchLogs>,
        metrics: Arc<CountingMetrics>,
    ) -> CloudWatchSink {
        CloudWatchSink::connect(
            client.clone(),
            &ClientProperties::new(GROUP, STREAM),
            metrics,
        )
        .await
    }

    fn invalid_token(expected: &str) -> ApiError {
        ApiError::InvalidSequenceToken {
            expected_sequence_token: Some(expected.to_string()),
        }
    }

    #[tokio::test]
    async fn test_connect_provisions_group_stream_and_retention() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let mut properties = ClientProperties::new(GROUP, STREAM);
        properties.retention_time_days = 14;

        let _sink =
            CloudWatchSink::connect(client.clone(), &properties, crate::metrics::noop()).await;

        assert!(client.has_group(GROUP));
        assert!(client.has_stream(GROUP, STREAM));
        assert_eq!(client.retention(GROUP), Some(14));
    }

    #[tokio::test]
    async fn test_connect_tolerates_existing_resources() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let mut properties = ClientProperties::new(GROUP, STREAM);
        let _first =
            CloudWatchSink::connect(client.clone(), &properties, crate::metrics::noop()).await;

        properties.retention_time_days = 30;
        let mut second =
            CloudWatchSink::connect(client.clone(), &properties, crate::metrics::noop()).await;

        // Retention is only applied to a group this sink created.
        assert_eq!(client.retention(GROUP), None);
        second.send(vec![Record::new(1, "still works")]).await.unwrap();
        assert_eq!(client.events(GROUP, STREAM).len(), 1);
    }

    #[tokio::test]
    async fn test_send_adopts_returned_token() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let mut sink = connected(&client, Arc::new(CountingMetrics::new())).await;
        assert_eq!(sink.sequence_token(), None);

        sink.send(vec![Record::new(1, "a")]).await.unwrap();
        let first = sink.sequence_token().map(str::to_string);
        assert!(first.is_some());

        sink.send(vec![Record::new(2, "b")]).await.unwrap();
        assert_ne!(sink.sequence_token().map(str::to_string), first);
        assert_eq!(client.put_calls(), 2);
    }

    #[tokio::test]
    async fn test_send_orders_and_floors_timestamps() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let mut sink = connected(&client, Arc::new(CountingMetrics::new())).await;

        sink.send(vec![Record::new(30, "c"), Record::new(10, "a"), Record::new(20, "b")])
            .await
            .unwrap();
        sink.send(vec![Record::new(5, "late"), Record::new(40, "d")])
            .await
            .unwrap();

        let batches = client.batches(GROUP, STREAM);
        let first: Vec<i64> = batches[0].iter().map(Record::timestamp).collect();
        let second: Vec<i64> = batches[1].iter().map(Record::timestamp).collect();
        assert_eq!(first, vec![10, 20, 30]);
        assert_eq!(second, vec![30, 40]);
        assert_eq!(sink.last_timestamp(), Some(40));
    }

    #[tokio::test]
    async fn test_invalid_token_is_retried_exactly_once() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let metrics = Arc::new(CountingMetrics::new());
        let mut sink = connected(&client, metrics.clone()).await;
        client.set_expected_token(GROUP, STREAM, Some("other-writer"));

        sink.send(vec![Record::new(1, "a")]).await.unwrap();

        assert_eq!(client.put_calls(), 2);
        assert_eq!(client.events(GROUP, STREAM).len(), 1);
        assert_eq!(metrics.snapshot().send_failures, 0);
    }

    #[tokio::test]
    async fn test_repeated_invalid_token_fails_without_looping() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let metrics = Arc::new(CountingMetrics::new());
        let mut sink = connected(&client, metrics.clone()).await;
        client.fail_next_put(invalid_token("t1"));
        client.fail_next_put(invalid_token("t2"));

        let error = sink.send(vec![Record::new(1, "a")]).await.unwrap_err();

        assert!(matches!(error, SinkError::SequenceTokenRetryExhausted(_)));
        assert_eq!(client.put_calls(), 2);
        assert_eq!(sink.sequence_token(), Some("t2"));
        assert_eq!(metrics.snapshot().send_failures, 1);
    }

    #[tokio::test]
    async fn test_data_already_accepted_counts_as_delivered() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let metrics = Arc::new(CountingMetrics::new());
        let mut sink = connected(&client, metrics.clone()).await;
        client.fail_next_put(ApiError::DataAlreadyAccepted {
            expected_sequence_token: Some("t9".to_string()),
        });

        sink.send(vec![Record::new(1, "a")]).await.unwrap();

        assert_eq!(client.put_calls(), 1);
        assert_eq!(sink.sequence_token(), Some("t9"));
        assert_eq!(metrics.snapshot().send_failures, 0);
    }

    #[tokio::test]
    async fn test_other_errors_fail_the_send() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let metrics = Arc::new(CountingMetrics::new());
        let mut sink = connected(&client, metrics.clone()).await;
        client.fail_next_put(ApiError::Transport("connection reset".to_string()));

        let error = sink.send(vec![Record::new(1, "a")]).await.unwrap_err();

        assert!(matches!(
            error,
            SinkError::PutLogEvents(ApiError::Transport(_))
        ));
        assert_eq!(client.put_calls(), 1);
        assert_eq!(metrics.snapshot().send_failures, 1);

        sink.send(vec![Record::new(2, "b")]).await.unwrap();
        assert_eq!(client.events(GROUP, STREAM).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_call() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let mut sink = connected(&client, Arc::new(CountingMetrics::new())).await;
        sink.send(Vec::new()).await.unwrap();
        assert_eq!(client.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_closes_client() {
        let client = Arc::new(InMemoryCloudWatchLogs::new());
        let mut sink = connected(&client, Arc::new(CountingMetrics::new())).await;
        sink.close().await;
        assert!(client.is_closed());
    }
}

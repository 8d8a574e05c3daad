// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::client::ClientFactory;
use crate::config::ClientProperties;
use crate::errors::{ApiError, SinkError};
use crate::metrics::Metrics;
use crate::record::Record;
use crate::sink::{self, Sink};

/// Shared entry point to a sink that is constructed on first use.
///
/// Construction (client creation and provisioning) runs at most once even when several
/// callers race on the first send; a construction that fails is attempted again on the
/// next send. Calls into the sink are serialized by an async mutex, which is what keeps
/// synchronous mode safe with concurrent producers.
pub struct SinkHandle {
    sink: OnceCell<Mutex<Box<dyn Sink>>>,
    source: Option<Source>,
    metrics: Arc<dyn Metrics>,
}

struct Source {
    factory: Arc<dyn ClientFactory>,
    properties: ClientProperties,
}

impl SinkHandle {
    /// A handle that builds its sink from `factory` and `properties` on the first send.
    #[must_use]
    pub fn lazy(
        factory: Arc<dyn ClientFactory>,
        properties: ClientProperties,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        SinkHandle {
            sink: OnceCell::new(),
            source: Some(Source {
                factory,
                properties,
            }),
            metrics,
        }
    }

    /// A handle around an already constructed sink.
    #[must_use]
    pub fn from_sink(sink: Box<dyn Sink>, metrics: Arc<dyn Metrics>) -> Self {
        SinkHandle {
            sink: OnceCell::new_with(Some(Mutex::new(sink))),
            source: None,
            metrics,
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.sink.initialized()
    }

    async fn sink(&self) -> Result<&Mutex<Box<dyn Sink>>, SinkError> {
        self.sink
            .get_or_try_init(|| async {
                let Some(source) = &self.source else {
                    return Err(SinkError::Client(ApiError::ResourceNotFound(
                        "client factory".to_string(),
                    )));
                };
                match sink::build(
                    source.factory.as_ref(),
                    &source.properties,
                    self.metrics.clone(),
                )
                .await
                {
                    Ok(sink) => Ok(Mutex::new(sink)),
                    Err(e) => {
                        if source.properties.verbose {
                            warn!("AWSLOGS | Failed to create sink: {e}");
                        } else {
                            debug!("AWSLOGS | Failed to create sink: {e}");
                        }
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Delivers `records` as one batch, building the sink first if needed.
    pub async fn send(&self, records: Vec<Record>) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }
        let sink = self.sink().await?;
        self.metrics.log_events_sent(records.len());
        self.metrics.put_log();
        sink.lock().await.send(records).await
    }

    /// Closes the sink if it was ever built.
    pub async fn close(&self) {
        if let Some(sink) = self.sink.get() {
            sink.lock().await.close().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::memory::MemoryClients;
    use crate::metrics::CountingMetrics;

    fn handle(clients: &MemoryClients, metrics: Arc<dyn Metrics>) -> SinkHandle {
        SinkHandle::lazy(
            Arc::new(clients.clone()),
            ClientProperties::new("group", "stream"),
            metrics,
        )
    }

    #[tokio::test]
    async fn test_sink_is_built_on_first_send_only() {
        let clients = MemoryClients::new();
        let handle = handle(&clients, crate::metrics::noop());
        assert!(!handle.is_initialized());
        assert_eq!(clients.builds(), 0);

        handle.send(Vec::new()).await.unwrap();
        assert!(!handle.is_initialized());

        handle.send(vec![Record::new(1, "a")]).await.unwrap();
        handle.send(vec![Record::new(2, "b")]).await.unwrap();
        assert!(handle.is_initialized());
        assert_eq!(clients.builds(), 1);
        assert!(clients.logs.has_stream("group", "stream"));
    }

    #[tokio::test]
    async fn test_concurrent_first_sends_build_once() {
        let clients = MemoryClients::new();
        let handle = Arc::new(handle(&clients, crate::metrics::noop()));

        let mut tasks = Vec::new();
        for i in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.send(vec![Record::new(i, format!("m{i}"))]).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(clients.builds(), 1);
        assert_eq!(clients.logs.events("group", "stream").len(), 8);
    }

    #[tokio::test]
    async fn test_send_counts_events_and_calls() {
        let clients = MemoryClients::new();
        let metrics = Arc::new(CountingMetrics::new());
        let handle = handle(&clients, metrics.clone());

        handle
            .send(vec![Record::new(1, "a"), Record::new(2, "b")])
            .await
            .unwrap();
        handle.send(vec![Record::new(3, "c")]).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.log_events_sent, 3);
        assert_eq!(snapshot.put_logs, 2);
    }

    #[tokio::test]
    async fn test_close_before_first_send_does_nothing() {
        let clients = MemoryClients::new();
        let handle = handle(&clients, crate::metrics::noop());
        handle.close().await;
        assert!(!clients.logs.is_closed());

        handle.send(vec![Record::new(1, "a")]).await.unwrap();
        handle.close().await;
        assert!(clients.logs.is_closed());
    }

    #[tokio::test]
    async fn test_provisioning_failure_does_not_prevent_sends() {
        let clients = MemoryClients::new();
        clients
            .logs
            .fail_next_create_log_group(ApiError::Transport("timeout".to_string()));
        let handle = handle(&clients, crate::metrics::noop());

        let error = handle.send(vec![Record::new(1, "a")]).await.unwrap_err();
        assert!(matches!(
            error,
            SinkError::PutLogEvents(ApiError::ResourceNotFound(_))
        ));
        assert!(handle.is_initialized());
        assert_eq!(clients.builds(), 1);
    }
}

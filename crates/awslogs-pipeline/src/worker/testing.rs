// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::errors::{ApiError, SinkError};
use crate::record::Record;
use crate::reporter::Reporter;
use crate::sink::{Sink, SinkHandle};

/// Sink that records every batch and can be told to fail upcoming sends.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    batches: Arc<Mutex<Vec<Vec<Record>>>>,
    failures: Arc<AtomicUsize>,
}

impl RecordingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handle(&self) -> Arc<SinkHandle> {
        Arc::new(SinkHandle::from_sink(
            Box::new(self.clone()),
            crate::metrics::noop(),
        ))
    }

    pub(crate) fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub(crate) fn batches(&self) -> Vec<Vec<Record>> {
        self.batches.lock().unwrap().clone()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.batches()
            .into_iter()
            .flatten()
            .map(|r| r.message().to_string())
            .collect()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    async fn send(&mut self, records: Vec<Record>) -> Result<(), SinkError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SinkError::PutLogEvents(ApiError::Transport(
                "scripted failure".to_string(),
            )));
        }
        self.batches.lock().unwrap().push(records);
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Reporter that keeps every message for later assertions.
#[derive(Default)]
pub(crate) struct CollectingReporter {
    warnings: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl CollectingReporter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn warnings(&self) -> Vec<String> {
        self.warnings.lock().unwrap().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl Reporter for CollectingReporter {
    fn warn(&self, message: &str) {
        self.warnings.lock().unwrap().push(message.to_string());
    }

    fn error(&self, message: &str, cause: &(dyn Error + 'static)) {
        self.errors.lock().unwrap().push(format!("{message}: {cause}"));
    }
}

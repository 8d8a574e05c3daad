// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where the pipeline reports conditions the producer never sees: dropped records, failed
//! flushes, truncated messages. Calls are fire-and-forget and must not block.

use std::error::Error;
use std::sync::Arc;
use tracing::{error, warn};

pub trait Reporter: Send + Sync {
    fn warn(&self, message: &str);
    fn error(&self, message: &str, cause: &(dyn Error + 'static));
}

/// Reports through `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn warn(&self, message: &str) {
        warn!("AWSLOGS | {message}");
    }

    fn error(&self, message: &str, cause: &(dyn Error + 'static)) {
        error!("AWSLOGS | {message}: {cause}");
    }
}

#[must_use]
pub fn tracing_reporter() -> Arc<dyn Reporter> {
    Arc::new(TracingReporter)
}

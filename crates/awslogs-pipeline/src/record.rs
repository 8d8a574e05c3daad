// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{EVENT_SIZE_PADDING, TRUNCATION_SUFFIX};

/// A single log line as it will be delivered: epoch-millisecond timestamp plus the
/// already formatted message.
///
/// Records are immutable once created. Timestamp correction builds a new record through
/// [`Record::with_timestamp`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    timestamp: i64,
    message: String,
}

impl Record {
    #[must_use]
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Record {
            timestamp,
            message: message.into(),
        }
    }

    /// Builds a record whose wire size does not exceed `max_event_size`.
    ///
    /// Returns the record and whether the message had to be truncated. Truncation always
    /// lands on a UTF-8 character boundary and appends `...`.
    #[must_use]
    pub fn bounded(
        timestamp: i64,
        message: impl Into<String>,
        max_event_size: usize,
    ) -> (Self, bool) {
        let mut message = message.into();
        if message.len() + EVENT_SIZE_PADDING <= max_event_size {
            return (Record::new(timestamp, message), false);
        }

        let budget = max_event_size
            .saturating_sub(EVENT_SIZE_PADDING)
            .saturating_sub(TRUNCATION_SUFFIX.len());
        let mut cut = budget.min(message.len());
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push_str(TRUNCATION_SUFFIX);
        (Record::new(timestamp, message), true)
    }

    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Size charged for this record inside a `PutLogEvents` payload.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        self.message.len() + EVENT_SIZE_PADDING
    }

    /// The same message carrying a different timestamp.
    #[must_use]
    pub fn with_timestamp(self, timestamp: i64) -> Self {
        Record { timestamp, ..self }
    }
}

/// Whether a record may be discarded when the queue is under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Importance {
    #[default]
    Normal,
    /// Survives the discard threshold; only dropped if the queue stays full past the block timeout.
    Important,
}

impl Importance {
    #[must_use]
    pub fn is_important(self) -> bool {
        matches!(self, Importance::Important)
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::Record;

/// Keeps outgoing timestamps non-decreasing within and across batches.
///
/// A record older than the newest timestamp already handed out is moved forward to that
/// timestamp instead of being dropped or reordered past its neighbours.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TimestampFloor {
    last_timestamp: Option<i64>,
}

impl TimestampFloor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest timestamp handed out so far.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Sorts `records` by timestamp (stable on ties) and raises every timestamp below the
    /// floor to it.
    #[must_use]
    pub fn apply(&mut self, mut records: Vec<Record>) -> Vec<Record> {
        if records.len() > 1 {
            records.sort_by_key(Record::timestamp);
        }
        records
            .into_iter()
            .map(|record| match self.last_timestamp {
                Some(floor) if record.timestamp() < floor => record.with_timestamp(floor),
                _ => {
                    self.last_timestamp = Some(record.timestamp());
                    record
                }
            })
            .collect()
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

use crate::record::Record;

/// FIFO of pending records bounded by element count.
///
/// Producers block on [`RecordQueue::offer`] until space frees up or their deadline passes.
/// The consumer takes from the front with [`RecordQueue::drain`] and may put records back
/// with [`RecordQueue::requeue_front`].
#[derive(Debug)]
pub struct RecordQueue {
    records: Mutex<VecDeque<Record>>,
    capacity: usize,
    space_available: Notify,
}

impl RecordQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        RecordQueue {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            space_available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Appends `record` if there is room. Returns the new length, or the record back.
    pub fn try_offer(&self, record: Record) -> Result<usize, Record> {
        let mut records = self.lock();
        if records.len() >= self.capacity {
            return Err(record);
        }
        records.push_back(record);
        Ok(records.len())
    }

    /// Appends `record`, waiting for space until `deadline`. Returns the new length, or the
    /// record back if the deadline passed first.
    pub async fn offer(&self, mut record: Record, deadline: Instant) -> Result<usize, Record> {
        loop {
            let notified = self.space_available.notified();
            tokio::pin!(notified);
            // Register before checking so a drain between the check and the wait is seen.
            notified.as_mut().enable();

            match self.try_offer(record) {
                Ok(len) => return Ok(len),
                Err(rejected) => record = rejected,
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(record);
            }
        }
    }

    /// Removes up to `max` records from the front.
    pub fn drain(&self, max: usize) -> Vec<Record> {
        let batch: Vec<Record> = {
            let mut records = self.lock();
            let count = max.min(records.len());
            records.drain(..count).collect()
        };
        if !batch.is_empty() {
            self.space_available.notify_waiters();
        }
        batch
    }

    /// Puts `records` back at the front, keeping their order. Records that do not fit are
    /// returned.
    pub fn requeue_front(&self, mut records: Vec<Record>) -> Vec<Record> {
        let mut queue = self.lock();
        let room = self.capacity.saturating_sub(queue.len());
        let rejected = if records.len() > room {
            records.split_off(room)
        } else {
            Vec::new()
        };
        for record in records.into_iter().rev() {
            queue.push_front(record);
        }
        rejected
    }

    /// Empties the queue and returns how many records were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut records = self.lock();
            let dropped = records.len();
            records.clear();
            dropped
        };
        if dropped > 0 {
            self.space_available.notify_waiters();
        }
        dropped
    }
}

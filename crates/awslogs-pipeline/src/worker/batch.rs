// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::Record;

/// Shrinks `batch` to the longest prefix whose wire size fits in `max_bytes` and returns
/// the removed tail. The first record is always kept.
pub fn split_oversized(batch: &mut Vec<Record>, max_bytes: usize) -> Vec<Record> {
    let mut total = 0usize;
    let mut keep = batch.len();
    for (i, record) in batch.iter().enumerate() {
        total += record.wire_size();
        if total > max_bytes {
            keep = i.max(1);
            break;
        }
    }
    batch.split_off(keep)
}

/// Cumulative wire size of `records`.
#[must_use]
pub fn wire_size(records: &[Record]) -> usize {
    records.iter().map(Record::wire_size).sum()
}

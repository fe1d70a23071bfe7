// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::record::Record;

/// Fixed capacity, ordered container for the batch in progress.
///
/// Owned by the rotation loop only; it is not synchronized.
#[derive(Debug)]
pub struct BatchBuffer {
    capacity: usize,
    records: Vec<Record>,
}

impl BatchBuffer {
    /// Capacities below 1 are raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: Vec::with_capacity(capacity),
        }
    }

    /// Appends a record and reports whether the buffer is now full.
    pub fn append(&mut self, record: Record) -> bool {
        self.records.push(record);
        self.records.len() >= self.capacity
    }

    /// Takes every buffered record, leaving a fresh empty buffer behind.
    pub fn drain_all(&mut self) -> Vec<Record> {
        std::mem::replace(&mut self.records, Vec::with_capacity(self.capacity))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

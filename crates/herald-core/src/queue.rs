// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! FIFO of records waiting to be announced.

use std::collections::VecDeque;

use crate::records::RecordKind;

/// Key of a queued record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueEntry {
    /// Namespace of the record.
    pub kind: RecordKind,
    /// Record label.
    pub label: String,
}

/// Ordered set of records that still have pending service requests.
#[derive(Debug, Default)]
pub struct AnnouncementQueue {
    entries: VecDeque<QueueEntry>,
}

impl AnnouncementQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Returns `false` if it is already queued.
    pub fn push(&mut self, kind: RecordKind, label: impl Into<String>) -> bool {
        let label = label.into();
        if self.contains(kind, &label) {
            return false;
        }
        self.entries.push_back(QueueEntry { kind, label });
        true
    }

    /// Drop a record from the queue. Returns whether it was present.
    pub fn remove(&mut self, kind: RecordKind, label: &str) -> bool {
        match self.position(kind, label) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether a record is queued.
    pub fn contains(&self, kind: RecordKind, label: &str) -> bool {
        self.position(kind, label).is_some()
    }

    /// Queued records of one kind, oldest first.
    pub fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &QueueEntry> + '_ {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// All queued records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> + '_ {
        self.entries.iter()
    }

    /// Number of queued records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn position(&self, kind: RecordKind, label: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.kind == kind && e.label == label)
    }
}

// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Bounded hand-off of diagnostics from the reader task to the caller.
//!
//! Diagnostics describe the latest state of a document, not a history, so
//! when the queue is full the oldest entry is evicted to admit the new one.
//! The producer side runs on the reader task and never blocks.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use super::types::DiagnosticsEntry;

/// Default number of entries held before eviction starts.
pub const DEFAULT_CAPACITY: usize = 10;

/// Fixed-capacity, evict-oldest queue of diagnostics entries.
#[derive(Debug)]
pub struct DiagnosticsQueue {
    capacity: usize,
    entries: Mutex<VecDeque<DiagnosticsEntry>>,
}

impl Default for DiagnosticsQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiagnosticsQueue {
    /// Creates a queue holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Maximum number of entries held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `entry`, evicting and returning the oldest one if full.
    pub fn push(&self, entry: DiagnosticsEntry) -> Option<DiagnosticsEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let evicted = if entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            debug!("Diagnostics queue full, evicting entry for {}", old.uri);
        }
        entries.push_back(entry);
        evicted
    }

    /// Removes and returns every queued entry, oldest first.
    pub fn drain(&self) -> Vec<DiagnosticsEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

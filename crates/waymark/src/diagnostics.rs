// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Counters for failures the SDK absorbs instead of returning.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
	EventsTracked,
	ValidationFailures,
	EventsQueued,
	EventsSent,
	BatchesFlushed,
	DuplicatesDropped,
	EventsDroppedOverflow,
	SinkSuccesses,
	SinkFailures,
	SinkTimeouts,
	ProjectionFailures,
	HashingExhausted,
	StorageFailures,
	FingerprintFailures,
	RemotePersistFailures,
	HandoffsPrepared,
	HandoffsRestored,
	HandoffsRejected,
}

const COUNTERS: usize = Counter::HandoffsRejected as usize + 1;

/// Shared, lock-free counter set.
#[derive(Debug)]
pub struct Diagnostics {
	values: [AtomicU64; COUNTERS],
}

impl Default for Diagnostics {
	fn default() -> Self {
		Self {
			values: std::array::from_fn(|_| AtomicU64::new(0)),
		}
	}
}

impl Diagnostics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn incr(&self, counter: Counter) {
		self.add(counter, 1);
	}

	pub fn add(&self, counter: Counter, n: u64) {
		if n > 0 {
			self.values[counter as usize].fetch_add(n, Ordering::Relaxed);
		}
	}

	pub fn get(&self, counter: Counter) -> u64 {
		self.values[counter as usize].load(Ordering::Relaxed)
	}

	pub fn snapshot(&self) -> DiagnosticsSnapshot {
		DiagnosticsSnapshot {
			events_tracked: self.get(Counter::EventsTracked),
			validation_failures: self.get(Counter::ValidationFailures),
			hashing_exhausted: self.get(Counter::HashingExhausted),
			storage_failures: self.get(Counter::StorageFailures),
			fingerprint_failures: self.get(Counter::FingerprintFailures),
			remote_persist_failures: self.get(Counter::RemotePersistFailures),
			handoffs_prepared: self.get(Counter::HandoffsPrepared),
			handoffs_restored: self.get(Counter::HandoffsRestored),
			handoffs_rejected: self.get(Counter::HandoffsRejected),
			batch: self.batch_stats(),
		}
	}

	pub fn batch_stats(&self) -> BatchStats {
		BatchStats {
			events_queued: self.get(Counter::EventsQueued),
			events_sent: self.get(Counter::EventsSent),
			batches_flushed: self.get(Counter::BatchesFlushed),
			sink_successes: self.get(Counter::SinkSuccesses),
			sink_failures: self.get(Counter::SinkFailures),
			sink_timeouts: self.get(Counter::SinkTimeouts),
			projection_failures: self.get(Counter::ProjectionFailures),
			duplicates_dropped: self.get(Counter::DuplicatesDropped),
			events_dropped_overflow: self.get(Counter::EventsDroppedOverflow),
		}
	}
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
	pub events_queued: u64,
	pub events_sent: u64,
	pub batches_flushed: u64,
	pub sink_successes: u64,
	pub sink_failures: u64,
	pub sink_timeouts: u64,
	pub projection_failures: u64,
	pub duplicates_dropped: u64,
	pub events_dropped_overflow: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
	pub events_tracked: u64,
	pub validation_failures: u64,
	pub hashing_exhausted: u64,
	pub storage_failures: u64,
	pub fingerprint_failures: u64,
	pub remote_persist_failures: u64,
	pub handoffs_prepared: u64,
	pub handoffs_restored: u64,
	pub handoffs_rejected: u64,
	pub batch: BatchStats,
}

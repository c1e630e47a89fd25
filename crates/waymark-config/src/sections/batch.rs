// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batching and dispatch configuration section.

use serde::{Deserialize, Serialize};

const DEFAULT_BATCH_SIZE: usize = 5;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60 * 60;
const DEFAULT_BEACON_TIMEOUT_MS: u64 = 2_000;

/// Configuration layer for batching (all fields optional for merging).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchConfigLayer {
	/// Events per batch on an average connection.
	pub batch_size: Option<usize>,
	/// Timer before a partial batch is flushed.
	pub flush_interval_ms: Option<u64>,
	/// Queue bound; the oldest event is dropped beyond it.
	pub max_queue_size: Option<usize>,
	/// Rolling window during which identical event hashes are suppressed.
	pub dedup_window_secs: Option<u64>,
	/// Hard timeout for teardown delivery.
	pub beacon_timeout_ms: Option<u64>,
}

impl BatchConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.batch_size.is_some() {
			self.batch_size = other.batch_size;
		}
		if other.flush_interval_ms.is_some() {
			self.flush_interval_ms = other.flush_interval_ms;
		}
		if other.max_queue_size.is_some() {
			self.max_queue_size = other.max_queue_size;
		}
		if other.dedup_window_secs.is_some() {
			self.dedup_window_secs = other.dedup_window_secs;
		}
		if other.beacon_timeout_ms.is_some() {
			self.beacon_timeout_ms = other.beacon_timeout_ms;
		}
	}

	pub fn finalize(self) -> BatchConfig {
		BatchConfig {
			batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
			flush_interval_ms: self.flush_interval_ms.unwrap_or(DEFAULT_FLUSH_INTERVAL_MS),
			max_queue_size: self.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
			dedup_window_secs: self.dedup_window_secs.unwrap_or(DEFAULT_DEDUP_WINDOW_SECS),
			beacon_timeout_ms: self.beacon_timeout_ms.unwrap_or(DEFAULT_BEACON_TIMEOUT_MS),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
	pub batch_size: usize,
	pub flush_interval_ms: u64,
	pub max_queue_size: usize,
	pub dedup_window_secs: u64,
	pub beacon_timeout_ms: u64,
}

impl Default for BatchConfig {
	fn default() -> Self {
		BatchConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = BatchConfig::default();
		assert_eq!(config.batch_size, 5);
		assert_eq!(config.flush_interval_ms, 5_000);
		assert_eq!(config.max_queue_size, 1_000);
		assert_eq!(config.dedup_window_secs, 3_600);
		assert_eq!(config.beacon_timeout_ms, 2_000);
	}

	#[test]
	fn merge_overwrites_only_set_fields() {
		let mut base = BatchConfigLayer {
			batch_size: Some(8),
			flush_interval_ms: Some(1_000),
			..Default::default()
		};
		base.merge(BatchConfigLayer {
			flush_interval_ms: Some(2_000),
			..Default::default()
		});
		let config = base.finalize();
		assert_eq!(config.batch_size, 8);
		assert_eq!(config.flush_interval_ms, 2_000);
	}

	#[test]
	fn deserialize_partial_layer() {
		let layer: BatchConfigLayer = toml::from_str("batch_size = 12").unwrap();
		assert_eq!(layer.batch_size, Some(12));
		assert!(layer.flush_interval_ms.is_none());
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network-adaptive batching policy and page visibility.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const SLOW_BATCH_SIZE: usize = 10;
const SLOW_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const FAST_BATCH_SIZE: usize = 3;
const FAST_FLUSH_INTERVAL: Duration = Duration::from_secs(3);

/// Effective connection type reported by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkQuality {
	#[serde(rename = "slow-2g")]
	Slow2g,
	#[serde(rename = "2g")]
	TwoG,
	#[serde(rename = "3g")]
	ThreeG,
	#[serde(rename = "4g")]
	FourG,
	#[default]
	#[serde(rename = "unknown")]
	Unknown,
}

impl NetworkQuality {
	pub fn is_slow(&self) -> bool {
		matches!(self, NetworkQuality::Slow2g | NetworkQuality::TwoG)
	}
}

impl std::fmt::Display for NetworkQuality {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			NetworkQuality::Slow2g => "slow-2g",
			NetworkQuality::TwoG => "2g",
			NetworkQuality::ThreeG => "3g",
			NetworkQuality::FourG => "4g",
			NetworkQuality::Unknown => "unknown",
		};
		f.write_str(s)
	}
}

impl std::str::FromStr for NetworkQuality {
	type Err = std::convert::Infallible;

	/// Unrecognised values map to [`NetworkQuality::Unknown`].
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s.trim().to_ascii_lowercase().as_str() {
			"slow-2g" => NetworkQuality::Slow2g,
			"2g" => NetworkQuality::TwoG,
			"3g" => NetworkQuality::ThreeG,
			"4g" => NetworkQuality::FourG,
			_ => NetworkQuality::Unknown,
		})
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
	#[default]
	Visible,
	Hidden,
}

/// When the batch engine flushes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
	pub batch_size: usize,
	pub flush_interval: Duration,
}

impl BatchPolicy {
	/// Slow links batch more and wait longer; fast links send sooner. Other
	/// qualities use `base`.
	pub fn adaptive(base: BatchPolicy, quality: NetworkQuality) -> BatchPolicy {
		match quality {
			NetworkQuality::Slow2g | NetworkQuality::TwoG => BatchPolicy {
				batch_size: base.batch_size.max(SLOW_BATCH_SIZE),
				flush_interval: base.flush_interval.max(SLOW_FLUSH_INTERVAL),
			},
			NetworkQuality::FourG => BatchPolicy {
				batch_size: base.batch_size.min(FAST_BATCH_SIZE),
				flush_interval: base.flush_interval.min(FAST_FLUSH_INTERVAL),
			},
			NetworkQuality::ThreeG | NetworkQuality::Unknown => base,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base() -> BatchPolicy {
		BatchPolicy {
			batch_size: 5,
			flush_interval: Duration::from_secs(5),
		}
	}

	#[test]
	fn slow_networks_batch_more() {
		let policy = BatchPolicy::adaptive(base(), "2g".parse().unwrap());
		assert_eq!(policy.batch_size, 10);
		assert_eq!(policy.flush_interval, Duration::from_secs(10));
		assert_eq!(
			BatchPolicy::adaptive(base(), NetworkQuality::Slow2g),
			policy
		);
	}

	#[test]
	fn fast_networks_send_sooner() {
		let policy = BatchPolicy::adaptive(base(), NetworkQuality::FourG);
		assert_eq!(policy.batch_size, 3);
		assert_eq!(policy.flush_interval, Duration::from_secs(3));
	}

	#[test]
	fn other_qualities_use_base() {
		assert_eq!(BatchPolicy::adaptive(base(), NetworkQuality::ThreeG), base());
		assert_eq!(BatchPolicy::adaptive(base(), "wifi".parse().unwrap()), base());
	}

	#[test]
	fn quality_display_roundtrip() {
		for quality in [
			NetworkQuality::Slow2g,
			NetworkQuality::TwoG,
			NetworkQuality::ThreeG,
			NetworkQuality::FourG,
		] {
			let parsed: NetworkQuality = quality.to_string().parse().unwrap();
			assert_eq!(parsed, quality);
			assert_ne!(parsed, NetworkQuality::Unknown);
		}
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Injected wall clock.
//!
//! Session expiry, handoff TTLs and the dedup window all read time through a
//! [`Clock`] so they can be driven deterministically in tests.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync + std::fmt::Debug {
	fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
	now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
	#[must_use]
	pub fn new(at: DateTime<Utc>) -> Self {
		Self { now: Mutex::new(at) }
	}

	pub fn set(&self, at: DateTime<Utc>) {
		*self.now.lock() = at;
	}

	pub fn advance(&self, by: Duration) {
		let mut now = self.now.lock();
		*now += by;
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		*self.now.lock()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn manual_clock_advances() {
		let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
		let clock = ManualClock::new(start);
		clock.advance(Duration::minutes(31));
		assert_eq!(clock.now(), start + Duration::minutes(31));

		clock.set(start);
		assert_eq!(clock.now(), start);
	}
}

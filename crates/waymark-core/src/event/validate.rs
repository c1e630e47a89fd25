// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Envelope validation. Failures are reported, never raised.

use thiserror::Error;

use super::{Event, Platform};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
	#[error("event_name is required")]
	MissingEventName,

	#[error("timestamp is required")]
	MissingTimestamp,

	#[error("platform is required")]
	MissingPlatform,

	#[error("user_data.unified_user_id is required")]
	MissingUnifiedUserId,

	#[error("platform must be one of: website, mobile, backend")]
	InvalidPlatform(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
	pub errors: Vec<ValidationError>,
}

impl ValidationReport {
	#[must_use]
	pub fn is_valid(&self) -> bool {
		self.errors.is_empty()
	}

	/// Error messages in check order.
	#[must_use]
	pub fn messages(&self) -> Vec<String> {
		self.errors.iter().map(ToString::to_string).collect()
	}
}

#[must_use]
pub fn validate(event: &Event) -> ValidationReport {
	let mut errors = Vec::new();

	if event.event_name.trim().is_empty() {
		errors.push(ValidationError::MissingEventName);
	}
	if event.timestamp <= 0 {
		errors.push(ValidationError::MissingTimestamp);
	}
	if event.platform.trim().is_empty() {
		errors.push(ValidationError::MissingPlatform);
	}
	if event
		.user_data
		.unified_user_id
		.as_deref()
		.map_or(true, |id| id.trim().is_empty())
	{
		errors.push(ValidationError::MissingUnifiedUserId);
	}
	if !event.platform.trim().is_empty() && event.platform.parse::<Platform>().is_err() {
		errors.push(ValidationError::InvalidPlatform(event.platform.clone()));
	}

	ValidationReport { errors }
}

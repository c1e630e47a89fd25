// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for core parsing.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
	#[error("invalid identifier: {0}")]
	InvalidId(String),

	#[error("invalid platform: {0}")]
	InvalidPlatform(String),

	#[error("invalid device type: {0}")]
	InvalidDeviceType(String),

	#[error("invalid consent category: {0}")]
	InvalidConsentCategory(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

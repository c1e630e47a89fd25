// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Waymark SDK.
//!
//! Only construction-time failures surface as [`WaymarkError`]. Runtime
//! failures (storage, dispatch, handoff persistence) are logged and counted in
//! [`crate::Diagnostics`] instead of being returned to the host.

use std::path::PathBuf;

use thiserror::Error;

/// Failure reading or writing a [`crate::storage::KeyValueStore`].
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("storage I/O failed at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("stored value for {key} is not valid JSON: {source}")]
	Corrupt {
		key: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("failed to serialize value for {key}: {source}")]
	Serialize {
		key: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("storage backend unavailable: {0}")]
	Unavailable(String),
}

/// SDK construction errors.
#[derive(Debug, Error)]
pub enum WaymarkError {
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("configuration error: {0}")]
	Config(#[from] waymark_config::ConfigError),

	#[error("failed to build HTTP client: {0}")]
	HttpClient(#[source] reqwest::Error),

	#[error("invalid URL for {name}: {message}")]
	InvalidUrl { name: String, message: String },

	#[error(transparent)]
	Core(#[from] waymark_core::CoreError),

	#[error("failed to install tracing subscriber: {0}")]
	Telemetry(String),
}

pub type Result<T> = std::result::Result<T, WaymarkError>;

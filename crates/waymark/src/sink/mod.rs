// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destinations for dispatched events.

mod backend;
mod conversions;
mod relay;
mod trace;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use waymark_common_http::RetryableError;
use waymark_core::{ConsentCategory, Event, Vocabulary};

pub use backend::BackendSink;
pub use conversions::ConversionsSink;
pub use relay::{RelaySink, RelayVendor};
pub use trace::TracingSink;

#[derive(Debug, Error)]
pub enum SinkError {
	#[error("HTTP request failed: {0}")]
	Transport(#[from] reqwest::Error),

	#[error("rate limited, retry after {retry_after_secs:?} seconds")]
	RateLimited { retry_after_secs: Option<u64> },

	#[error("server error ({status}): {message}")]
	Server { status: u16, message: String },

	#[error("serialization error: {0}")]
	Serialization(String),

	#[error("delivery timed out")]
	Timeout,
}

impl SinkError {
	/// True for failures a later attempt could plausibly fix.
	pub fn is_transient(&self) -> bool {
		match self {
			SinkError::Transport(e) => e.is_retryable(),
			SinkError::RateLimited { .. } | SinkError::Timeout => true,
			SinkError::Server { status, .. } => StatusCode::from_u16(*status)
				.map(waymark_common_http::RetryConfig::is_retryable_status)
				.unwrap_or(false),
			SinkError::Serialization(_) => false,
		}
	}
}

impl RetryableError for SinkError {
	fn is_retryable(&self) -> bool {
		self.is_transient()
	}
}

/// What a sink did with one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
	pub delivered: usize,
	/// Events skipped because they could not be projected.
	pub projection_failures: usize,
}

/// A downstream destination.
///
/// The engine hands each sink only the events it is allowed to see, in
/// enqueue order. Sinks project events into their own vocabulary; an event
/// that fails projection is skipped for that sink only.
#[async_trait]
pub trait Sink: Send + Sync {
	fn name(&self) -> &str;

	/// Consent category declared by the sink. Configuration may remap it.
	fn category(&self) -> ConsentCategory;

	async fn deliver(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError>;

	/// Delivery without retries, used while the page is being torn down.
	async fn deliver_once(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError> {
		self.deliver(events).await
	}
}

/// Projects every event, logging and skipping failures.
pub(crate) fn project_all(
	sink: &str,
	vocabulary: Vocabulary,
	events: &[Arc<Event>],
) -> (Vec<Value>, usize) {
	let mut projected = Vec::with_capacity(events.len());
	let mut failures = 0;
	for event in events {
		match vocabulary.project(event) {
			Ok(value) => projected.push(value),
			Err(e) => {
				failures += 1;
				warn!(
					sink,
					event_id = %event.event_id,
					vocabulary = %vocabulary,
					error = %e,
					"skipping event that failed projection"
				);
			}
		}
	}
	(projected, failures)
}

/// Maps a completed response to a sink result.
pub(crate) async fn check_response(response: Response) -> Result<(), SinkError> {
	let status = response.status();
	if status == StatusCode::TOO_MANY_REQUESTS {
		let retry_after = response
			.headers()
			.get("Retry-After")
			.and_then(|v| v.to_str().ok())
			.and_then(|s| s.parse().ok());
		return Err(SinkError::RateLimited {
			retry_after_secs: retry_after,
		});
	}

	if !status.is_success() {
		return Err(SinkError::Server {
			status: status.as_u16(),
			message: response.text().await.unwrap_or_default(),
		});
	}

	Ok(())
}

/// Joins a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
	format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

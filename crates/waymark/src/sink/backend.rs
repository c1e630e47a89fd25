// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;
use waymark_common_http::RetryConfig;
use waymark_config::SecretString;
use waymark_core::{ConsentCategory, Event, Vocabulary};

use super::{check_response, endpoint, project_all, DeliveryReport, Sink, SinkError};

const TRACK_PATH: &str = "analytics/track";

/// Posts batches to the first-party analytics backend as
/// `{ "events": [...] }`.
#[derive(Debug, Clone)]
pub struct BackendSink {
	name: String,
	http_client: Client,
	url: String,
	api_key: Option<SecretString>,
	vocabulary: Vocabulary,
	category: ConsentCategory,
	retry_config: RetryConfig,
}

impl BackendSink {
	pub fn new(http_client: Client, base_url: &str) -> Self {
		Self {
			name: "backend".to_string(),
			http_client,
			url: endpoint(base_url, TRACK_PATH),
			api_key: None,
			vocabulary: Vocabulary::Generic,
			category: ConsentCategory::Necessary,
			retry_config: RetryConfig::default(),
		}
	}

	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();
		self
	}

	pub fn with_api_key(mut self, api_key: SecretString) -> Self {
		self.api_key = Some(api_key);
		self
	}

	/// Relays events in another vocabulary, e.g. through a server-side GA4
	/// proxy.
	pub fn with_vocabulary(mut self, vocabulary: Vocabulary) -> Self {
		self.vocabulary = vocabulary;
		self
	}

	pub fn with_category(mut self, category: ConsentCategory) -> Self {
		self.category = category;
		self
	}

	pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
		self.retry_config = retry_config;
		self
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	async fn send(
		&self,
		events: &[Arc<Event>],
		retry_config: &RetryConfig,
	) -> Result<DeliveryReport, SinkError> {
		let (projected, projection_failures) = project_all(&self.name, self.vocabulary, events);
		if projected.is_empty() {
			return Ok(DeliveryReport {
				delivered: 0,
				projection_failures,
			});
		}

		let delivered = projected.len();
		let body = json!({ "events": projected });

		debug!(sink = %self.name, url = %self.url, count = delivered, "sending event batch");

		waymark_common_http::retry(retry_config, || async {
			let mut request = self.http_client.post(&self.url).json(&body);
			if let Some(key) = &self.api_key {
				request = request.bearer_auth(key.expose());
			}
			let response = request.send().await.map_err(SinkError::Transport)?;
			check_response(response).await
		})
		.await?;

		Ok(DeliveryReport {
			delivered,
			projection_failures,
		})
	}
}

#[async_trait]
impl Sink for BackendSink {
	fn name(&self) -> &str {
		&self.name
	}

	fn category(&self) -> ConsentCategory {
		self.category
	}

	async fn deliver(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError> {
		self.send(events, &self.retry_config).await
	}

	async fn deliver_once(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError> {
		self.send(events, &RetryConfig::none()).await
	}
}

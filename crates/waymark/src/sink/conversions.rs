// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::debug;
use waymark_common_http::RetryConfig;
use waymark_config::SecretString;
use waymark_core::{ConsentCategory, Event, Vocabulary};

use super::{check_response, endpoint, project_all, DeliveryReport, Sink, SinkError};
use crate::hasher::MatchQualityHasher;

const TRACK_PATH: &str = "conversions-api/track";
const DEFAULT_PLATFORM_TAG: &str = "web";

/// Relays events to the server-side conversions endpoint in the Meta
/// Conversions API vocabulary, enriched with hashed user data.
#[derive(Debug, Clone)]
pub struct ConversionsSink {
	http_client: Client,
	url: String,
	sdk_version: String,
	platform_tag: String,
	api_key: Option<SecretString>,
	pixel_id: Option<String>,
	hasher: Option<Arc<MatchQualityHasher>>,
	retry_config: RetryConfig,
}

impl ConversionsSink {
	pub fn new(http_client: Client, base_url: &str, sdk_version: impl Into<String>) -> Self {
		Self {
			http_client,
			url: endpoint(base_url, TRACK_PATH),
			sdk_version: sdk_version.into(),
			platform_tag: DEFAULT_PLATFORM_TAG.to_string(),
			api_key: None,
			pixel_id: None,
			hasher: None,
			retry_config: RetryConfig::default(),
		}
	}

	pub fn with_api_key(mut self, api_key: SecretString) -> Self {
		self.api_key = Some(api_key);
		self
	}

	pub fn with_pixel_id(mut self, pixel_id: impl Into<String>) -> Self {
		self.pixel_id = Some(pixel_id.into());
		self
	}

	pub fn with_platform_tag(mut self, tag: impl Into<String>) -> Self {
		self.platform_tag = tag.into();
		self
	}

	pub fn with_hasher(mut self, hasher: Arc<MatchQualityHasher>) -> Self {
		self.hasher = Some(hasher);
		self
	}

	pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
		self.retry_config = retry_config;
		self
	}

	/// Fills `user_data` keys the projection left empty from the hasher's
	/// payload.
	fn enrich(&self, mut projected: Value, matching: &Map<String, Value>) -> Value {
		if let Some(Value::Object(user_data)) = projected.get_mut("user_data") {
			for (key, value) in matching {
				user_data
					.entry(key.clone())
					.or_insert_with(|| value.clone());
			}
		}
		projected
	}

	async fn send(
		&self,
		events: &[Arc<Event>],
		retry_config: &RetryConfig,
	) -> Result<DeliveryReport, SinkError> {
		let (projected, projection_failures) =
			project_all(self.name(), Vocabulary::MetaCapi, events);
		if projected.is_empty() {
			return Ok(DeliveryReport {
				delivered: 0,
				projection_failures,
			});
		}

		let matching = self
			.hasher
			.as_ref()
			.map(|h| h.matching_payload())
			.unwrap_or_default();
		let data: Vec<Value> = projected
			.into_iter()
			.map(|event| self.enrich(event, &matching))
			.collect();
		let delivered = data.len();

		let mut body = json!({ "data": data });
		if let Some(pixel_id) = &self.pixel_id {
			body["pixel_id"] = json!(pixel_id);
		}

		debug!(url = %self.url, count = delivered, "sending conversions batch");

		waymark_common_http::retry(retry_config, || async {
			let mut request = self
				.http_client
				.post(&self.url)
				.header("X-Platform", &self.platform_tag)
				.header("X-SDK-Version", &self.sdk_version)
				.json(&body);
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
impl Sink for ConversionsSink {
	fn name(&self) -> &str {
		"conversions"
	}

	fn category(&self) -> ConsentCategory {
		ConsentCategory::Marketing
	}

	async fn deliver(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError> {
		self.send(events, &self.retry_config).await
	}

	async fn deliver_once(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError> {
		self.send(events, &RetryConfig::none()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::diagnostics::Diagnostics;
	use crate::hasher::{HasherChain, UserDataInput};
	use wiremock::matchers::{header, method, path};
	use wiremock::{Mock, MockServer, Request, ResponseTemplate};

	fn purchase() -> Arc<Event> {
		let mut event: Event = serde_json::from_str("{}").unwrap();
		event.event_name = "subscription_started".into();
		event.event_id = "evt_1".into();
		event.timestamp = 1_700_000_000_000;
		event.platform = "website".into();
		event.user_data.unified_user_id = Some("uid_1".into());
		event.value_data = Some(waymark_core::ValueData {
			value: Some(9.99),
			..Default::default()
		});
		Arc::new(event)
	}

	#[tokio::test]
	async fn sends_platform_headers_and_hashed_user_data() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/conversions-api/track"))
			.and(header("X-Platform", "web"))
			.and(header("X-SDK-Version", "v23.0.1"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let hasher = Arc::new(MatchQualityHasher::new(
			HasherChain::default(),
			Arc::new(Diagnostics::new()),
		));
		hasher.set_user_data(&UserDataInput {
			email: Some("a@b.com".into()),
			..Default::default()
		});

		let sink = ConversionsSink::new(Client::new(), &server.uri(), "v23.0.1")
			.with_pixel_id("px_1")
			.with_hasher(hasher);
		let report = sink.deliver(&[purchase()]).await.unwrap();
		assert_eq!(report.delivered, 1);

		let requests: Vec<Request> = server.received_requests().await.unwrap();
		let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
		assert_eq!(body["pixel_id"], "px_1");
		let event = &body["data"][0];
		assert_eq!(event["event_name"], "subscription_started");
		assert_eq!(event["custom_data"]["value"], json!(9.99));
		assert_eq!(event["user_data"]["external_id"][0], "uid_1");
		assert_eq!(event["user_data"]["em"].as_array().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn unprojectable_batch_sends_nothing() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(0)
			.mount(&server)
			.await;

		let mut bad = (*purchase()).clone();
		bad.value_data = Some(waymark_core::ValueData {
			value: Some(f64::NAN),
			..Default::default()
		});

		let sink = ConversionsSink::new(Client::new(), &server.uri(), "v23.0.1");
		let report = sink.deliver(&[Arc::new(bad)]).await.unwrap();
		assert_eq!(report.delivered, 0);
		assert_eq!(report.projection_failures, 1);
	}
}

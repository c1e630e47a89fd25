// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vendor sinks posted through the server-side tagging relay.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;
use waymark_common_http::RetryConfig;
use waymark_config::SecretString;
use waymark_core::{ConsentCategory, Event, Vocabulary};

use super::{check_response, endpoint, project_all, DeliveryReport, Sink, SinkError};

/// A vendor reachable through the relay, with the credential it needs.
#[derive(Debug, Clone)]
pub enum RelayVendor {
	Ga4 { measurement_id: String },
	AppsFlyer { dev_key: SecretString },
	Amplitude { api_key: SecretString },
}

impl RelayVendor {
	pub fn name(&self) -> &'static str {
		match self {
			RelayVendor::Ga4 { .. } => "ga4",
			RelayVendor::AppsFlyer { .. } => "appsflyer",
			RelayVendor::Amplitude { .. } => "amplitude",
		}
	}

	pub fn vocabulary(&self) -> Vocabulary {
		match self {
			RelayVendor::Ga4 { .. } => Vocabulary::Ga4,
			RelayVendor::AppsFlyer { .. } => Vocabulary::AppsFlyer,
			RelayVendor::Amplitude { .. } => Vocabulary::Amplitude,
		}
	}

	/// AppsFlyer is an ad attribution network; the other two are product
	/// analytics.
	pub fn category(&self) -> ConsentCategory {
		match self {
			RelayVendor::AppsFlyer { .. } => ConsentCategory::Marketing,
			RelayVendor::Ga4 { .. } | RelayVendor::Amplitude { .. } => ConsentCategory::Analytics,
		}
	}

	fn path(&self) -> &'static str {
		match self {
			RelayVendor::Ga4 { .. } => "ga4/collect",
			RelayVendor::AppsFlyer { .. } => "appsflyer/events",
			RelayVendor::Amplitude { .. } => "amplitude/track",
		}
	}
}

/// Posts `{ "events": [...] }` in the vendor's vocabulary to
/// `{relay}/{vendor path}`. GA4 and Amplitude carry their id in the body,
/// AppsFlyer sends its dev key in the `authentication` header.
#[derive(Debug, Clone)]
pub struct RelaySink {
	vendor: RelayVendor,
	http_client: Client,
	url: String,
	retry_config: RetryConfig,
}

impl RelaySink {
	pub fn new(http_client: Client, relay_url: &str, vendor: RelayVendor) -> Self {
		Self {
			url: endpoint(relay_url, vendor.path()),
			vendor,
			http_client,
			retry_config: RetryConfig::default(),
		}
	}

	pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
		self.retry_config = retry_config;
		self
	}

	pub fn vendor(&self) -> &RelayVendor {
		&self.vendor
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	fn body(&self, events: Vec<Value>) -> Value {
		let mut body = json!({ "events": events });
		match &self.vendor {
			RelayVendor::Ga4 { measurement_id } => body["measurement_id"] = json!(measurement_id),
			RelayVendor::Amplitude { api_key } => body["api_key"] = json!(api_key.expose()),
			RelayVendor::AppsFlyer { .. } => {}
		}
		body
	}

	async fn send(
		&self,
		events: &[Arc<Event>],
		retry_config: &RetryConfig,
	) -> Result<DeliveryReport, SinkError> {
		let name = self.vendor.name();
		let (projected, projection_failures) = project_all(name, self.vendor.vocabulary(), events);
		if projected.is_empty() {
			return Ok(DeliveryReport {
				delivered: 0,
				projection_failures,
			});
		}

		let delivered = projected.len();
		let body = self.body(projected);

		debug!(sink = name, url = %self.url, count = delivered, "relaying event batch");

		waymark_common_http::retry(retry_config, || async {
			let mut request = self.http_client.post(&self.url).json(&body);
			if let RelayVendor::AppsFlyer { dev_key } = &self.vendor {
				request = request.header("authentication", dev_key.expose());
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
impl Sink for RelaySink {
	fn name(&self) -> &str {
		self.vendor.name()
	}

	fn category(&self) -> ConsentCategory {
		self.vendor.category()
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
	use wiremock::matchers::{body_partial_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn purchase() -> Arc<Event> {
		let mut event: Event = serde_json::from_str("{}").unwrap();
		event.event_name = "subscription_started".into();
		event.event_id = "evt_1".into();
		event.timestamp = 1_700_000_000_000;
		event.platform = "website".into();
		event.user_data.unified_user_id = Some("uid_1".into());
		event.value_data = Some(waymark_core::ValueData {
			value: Some(19.99),
			..Default::default()
		});
		Arc::new(event)
	}

	#[test]
	fn vendors_declare_their_category() {
		let ga4 = RelayVendor::Ga4 {
			measurement_id: "G-1".into(),
		};
		let appsflyer = RelayVendor::AppsFlyer {
			dev_key: SecretString::new("dev"),
		};
		let amplitude = RelayVendor::Amplitude {
			api_key: SecretString::new("amp"),
		};
		assert_eq!(ga4.category(), ConsentCategory::Analytics);
		assert_eq!(amplitude.category(), ConsentCategory::Analytics);
		assert_eq!(appsflyer.category(), ConsentCategory::Marketing);
		assert_eq!(appsflyer.vocabulary(), Vocabulary::AppsFlyer);
	}

	#[tokio::test]
	async fn ga4_batch_carries_measurement_id() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/ga4/collect"))
			.and(body_partial_json(json!({ "measurement_id": "G-TEST" })))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let sink = RelaySink::new(
			Client::new(),
			&server.uri(),
			RelayVendor::Ga4 {
				measurement_id: "G-TEST".into(),
			},
		);
		let report = sink.deliver(&[purchase()]).await.unwrap();
		assert_eq!(report.delivered, 1);

		let requests = server.received_requests().await.unwrap();
		let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
		assert_eq!(body["events"].as_array().map(Vec::len), Some(1));
	}

	#[tokio::test]
	async fn appsflyer_authenticates_with_dev_key() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/appsflyer/events"))
			.and(header("authentication", "af_dev_1"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let sink = RelaySink::new(
			Client::new(),
			&server.uri(),
			RelayVendor::AppsFlyer {
				dev_key: SecretString::new("af_dev_1"),
			},
		);
		assert_eq!(sink.name(), "appsflyer");
		sink.deliver(&[purchase()]).await.unwrap();

		let requests = server.received_requests().await.unwrap();
		let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
		assert!(body.get("dev_key").is_none());
		assert!(body["events"][0].get("eventName").is_some());
	}

	#[tokio::test]
	async fn amplitude_batch_carries_api_key() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/amplitude/track"))
			.and(body_partial_json(json!({ "api_key": "amp_1" })))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let sink = RelaySink::new(
			Client::new(),
			&format!("{}/", server.uri()),
			RelayVendor::Amplitude {
				api_key: SecretString::new("amp_1"),
			},
		);
		let report = sink.deliver(&[purchase()]).await.unwrap();
		assert_eq!(report.delivered, 1);
	}
}

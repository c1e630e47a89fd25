// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use waymark_common_http::RetryConfig;

use super::{HandoffError, HandoffRecord, HandoffStore, HandoffToken, CONTINUITY_PATH};

const HANDOFF_PATH: &str = "cross-platform-handoff";

#[derive(Deserialize)]
struct ContinuityEnvelope {
	#[serde(default)]
	session_continuity: Option<HandoffToken>,
}

/// Handoff persistence against the backend's session-continuity API.
#[derive(Debug, Clone)]
pub struct HttpHandoffStore {
	http_client: Client,
	base_url: String,
	retry_config: RetryConfig,
}

impl HttpHandoffStore {
	pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
		Self {
			http_client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			retry_config: RetryConfig::default(),
		}
	}

	pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
		self.retry_config = retry_config;
		self
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{path}", self.base_url)
	}

	fn identified(request: RequestBuilder, unified_user_id: &str, session_id: &str) -> RequestBuilder {
		request
			.header("X-Unified-User-Id", unified_user_id)
			.header("X-Session-Id", session_id)
	}
}

async fn check(response: Response) -> Result<Response, HandoffError> {
	let status = response.status();
	if status.is_success() {
		return Ok(response);
	}
	Err(HandoffError::Server {
		status: status.as_u16(),
		message: response.text().await.unwrap_or_default(),
	})
}

#[async_trait]
impl HandoffStore for HttpHandoffStore {
	async fn put(&self, token: &HandoffToken) -> Result<(), HandoffError> {
		let url = self.url(CONTINUITY_PATH);
		debug!(url = %url, session_id = %token.session_id, "persisting handoff token");
		waymark_common_http::retry(&self.retry_config, || async {
			let request = Self::identified(
				self.http_client.post(&url),
				&token.unified_user_id,
				&token.session_id,
			);
			check(request.json(token).send().await?).await.map(|_| ())
		})
		.await
	}

	async fn get(&self, session_id: &str) -> Result<Option<HandoffToken>, HandoffError> {
		let url = self.url(&format!("{CONTINUITY_PATH}/{session_id}"));
		waymark_common_http::retry(&self.retry_config, || async {
			let response = self.http_client.get(&url).send().await?;
			if response.status() == StatusCode::NOT_FOUND {
				return Ok::<_, HandoffError>(None);
			}
			let envelope: ContinuityEnvelope = check(response)
				.await?
				.json()
				.await
				.map_err(|e| HandoffError::Decode(e.to_string()))?;
			Ok(envelope.session_continuity)
		})
		.await
	}

	async fn record_handoff(&self, record: &HandoffRecord) -> Result<(), HandoffError> {
		let url = self.url(HANDOFF_PATH);
		waymark_common_http::retry(&self.retry_config, || async {
			let request = Self::identified(
				self.http_client.post(&url),
				&record.unified_user_id,
				&record.session_id,
			);
			check(request.json(record).send().await?).await.map(|_| ())
		})
		.await
	}
}

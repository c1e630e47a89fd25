// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fire-and-forget delivery for page teardown.
//!
//! Work handed to [`spawn_detached`] runs on the current runtime under a hard
//! timeout. Nobody awaits the outcome; failures and timeouts are only logged.

use std::future::Future;
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, warn};

/// How a detached delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachedOutcome {
	Completed,
	Failed,
	TimedOut,
}

/// Spawns `work` detached with a hard `timeout` and reports how it ended to
/// `observe`. Returns false when no runtime is available to run it.
pub fn spawn_detached<F, E, O>(label: &'static str, timeout: Duration, work: F, observe: O) -> bool
where
	F: Future<Output = Result<(), E>> + Send + 'static,
	E: std::fmt::Display + Send + 'static,
	O: FnOnce(DetachedOutcome) + Send + 'static,
{
	let Ok(handle) = Handle::try_current() else {
		debug!(label, "no runtime available for detached delivery");
		return false;
	};

	handle.spawn(async move {
		let outcome = match tokio::time::timeout(timeout, work).await {
			Ok(Ok(())) => {
				debug!(label, "detached delivery completed");
				DetachedOutcome::Completed
			}
			Ok(Err(e)) => {
				warn!(label, error = %e, "detached delivery failed");
				DetachedOutcome::Failed
			}
			Err(_) => {
				warn!(label, timeout_ms = timeout.as_millis(), "detached delivery timed out");
				DetachedOutcome::TimedOut
			}
		};
		observe(outcome);
	});
	true
}

/// Posts small JSON payloads without waiting for a response.
#[derive(Debug, Clone)]
pub struct BeaconSender {
	http_client: Client,
	timeout: Duration,
}

impl BeaconSender {
	pub fn new(http_client: Client, timeout: Duration) -> Self {
		Self {
			http_client,
			timeout,
		}
	}

	pub fn send(&self, label: &'static str, url: String, body: Value) -> bool {
		let client = self.http_client.clone();
		let work = async move {
			client
				.post(&url)
				.json(&body)
				.send()
				.await
				.and_then(|response| response.error_for_status())
				.map(|_| ())
		};
		spawn_detached(label, self.timeout, work, |_| {})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{body_partial_json, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	#[test]
	fn without_runtime_nothing_is_spawned() {
		assert!(!spawn_detached(
			"test",
			Duration::from_millis(10),
			async { Ok::<(), String>(()) },
			|_| {},
		));
	}

	#[tokio::test]
	async fn beacon_reaches_server() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/beacon"))
			.and(body_partial_json(serde_json::json!({ "event": "session_end" })))
			.respond_with(ResponseTemplate::new(204))
			.expect(1)
			.mount(&server)
			.await;

		let sender = BeaconSender::new(Client::new(), Duration::from_secs(2));
		assert!(sender.send(
			"test",
			format!("{}/beacon", server.uri()),
			serde_json::json!({ "event": "session_end" }),
		));

		for _ in 0..50 {
			if !server.received_requests().await.unwrap_or_default().is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	}

	#[tokio::test]
	async fn slow_work_is_cut_off() {
		let (tx, rx) = tokio::sync::oneshot::channel();
		spawn_detached(
			"test",
			Duration::from_millis(10),
			async {
				tokio::time::sleep(Duration::from_secs(60)).await;
				Ok::<(), String>(())
			},
			move |outcome| {
				let _ = tx.send(outcome);
			},
		);
		assert_eq!(rx.await.unwrap(), DetachedOutcome::TimedOut);
	}
}

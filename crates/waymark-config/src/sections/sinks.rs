// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Downstream sink configuration section.

use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

fn default_sdk_version() -> String {
	"v23.0.1".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SinksConfigLayer {
	pub backend_url: Option<String>,
	pub backend_api_key: Option<SecretString>,
	pub conversions_url: Option<String>,
	pub conversions_api_key: Option<SecretString>,
	pub sdk_version: Option<String>,
	pub meta_pixel_id: Option<String>,
	pub tagging_url: Option<String>,
	pub ga4_measurement_id: Option<String>,
	pub appsflyer_dev_key: Option<SecretString>,
	pub amplitude_api_key: Option<SecretString>,
}

impl SinksConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.backend_url.is_some() {
			self.backend_url = other.backend_url;
		}
		if other.backend_api_key.is_some() {
			self.backend_api_key = other.backend_api_key;
		}
		if other.conversions_url.is_some() {
			self.conversions_url = other.conversions_url;
		}
		if other.conversions_api_key.is_some() {
			self.conversions_api_key = other.conversions_api_key;
		}
		if other.sdk_version.is_some() {
			self.sdk_version = other.sdk_version;
		}
		if other.meta_pixel_id.is_some() {
			self.meta_pixel_id = other.meta_pixel_id;
		}
		if other.tagging_url.is_some() {
			self.tagging_url = other.tagging_url;
		}
		if other.ga4_measurement_id.is_some() {
			self.ga4_measurement_id = other.ga4_measurement_id;
		}
		if other.appsflyer_dev_key.is_some() {
			self.appsflyer_dev_key = other.appsflyer_dev_key;
		}
		if other.amplitude_api_key.is_some() {
			self.amplitude_api_key = other.amplitude_api_key;
		}
	}

	pub fn finalize(self) -> SinksConfig {
		SinksConfig {
			backend_url: self.backend_url,
			backend_api_key: self.backend_api_key,
			conversions_url: self.conversions_url,
			conversions_api_key: self.conversions_api_key,
			sdk_version: self.sdk_version.unwrap_or_else(default_sdk_version),
			meta_pixel_id: self.meta_pixel_id,
			tagging_url: self.tagging_url,
			ga4_measurement_id: self.ga4_measurement_id,
			appsflyer_dev_key: self.appsflyer_dev_key,
			amplitude_api_key: self.amplitude_api_key,
		}
	}
}

/// Resolved sink configuration. A sink with no URL is not registered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SinksConfig {
	/// Base URL of the first-party backend (`POST {base}/analytics/track`).
	pub backend_url: Option<String>,
	pub backend_api_key: Option<SecretString>,
	/// Base URL of the conversions relay (`POST {base}/conversions-api/track`).
	pub conversions_url: Option<String>,
	pub conversions_api_key: Option<SecretString>,
	/// Sent as `X-SDK-Version` on conversions requests.
	pub sdk_version: String,
	pub meta_pixel_id: Option<String>,
	/// Base URL of the server-side tagging relay. Vendor sinks (GA4,
	/// AppsFlyer, Amplitude) are registered only when it is set, one per
	/// configured vendor key.
	pub tagging_url: Option<String>,
	pub ga4_measurement_id: Option<String>,
	pub appsflyer_dev_key: Option<SecretString>,
	pub amplitude_api_key: Option<SecretString>,
}

impl Default for SinksConfig {
	fn default() -> Self {
		SinksConfigLayer::default().finalize()
	}
}

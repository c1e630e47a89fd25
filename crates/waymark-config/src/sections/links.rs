// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! App-store and deep-link configuration section.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_pid_overrides() -> BTreeMap<String, String> {
	[
		("google", "google_ads"),
		("facebook", "facebook_ads"),
		("instagram", "instagram_ads"),
		("twitter", "twitter_ads"),
		("linkedin", "linkedin_ads"),
	]
	.into_iter()
	.map(|(source, pid)| (source.to_string(), pid.to_string()))
	.collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinksConfigLayer {
	pub ios_app_id: Option<String>,
	pub ios_app_slug: Option<String>,
	pub android_package: Option<String>,
	pub onelink_url: Option<String>,
	pub app_scheme: Option<String>,
	pub default_locale: Option<String>,
	pub pid_overrides: Option<BTreeMap<String, String>>,
}

impl LinksConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.ios_app_id.is_some() {
			self.ios_app_id = other.ios_app_id;
		}
		if other.ios_app_slug.is_some() {
			self.ios_app_slug = other.ios_app_slug;
		}
		if other.android_package.is_some() {
			self.android_package = other.android_package;
		}
		if other.onelink_url.is_some() {
			self.onelink_url = other.onelink_url;
		}
		if other.app_scheme.is_some() {
			self.app_scheme = other.app_scheme;
		}
		if other.default_locale.is_some() {
			self.default_locale = other.default_locale;
		}
		if let Some(incoming) = other.pid_overrides {
			self.pid_overrides
				.get_or_insert_with(BTreeMap::new)
				.extend(incoming);
		}
	}

	pub fn finalize(self) -> LinksConfig {
		let mut pid_overrides = default_pid_overrides();
		if let Some(overrides) = self.pid_overrides {
			pid_overrides.extend(overrides);
		}
		LinksConfig {
			ios_app_id: self.ios_app_id.unwrap_or_else(|| "6444388755".to_string()),
			ios_app_slug: self.ios_app_slug.unwrap_or_else(|| "cdl-help".to_string()),
			android_package: self
				.android_package
				.unwrap_or_else(|| "help.truckdriver.cdlhelp".to_string()),
			onelink_url: self.onelink_url,
			app_scheme: self.app_scheme.unwrap_or_else(|| "cdlhelp".to_string()),
			default_locale: self.default_locale.unwrap_or_else(|| "en".to_string()),
			pid_overrides,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinksConfig {
	pub ios_app_id: String,
	pub ios_app_slug: String,
	pub android_package: String,
	/// Deep-link aggregator base URL. Direct store links when unset.
	pub onelink_url: Option<String>,
	pub app_scheme: String,
	pub default_locale: String,
	/// Maps `utm_source` values to aggregator media-source ids.
	pub pid_overrides: BTreeMap<String, String>,
}

impl Default for LinksConfig {
	fn default() -> Self {
		LinksConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pid_overrides_extend_defaults() {
		let layer: LinksConfigLayer = toml::from_str(
			r#"
onelink_url = "https://example.onelink.me/abc"

[pid_overrides]
tiktok = "tiktok_ads"
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.pid_overrides["tiktok"], "tiktok_ads");
		assert_eq!(config.pid_overrides["google"], "google_ads");
		assert_eq!(
			config.onelink_url.as_deref(),
			Some("https://example.onelink.me/abc")
		);
	}

	#[test]
	fn defaults_use_direct_links() {
		let config = LinksConfig::default();
		assert!(config.onelink_url.is_none());
		assert_eq!(config.app_scheme, "cdlhelp");
		assert_eq!(config.default_locale, "en");
	}
}

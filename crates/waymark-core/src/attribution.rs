// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Marketing attribution parameters and first/last-touch records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Query parameters recognised as attribution signals, in canonical order.
pub const ATTRIBUTION_KEYS: [&str; 9] = [
	"utm_source",
	"utm_medium",
	"utm_campaign",
	"utm_term",
	"utm_content",
	"gclid",
	"fbclid",
	"ttclid",
	"msclkid",
];

/// UTM values and ad-network click ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionParams {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub utm_source: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub utm_medium: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub utm_campaign: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub utm_term: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub utm_content: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gclid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fbclid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ttclid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub msclkid: Option<String>,
}

impl AttributionParams {
	/// Extracts attribution parameters from a page URL.
	#[must_use]
	pub fn from_url(url: &Url) -> Self {
		Self::from_pairs(url.query_pairs())
	}

	/// Builds params from key/value pairs, ignoring unknown keys and empty values.
	/// The first occurrence of a key wins.
	pub fn from_pairs<I, K, V>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		let mut params = Self::default();
		for (key, value) in pairs {
			if params.get(key.as_ref()).is_none() {
				params.set(key.as_ref(), value.as_ref());
			}
		}
		params
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<&str> {
		let slot = match key {
			"utm_source" => &self.utm_source,
			"utm_medium" => &self.utm_medium,
			"utm_campaign" => &self.utm_campaign,
			"utm_term" => &self.utm_term,
			"utm_content" => &self.utm_content,
			"gclid" => &self.gclid,
			"fbclid" => &self.fbclid,
			"ttclid" => &self.ttclid,
			"msclkid" => &self.msclkid,
			_ => return None,
		};
		slot.as_deref()
	}

	/// Sets a recognised key. Returns false for unknown keys. Blank values clear
	/// the slot.
	pub fn set(&mut self, key: &str, value: &str) -> bool {
		let slot = match key {
			"utm_source" => &mut self.utm_source,
			"utm_medium" => &mut self.utm_medium,
			"utm_campaign" => &mut self.utm_campaign,
			"utm_term" => &mut self.utm_term,
			"utm_content" => &mut self.utm_content,
			"gclid" => &mut self.gclid,
			"fbclid" => &mut self.fbclid,
			"ttclid" => &mut self.ttclid,
			"msclkid" => &mut self.msclkid,
			_ => return false,
		};
		let trimmed = value.trim();
		*slot = (!trimmed.is_empty()).then(|| trimmed.to_string());
		true
	}

	/// True when no UTM or click-id field is present.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		ATTRIBUTION_KEYS.iter().all(|key| self.get(key).is_none())
	}

	/// Present fields in canonical order.
	pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
		ATTRIBUTION_KEYS
			.iter()
			.filter_map(move |key| self.get(key).map(|value| (*key, value)))
	}
}

/// One observation of attribution context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionRecord {
	#[serde(flatten)]
	pub params: AttributionParams,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub referrer: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub landing_page: Option<String>,
	pub timestamp: DateTime<Utc>,
}

impl AttributionRecord {
	#[must_use]
	pub fn new(
		params: AttributionParams,
		referrer: Option<String>,
		landing_page: Option<String>,
		timestamp: DateTime<Utc>,
	) -> Self {
		Self {
			params,
			referrer,
			landing_page,
			timestamp,
		}
	}

	#[must_use]
	pub fn source(&self) -> Option<&str> {
		self.params.utm_source.as_deref()
	}

	#[must_use]
	pub fn medium(&self) -> Option<&str> {
		self.params.utm_medium.as_deref()
	}
}

/// First-touch and last-touch records for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionState {
	pub first_touch: Option<AttributionRecord>,
	pub last_touch: Option<AttributionRecord>,
}

impl AttributionState {
	/// The most recent record available.
	#[must_use]
	pub fn effective(&self) -> Option<&AttributionRecord> {
		self.last_touch.as_ref().or(self.first_touch.as_ref())
	}
}

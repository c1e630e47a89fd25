// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The canonical event envelope shared by every surface.

mod hash;
mod raw;
mod validate;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::attribution::AttributionParams;
use crate::error::CoreError;

pub use hash::compute_event_hash;
pub use raw::{normalize, normalize_at, FlatRawEvent, NestedRawEvent, RawEvent, RawTrackingMeta};
pub use validate::{validate, ValidationError, ValidationReport};

/// Envelope schema version stamped into `tracking_meta`.
pub const TRACKING_VERSION: &str = "2.1.0";

pub const EVENT_ID_PREFIX: &str = "evt_";

/// Event names shared across surfaces.
pub mod names {
	pub const PAGE_VIEW: &str = "page_view";
	pub const QUIZ_STARTED: &str = "quiz_started";
	pub const QUIZ_COMPLETED: &str = "quiz_completed";
	pub const QUESTION_ATTEMPTED: &str = "question_attempted";
	pub const DOWNLOAD_INTENT: &str = "download_intent";
	pub const APP_INSTALL: &str = "app_install";
	pub const SUBSCRIPTION_STARTED: &str = "subscription_started";
	pub const SUBSCRIPTION_RENEWED: &str = "subscription_renewed";
	pub const SUBSCRIPTION_CANCELLED: &str = "subscription_cancelled";
	pub const FORM_SUBMITTED: &str = "form_submitted";
	pub const CROSS_PLATFORM_HANDOFF: &str = "cross_platform_handoff";
}

#[must_use]
pub fn new_event_id() -> String {
	format!("{EVENT_ID_PREFIX}{}", Uuid::new_v4())
}

/// Surface an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
	Website,
	Mobile,
	Backend,
}

impl Platform {
	pub const ALL: [Platform; 3] = [Platform::Website, Platform::Mobile, Platform::Backend];
}

impl std::fmt::Display for Platform {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Platform::Website => write!(f, "website"),
			Platform::Mobile => write!(f, "mobile"),
			Platform::Backend => write!(f, "backend"),
		}
	}
}

impl std::str::FromStr for Platform {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"website" => Ok(Platform::Website),
			"mobile" => Ok(Platform::Mobile),
			"backend" => Ok(Platform::Backend),
			_ => Err(CoreError::InvalidPlatform(s.to_string())),
		}
	}
}

/// Identity references carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unified_user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_fingerprint: Option<String>,
	/// Authenticated account id, when the host knows one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email_hash: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub phone_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribution {
	#[serde(flatten)]
	pub params: AttributionParams,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub referrer: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub landing_page: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub locale: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page_url: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page_title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timezone: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub screen_resolution: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connection_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
}

/// Monetary and content details used by revenue-aware sinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueData {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub currency: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_type: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub content_ids: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_category: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub num_items: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingMeta {
	#[serde(default)]
	pub event_hash: String,
	#[serde(default)]
	pub skip_deduplication: bool,
	#[serde(default)]
	pub source_platform: String,
	#[serde(default = "default_tracking_version")]
	pub tracking_version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub batch_id: Option<String>,
	#[serde(default)]
	pub retry_count: u32,
}

fn default_tracking_version() -> String {
	TRACKING_VERSION.to_string()
}

impl Default for TrackingMeta {
	fn default() -> Self {
		Self {
			event_hash: String::new(),
			skip_deduplication: false,
			source_platform: String::new(),
			tracking_version: default_tracking_version(),
			batch_id: None,
			retry_count: 0,
		}
	}
}

/// Canonical event envelope.
///
/// Produced by [`normalize`]. Every field deserializes with a default so that
/// envelopes received from other surfaces can be checked with [`validate`]
/// instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	#[serde(default)]
	pub event_name: String,
	#[serde(default)]
	pub event_id: String,
	/// Unix milliseconds.
	#[serde(default)]
	pub timestamp: i64,
	#[serde(default)]
	pub platform: String,
	#[serde(default)]
	pub user_data: UserData,
	#[serde(default)]
	pub attribution: EventAttribution,
	#[serde(default)]
	pub context: EventContext,
	#[serde(default)]
	pub custom_data: Map<String, Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value_data: Option<ValueData>,
	#[serde(default)]
	pub tracking_meta: TrackingMeta,
}

impl Event {
	#[must_use]
	pub fn unified_user_id(&self) -> Option<&str> {
		self.user_data.unified_user_id.as_deref()
	}

	#[must_use]
	pub fn event_hash(&self) -> &str {
		&self.tracking_meta.event_hash
	}

	#[must_use]
	pub fn platform(&self) -> Option<Platform> {
		self.platform.parse().ok()
	}
}

/// Pulls revenue and content fields out of loosely typed event properties.
///
/// `value` is read from the first of `value`, `revenue`, `price` or `amount`
/// that holds a number or a numeric string. Returns `None` when no recognised
/// key is present.
#[must_use]
pub fn extract_value_data(properties: &Map<String, Value>) -> Option<ValueData> {
	let value = ["value", "revenue", "price", "amount"]
		.iter()
		.find_map(|key| properties.get(*key).and_then(as_f64));

	let string = |key: &str| {
		properties
			.get(key)
			.and_then(Value::as_str)
			.map(str::to_string)
	};

	let content_ids = match properties.get("content_ids") {
		Some(Value::Array(items)) => items
			.iter()
			.filter_map(|item| match item {
				Value::String(s) => Some(s.clone()),
				Value::Number(n) => Some(n.to_string()),
				_ => None,
			})
			.collect(),
		Some(Value::String(single)) => vec![single.clone()],
		_ => Vec::new(),
	};

	let data = ValueData {
		value,
		currency: string("currency"),
		content_type: string("content_type"),
		content_ids,
		content_name: string("content_name"),
		content_category: string("content_category"),
		num_items: properties
			.get("num_items")
			.and_then(Value::as_u64)
			.and_then(|n| u32::try_from(n).ok()),
	};

	(data != ValueData::default()).then_some(data)
}

fn as_f64(value: &Value) -> Option<f64> {
	match value {
		Value::Number(n) => n.as_f64(),
		Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn value_data_reads_aliases() {
		let props = json!({ "revenue": "19.99", "currency": "EUR", "content_ids": ["a", 7] });
		let data = extract_value_data(props.as_object().unwrap()).unwrap();
		assert_eq!(data.value, Some(19.99));
		assert_eq!(data.currency.as_deref(), Some("EUR"));
		assert_eq!(data.content_ids, vec!["a".to_string(), "7".to_string()]);
	}

	#[test]
	fn value_precedence_follows_key_order() {
		let props = json!({ "amount": 3, "price": 2, "value": 1 });
		let data = extract_value_data(props.as_object().unwrap()).unwrap();
		assert_eq!(data.value, Some(1.0));
	}

	#[test]
	fn no_value_fields_yields_none() {
		let props = json!({ "quiz_id": "q1" });
		assert!(extract_value_data(props.as_object().unwrap()).is_none());
	}

	#[test]
	fn foreign_envelope_parses_with_defaults() {
		let event: Event = serde_json::from_str(r#"{"event_name":"app_install"}"#).unwrap();
		assert_eq!(event.timestamp, 0);
		assert!(event.platform.is_empty());
		assert_eq!(event.tracking_meta.tracking_version, TRACKING_VERSION);
	}

	proptest! {
		#[test]
		fn platform_roundtrip(platform in prop_oneof![
			Just(Platform::Website),
			Just(Platform::Mobile),
			Just(Platform::Backend),
		]) {
			let parsed: Platform = platform.to_string().parse().unwrap();
			prop_assert_eq!(platform, parsed);
		}
	}
}

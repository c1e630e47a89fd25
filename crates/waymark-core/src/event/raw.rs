// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Raw event inputs and their normalization into [`Event`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{
	compute_event_hash, extract_value_data, new_event_id, Event, EventAttribution, EventContext,
	Platform, TrackingMeta, UserData, ValueData, TRACKING_VERSION,
};
use crate::attribution::AttributionParams;

/// Accepted raw input shapes.
///
/// JSON carrying a `user_data` object is `Nested`; anything else is `Flat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEvent {
	Nested(NestedRawEvent),
	Flat(FlatRawEvent),
}

impl RawEvent {
	/// A flat event with only a name set.
	#[must_use]
	pub fn named(event_name: impl Into<String>) -> Self {
		RawEvent::Flat(FlatRawEvent {
			event_name: Some(event_name.into()),
			..Default::default()
		})
	}

	pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
		serde_json::from_value(value)
	}
}

/// Legacy shape: identity, attribution and context as top-level properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlatRawEvent {
	#[serde(default, alias = "eventName")]
	pub event_name: Option<String>,
	#[serde(default)]
	pub event_id: Option<String>,
	#[serde(default)]
	pub timestamp: Option<i64>,
	#[serde(default)]
	pub unified_user_id: Option<String>,
	#[serde(default)]
	pub session_id: Option<String>,
	#[serde(default)]
	pub device_fingerprint: Option<String>,
	#[serde(default)]
	pub user_id: Option<String>,
	#[serde(flatten)]
	pub attribution: AttributionParams,
	#[serde(default)]
	pub referrer: Option<String>,
	#[serde(default)]
	pub landing_page: Option<String>,
	#[serde(default)]
	pub device_type: Option<String>,
	#[serde(default)]
	pub locale: Option<String>,
	#[serde(default)]
	pub page_url: Option<String>,
	#[serde(default)]
	pub page_title: Option<String>,
	#[serde(default, alias = "properties")]
	pub custom_data: Map<String, Value>,
	#[serde(default)]
	pub value_data: Option<ValueData>,
	#[serde(default)]
	pub skip_deduplication: bool,
	#[serde(default)]
	pub retry_count: u32,
}

/// Current shape: identity, attribution and context grouped in objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedRawEvent {
	#[serde(default, alias = "eventName")]
	pub event_name: Option<String>,
	#[serde(default)]
	pub event_id: Option<String>,
	#[serde(default)]
	pub timestamp: Option<i64>,
	pub user_data: UserData,
	#[serde(default)]
	pub attribution: EventAttribution,
	#[serde(default)]
	pub context: EventContext,
	#[serde(default, alias = "properties")]
	pub custom_data: Map<String, Value>,
	#[serde(default)]
	pub value_data: Option<ValueData>,
	#[serde(default)]
	pub tracking_meta: RawTrackingMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrackingMeta {
	#[serde(default)]
	pub skip_deduplication: bool,
	#[serde(default)]
	pub retry_count: u32,
	#[serde(default)]
	pub batch_id: Option<String>,
}

/// Normalizes a raw input using the current wall clock.
#[must_use]
pub fn normalize(raw: RawEvent, source: Platform) -> Event {
	normalize_at(raw, source, Utc::now())
}

/// Normalizes a raw input into the canonical envelope.
///
/// Missing `event_id` and `timestamp` are filled from `now`, value data is
/// extracted from `custom_data` when not supplied, and the dedup hash is
/// computed last so it covers the defaulted fields.
#[must_use]
pub fn normalize_at(raw: RawEvent, source: Platform, now: DateTime<Utc>) -> Event {
	let mut event = match raw {
		RawEvent::Flat(flat) => flat.into_event(source),
		RawEvent::Nested(nested) => nested.into_event(source),
	};

	if event.event_id.is_empty() {
		event.event_id = new_event_id();
	}
	if event.timestamp <= 0 {
		event.timestamp = now.timestamp_millis();
	}
	if event.value_data.is_none() {
		event.value_data = extract_value_data(&event.custom_data);
	}

	event.tracking_meta.source_platform = source.to_string();
	event.tracking_meta.tracking_version = TRACKING_VERSION.to_string();
	event.tracking_meta.event_hash = compute_event_hash(&event);
	event
}

fn non_blank(value: Option<String>) -> Option<String> {
	value
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty())
}

impl FlatRawEvent {
	fn into_event(self, source: Platform) -> Event {
		Event {
			event_name: non_blank(self.event_name).unwrap_or_default(),
			event_id: non_blank(self.event_id).unwrap_or_default(),
			timestamp: self.timestamp.unwrap_or_default(),
			platform: source.to_string(),
			user_data: UserData {
				unified_user_id: non_blank(self.unified_user_id),
				session_id: non_blank(self.session_id),
				device_fingerprint: non_blank(self.device_fingerprint),
				user_id: non_blank(self.user_id),
				email_hash: None,
				phone_hash: None,
			},
			attribution: EventAttribution {
				params: self.attribution,
				referrer: non_blank(self.referrer),
				landing_page: non_blank(self.landing_page),
			},
			context: EventContext {
				device_type: non_blank(self.device_type),
				locale: non_blank(self.locale),
				page_url: non_blank(self.page_url),
				page_title: non_blank(self.page_title),
				..Default::default()
			},
			custom_data: self.custom_data,
			value_data: self.value_data,
			tracking_meta: TrackingMeta {
				skip_deduplication: self.skip_deduplication,
				retry_count: self.retry_count,
				..Default::default()
			},
		}
	}
}

impl NestedRawEvent {
	fn into_event(self, source: Platform) -> Event {
		let mut user_data = self.user_data;
		user_data.unified_user_id = non_blank(user_data.unified_user_id);
		user_data.session_id = non_blank(user_data.session_id);

		Event {
			event_name: non_blank(self.event_name).unwrap_or_default(),
			event_id: non_blank(self.event_id).unwrap_or_default(),
			timestamp: self.timestamp.unwrap_or_default(),
			platform: source.to_string(),
			user_data,
			attribution: self.attribution,
			context: self.context,
			custom_data: self.custom_data,
			value_data: self.value_data,
			tracking_meta: TrackingMeta {
				skip_deduplication: self.tracking_meta.skip_deduplication,
				retry_count: self.tracking_meta.retry_count,
				batch_id: self.tracking_meta.batch_id,
				..Default::default()
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::validate;
	use chrono::TimeZone;
	use proptest::prelude::*;
	use serde_json::json;

	fn fixed_now() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
	}

	#[test]
	fn json_with_user_data_is_nested() {
		let raw = RawEvent::from_json(json!({
			"event_name": "quiz_started",
			"user_data": { "unified_user_id": "uid_1" },
		}))
		.unwrap();
		assert!(matches!(raw, RawEvent::Nested(_)));
	}

	#[test]
	fn json_without_user_data_is_flat() {
		let raw = RawEvent::from_json(json!({
			"eventName": "quiz_started",
			"unified_user_id": "uid_1",
			"utm_source": "google",
		}))
		.unwrap();
		let RawEvent::Flat(flat) = raw else {
			panic!("expected flat event");
		};
		assert_eq!(flat.event_name.as_deref(), Some("quiz_started"));
		assert_eq!(flat.attribution.utm_source.as_deref(), Some("google"));
	}

	#[test]
	fn both_shapes_normalize_to_the_same_envelope() {
		let flat = RawEvent::from_json(json!({
			"event_name": "quiz_completed",
			"event_id": "evt_fixed",
			"timestamp": 1_700_000_000_000_i64,
			"unified_user_id": "uid_1",
			"session_id": "sess_1",
			"utm_source": "google",
			"locale": "en",
			"properties": { "score": 80 },
		}))
		.unwrap();
		let nested = RawEvent::from_json(json!({
			"event_name": "quiz_completed",
			"event_id": "evt_fixed",
			"timestamp": 1_700_000_000_000_i64,
			"user_data": { "unified_user_id": "uid_1", "session_id": "sess_1" },
			"attribution": { "utm_source": "google" },
			"context": { "locale": "en" },
			"custom_data": { "score": 80 },
		}))
		.unwrap();

		let a = normalize_at(flat, Platform::Website, fixed_now());
		let b = normalize_at(nested, Platform::Website, fixed_now());
		assert_eq!(a, b);
		assert!(validate(&a).is_valid());
	}

	#[test]
	fn defaults_are_filled() {
		let event = normalize_at(RawEvent::named("page_view"), Platform::Mobile, fixed_now());
		assert!(event.event_id.starts_with("evt_"));
		assert_eq!(event.timestamp, fixed_now().timestamp_millis());
		assert_eq!(event.platform, "mobile");
		assert_eq!(event.tracking_meta.source_platform, "mobile");
		assert_eq!(event.tracking_meta.tracking_version, TRACKING_VERSION);
		assert!(event.tracking_meta.event_hash.starts_with("hash_"));
	}

	#[test]
	fn value_data_extracted_from_custom_data() {
		let raw = RawEvent::from_json(json!({
			"event_name": "subscription_started",
			"custom_data": { "price": 9.99, "currency": "USD" },
		}))
		.unwrap();
		let event = normalize_at(raw, Platform::Backend, fixed_now());
		let value = event.value_data.unwrap();
		assert_eq!(value.value, Some(9.99));
		assert_eq!(value.currency.as_deref(), Some("USD"));
	}

	#[test]
	fn blank_identity_becomes_missing() {
		let raw = RawEvent::from_json(json!({
			"event_name": "page_view",
			"unified_user_id": "  ",
		}))
		.unwrap();
		let event = normalize_at(raw, Platform::Website, fixed_now());
		assert_eq!(event.user_data.unified_user_id, None);
		assert!(!validate(&event).is_valid());
	}

	proptest! {
		#[test]
		fn normalization_is_stable_for_explicit_fields(
			name in "[a-z_]{1,24}",
			uid in "uid_[a-z0-9]{4,12}",
			ts in 1_i64..4_000_000_000_000,
		) {
			let raw = RawEvent::Flat(FlatRawEvent {
				event_name: Some(name),
				event_id: Some("evt_x".into()),
				timestamp: Some(ts),
				unified_user_id: Some(uid),
				..Default::default()
			});
			let a = normalize_at(raw.clone(), Platform::Website, fixed_now());
			let b = normalize_at(raw, Platform::Website, fixed_now());
			prop_assert_eq!(a, b);
		}
	}
}

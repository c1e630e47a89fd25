// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Projections of the canonical envelope into downstream parameter vocabularies.
//!
//! Every projection is a pure function of one [`Event`]. A failure affects only
//! the sink that asked for it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::event::Event;

const GA4_MAX_KEY_LEN: usize = 40;
const GA4_MAX_VALUE_LEN: usize = 100;
const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Error, PartialEq)]
pub enum ProjectionError {
	#[error("value_data.value is not a finite number: {0}")]
	NonFiniteValue(f64),

	#[error("failed to serialize event: {0}")]
	Serialization(String),
}

/// Parameter vocabulary understood by a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vocabulary {
	/// The canonical envelope unchanged.
	Generic,
	Ga4,
	MetaCapi,
	AppsFlyer,
	Amplitude,
}

impl std::fmt::Display for Vocabulary {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Vocabulary::Generic => write!(f, "generic"),
			Vocabulary::Ga4 => write!(f, "ga4"),
			Vocabulary::MetaCapi => write!(f, "meta_capi"),
			Vocabulary::AppsFlyer => write!(f, "appsflyer"),
			Vocabulary::Amplitude => write!(f, "amplitude"),
		}
	}
}

impl Vocabulary {
	pub fn project(&self, event: &Event) -> Result<Value, ProjectionError> {
		let value = checked_value(event)?;
		match self {
			Vocabulary::Generic => serde_json::to_value(event)
				.map_err(|e| ProjectionError::Serialization(e.to_string())),
			Vocabulary::Ga4 => Ok(ga4(event, value)),
			Vocabulary::MetaCapi => Ok(meta_capi(event, value)),
			Vocabulary::AppsFlyer => Ok(appsflyer(event, value)),
			Vocabulary::Amplitude => Ok(amplitude(event, value)),
		}
	}
}

fn checked_value(event: &Event) -> Result<Option<f64>, ProjectionError> {
	match event.value_data.as_ref().and_then(|v| v.value) {
		Some(v) if !v.is_finite() => Err(ProjectionError::NonFiniteValue(v)),
		other => Ok(other),
	}
}

fn truncate(s: &str, max: usize) -> String {
	s.chars().take(max).collect()
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
	if let Some(v) = value {
		map.insert(key.to_string(), Value::String(v.to_string()));
	}
}

fn currency(event: &Event) -> String {
	event
		.value_data
		.as_ref()
		.and_then(|v| v.currency.clone())
		.unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
}

fn ga4(event: &Event, value: Option<f64>) -> Value {
	let mut params = Map::new();
	for (key, v) in &event.custom_data {
		let v = match v {
			Value::String(s) => Value::String(truncate(s, GA4_MAX_VALUE_LEN)),
			other => other.clone(),
		};
		params.insert(truncate(key, GA4_MAX_KEY_LEN), v);
	}
	insert_opt(
		&mut params,
		"session_id",
		event.user_data.session_id.as_deref(),
	);
	insert_opt(&mut params, "unified_user_id", event.unified_user_id());
	insert_opt(&mut params, "page_location", event.context.page_url.as_deref());
	insert_opt(
		&mut params,
		"campaign_source",
		event.attribution.params.utm_source.as_deref(),
	);
	if let Some(value) = value {
		params.insert("value".into(), json!(value));
		params.insert("currency".into(), json!(currency(event)));
	}
	if let Some(data) = &event.value_data {
		if !data.content_ids.is_empty() {
			let items: Vec<Value> = data
				.content_ids
				.iter()
				.map(|id| json!({ "item_id": id }))
				.collect();
			params.insert("items".into(), Value::Array(items));
		}
	}

	json!({
		"client_id": event
			.user_data
			.device_fingerprint
			.as_deref()
			.or(event.unified_user_id()),
		"timestamp_micros": event.timestamp.saturating_mul(1000),
		"name": truncate(&event.event_name, GA4_MAX_KEY_LEN),
		"params": params,
	})
}

fn meta_capi(event: &Event, value: Option<f64>) -> Value {
	let mut user_data = Map::new();
	if let Some(uid) = event.unified_user_id() {
		user_data.insert("external_id".into(), json!([uid]));
	}
	if let Some(fbclid) = event.attribution.params.fbclid.as_deref() {
		user_data.insert(
			"fbc".into(),
			json!(format!("fb.1.{}.{}", event.timestamp, fbclid)),
		);
	}
	insert_opt(
		&mut user_data,
		"fbp",
		event.user_data.device_fingerprint.as_deref(),
	);
	insert_opt(
		&mut user_data,
		"client_user_agent",
		event.context.user_agent.as_deref(),
	);
	insert_opt(&mut user_data, "em", event.user_data.email_hash.as_deref());
	insert_opt(&mut user_data, "ph", event.user_data.phone_hash.as_deref());

	let data = event.value_data.clone().unwrap_or_default();
	let mut custom_data = Map::new();
	if let Some(value) = value {
		custom_data.insert("value".into(), json!(value));
	}
	custom_data.insert("currency".into(), json!(currency(event)));
	custom_data.insert(
		"content_type".into(),
		json!(data.content_type.unwrap_or_else(|| "website".to_string())),
	);
	if !data.content_ids.is_empty() {
		custom_data.insert("content_ids".into(), json!(data.content_ids));
	}
	insert_opt(&mut custom_data, "content_name", data.content_name.as_deref());
	insert_opt(
		&mut custom_data,
		"content_category",
		data.content_category.as_deref(),
	);
	if let Some(n) = data.num_items {
		custom_data.insert("num_items".into(), json!(n));
	}
	for (key, v) in &event.custom_data {
		custom_data.entry(key.clone()).or_insert_with(|| v.clone());
	}

	json!({
		"event_name": event.event_name,
		"event_time": event.timestamp / 1000,
		"event_id": event.event_id,
		"action_source": "website",
		"event_source_url": event.context.page_url,
		"user_data": user_data,
		"custom_data": custom_data,
	})
}

fn appsflyer(event: &Event, value: Option<f64>) -> Value {
	let data = event.value_data.clone().unwrap_or_default();
	let mut event_value = Map::new();
	if let Some(value) = value {
		event_value.insert("af_revenue".into(), json!(value));
		event_value.insert("af_currency".into(), json!(currency(event)));
	}
	if let Some(first) = data.content_ids.first() {
		event_value.insert("af_content_id".into(), json!(first));
	}
	insert_opt(
		&mut event_value,
		"af_content_type",
		data.content_type.as_deref(),
	);
	event_value.insert("af_channel".into(), json!(event.platform));
	insert_opt(
		&mut event_value,
		"af_media_source",
		event.attribution.params.utm_source.as_deref(),
	);
	insert_opt(
		&mut event_value,
		"af_campaign",
		event.attribution.params.utm_campaign.as_deref(),
	);
	insert_opt(
		&mut event_value,
		"af_customer_user_id",
		event.unified_user_id(),
	);
	for (key, v) in &event.custom_data {
		let key = if key.starts_with("af_") {
			key.clone()
		} else {
			format!("af_{key}")
		};
		event_value.entry(key).or_insert_with(|| v.clone());
	}

	json!({
		"eventName": event.event_name,
		"eventTime": event.timestamp,
		"customer_user_id": event.unified_user_id(),
		"eventValue": event_value,
	})
}

fn amplitude(event: &Event, value: Option<f64>) -> Value {
	let mut user_properties = Map::new();
	for (key, v) in event.attribution.params.iter() {
		user_properties.insert(key.to_string(), json!(v));
	}
	insert_opt(
		&mut user_properties,
		"device_type",
		event.context.device_type.as_deref(),
	);

	let mut body = json!({
		"event_type": event.event_name,
		"user_id": event.user_data.user_id.as_deref().or(event.unified_user_id()),
		"device_id": event.user_data.device_fingerprint,
		"session_id": event.user_data.session_id,
		"time": event.timestamp,
		"insert_id": event.event_id,
		"platform": event.platform,
		"event_properties": event.custom_data,
		"user_properties": user_properties,
	});
	if let (Some(value), Value::Object(map)) = (value, &mut body) {
		map.insert("revenue".into(), json!(value));
	}
	body
}

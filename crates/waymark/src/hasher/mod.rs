// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Match-quality hashing of user data for conversion endpoints.
//!
//! User-supplied fields are normalized, hashed through a [`HasherChain`] and
//! kept alongside browser signals. [`MatchQualityHasher::score`] estimates how
//! well the resulting payload will match on the receiving side.

pub mod normalize;
mod strategy;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::diagnostics::{Counter, Diagnostics};

pub use strategy::{
	ChecksumHasher, DigestProvider, HashTier, HashedValue, Hasher, HasherChain, PlatformHasher,
	Sha256Hasher,
};

const MAX_SCORE: f64 = 10.0;

/// Hashed user-data fields, keyed by their conversion-API names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchField {
	#[serde(rename = "em")]
	Email,
	#[serde(rename = "ph")]
	Phone,
	#[serde(rename = "fn")]
	FirstName,
	#[serde(rename = "ln")]
	LastName,
	#[serde(rename = "ct")]
	City,
	#[serde(rename = "st")]
	State,
	#[serde(rename = "zp")]
	Zip,
	#[serde(rename = "country")]
	Country,
	#[serde(rename = "ge")]
	Gender,
	#[serde(rename = "db")]
	BirthDate,
	#[serde(rename = "external_id")]
	ExternalId,
}

impl MatchField {
	pub fn key(&self) -> &'static str {
		match self {
			MatchField::Email => "em",
			MatchField::Phone => "ph",
			MatchField::FirstName => "fn",
			MatchField::LastName => "ln",
			MatchField::City => "ct",
			MatchField::State => "st",
			MatchField::Zip => "zp",
			MatchField::Country => "country",
			MatchField::Gender => "ge",
			MatchField::BirthDate => "db",
			MatchField::ExternalId => "external_id",
		}
	}

	fn weight(&self) -> f64 {
		match self {
			MatchField::Email | MatchField::Phone => 2.0,
			MatchField::Zip | MatchField::Country | MatchField::ExternalId => 0.4,
			_ => 0.3,
		}
	}

	fn normalize(&self, raw: &str) -> Option<String> {
		match self {
			MatchField::Email => normalize::email(raw),
			MatchField::Phone => normalize::phone(raw),
			MatchField::FirstName | MatchField::LastName | MatchField::City | MatchField::State => {
				normalize::text(raw)
			}
			MatchField::Zip => normalize::zip(raw),
			MatchField::Country => normalize::country(raw),
			MatchField::Gender => normalize::gender(raw),
			MatchField::BirthDate => normalize::birth_date(raw),
			MatchField::ExternalId => normalize::external_id(raw),
		}
	}
}

/// Raw user data as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataInput {
	#[serde(default)]
	pub email: Option<String>,
	#[serde(default)]
	pub phone: Option<String>,
	#[serde(default, alias = "firstName")]
	pub first_name: Option<String>,
	#[serde(default, alias = "lastName")]
	pub last_name: Option<String>,
	#[serde(default)]
	pub city: Option<String>,
	#[serde(default)]
	pub state: Option<String>,
	#[serde(default, alias = "zip_code", alias = "postal_code")]
	pub zip: Option<String>,
	#[serde(default)]
	pub country: Option<String>,
	#[serde(default)]
	pub gender: Option<String>,
	#[serde(default, alias = "date_of_birth", alias = "dob")]
	pub birth_date: Option<String>,
	#[serde(default)]
	pub external_id: Option<String>,
}

impl UserDataInput {
	fn fields(&self) -> [(MatchField, Option<&str>); 11] {
		[
			(MatchField::Email, self.email.as_deref()),
			(MatchField::Phone, self.phone.as_deref()),
			(MatchField::FirstName, self.first_name.as_deref()),
			(MatchField::LastName, self.last_name.as_deref()),
			(MatchField::City, self.city.as_deref()),
			(MatchField::State, self.state.as_deref()),
			(MatchField::Zip, self.zip.as_deref()),
			(MatchField::Country, self.country.as_deref()),
			(MatchField::Gender, self.gender.as_deref()),
			(MatchField::BirthDate, self.birth_date.as_deref()),
			(MatchField::ExternalId, self.external_id.as_deref()),
		]
	}
}

/// Unhashed browser and request signals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSignals {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fbp: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fbc: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_ip_address: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_user_agent: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub fb_login_id: Option<String>,
}

impl BrowserSignals {
	fn score(&self) -> f64 {
		[
			(self.fbp.is_some(), 0.5),
			(self.fbc.is_some(), 0.5),
			(self.client_ip_address.is_some(), 1.0),
			(self.client_user_agent.is_some(), 1.0),
			(self.fb_login_id.is_some(), 1.0),
		]
		.iter()
		.filter(|(present, _)| *present)
		.map(|(_, weight)| weight)
		.sum()
	}

	/// Merges `other`, keeping existing values where `other` has none.
	fn merge(&mut self, other: BrowserSignals) {
		let BrowserSignals {
			fbp,
			fbc,
			client_ip_address,
			client_user_agent,
			fb_login_id,
		} = other;
		self.fbp = fbp.or(self.fbp.take());
		self.fbc = fbc.or(self.fbc.take());
		self.client_ip_address = client_ip_address.or(self.client_ip_address.take());
		self.client_user_agent = client_user_agent.or(self.client_user_agent.take());
		self.fb_login_id = fb_login_id.or(self.fb_login_id.take());
	}
}

/// Browser id in the `_fbp` cookie format.
pub fn browser_id(now_ms: i64) -> String {
	format!("fb.1.{now_ms}.{}", fastrand::u64(1_000_000_000..10_000_000_000))
}

/// Click id in the `_fbc` cookie format.
pub fn click_id(now_ms: i64, fbclid: &str) -> String {
	format!("fb.1.{now_ms}.{fbclid}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OmitReason {
	/// The value did not survive normalization.
	Invalid,
	/// No hashing strategy was available.
	HashingExhausted,
}

/// Outcome of one [`MatchQualityHasher::set_user_data`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchReport {
	pub hashed: Vec<(MatchField, HashTier)>,
	pub omitted: Vec<(MatchField, OmitReason)>,
	pub score: f64,
}

#[derive(Debug, Default)]
struct MatchState {
	fields: BTreeMap<MatchField, HashedValue>,
	signals: BrowserSignals,
}

#[derive(Debug)]
pub struct MatchQualityHasher {
	chain: HasherChain,
	diagnostics: Arc<Diagnostics>,
	state: RwLock<MatchState>,
}

impl MatchQualityHasher {
	pub fn new(chain: HasherChain, diagnostics: Arc<Diagnostics>) -> Self {
		Self {
			chain,
			diagnostics,
			state: RwLock::new(MatchState::default()),
		}
	}

	/// Normalizes and hashes every supplied field. Fields not present in
	/// `input` keep their previous values.
	pub fn set_user_data(&self, input: &UserDataInput) -> MatchReport {
		let mut report = MatchReport::default();
		let mut hashed = Vec::new();

		for (field, raw) in input.fields() {
			let Some(raw) = raw else { continue };
			let Some(normalized) = field.normalize(raw) else {
				report.omitted.push((field, OmitReason::Invalid));
				continue;
			};

			match self.chain.digest(&normalized) {
				Some(value) => {
					if !value.tier.production_safe() {
						debug!(field = field.key(), "hashed with non-production checksum");
					}
					report.hashed.push((field, value.tier));
					hashed.push((field, value));
				}
				None => {
					self.diagnostics.incr(Counter::HashingExhausted);
					warn!(field = field.key(), "no hashing strategy available, field omitted");
					report.omitted.push((field, OmitReason::HashingExhausted));
				}
			}
		}

		self.state.write().fields.extend(hashed);
		report.score = self.score();
		report
	}

	pub fn set_browser_signals(&self, signals: BrowserSignals) {
		self.state.write().signals.merge(signals);
	}

	pub fn browser_signals(&self) -> BrowserSignals {
		self.state.read().signals.clone()
	}

	pub fn hashed(&self, field: MatchField) -> Option<HashedValue> {
		self.state.read().fields.get(&field).cloned()
	}

	pub fn clear(&self) {
		*self.state.write() = MatchState::default();
	}

	/// Weighted match-quality estimate in `[0, 10]`, one decimal place.
	/// Diagnostic only.
	pub fn score(&self) -> f64 {
		let state = self.state.read();
		let fields: f64 = state.fields.keys().map(MatchField::weight).sum();
		let total = (fields + state.signals.score()).min(MAX_SCORE);
		(total * 10.0).round() / 10.0
	}

	/// Missing high-value fields, most valuable first.
	pub fn improvement_suggestions(&self) -> Vec<String> {
		let state = self.state.read();
		let has = |field| state.fields.contains_key(&field);
		let mut suggestions = Vec::new();

		if !has(MatchField::Email) {
			suggestions.push("Add email address (highest match impact)".to_string());
		}
		if !has(MatchField::Phone) {
			suggestions.push("Add phone number".to_string());
		}
		if state.signals.client_ip_address.is_none() || state.signals.client_user_agent.is_none() {
			suggestions.push("Forward client IP address and user agent".to_string());
		}
		if state.signals.fbp.is_none() {
			suggestions.push("Set the _fbp browser id".to_string());
		}
		if state.signals.fbc.is_none() {
			suggestions.push("Capture fbclid to build the _fbc click id".to_string());
		}
		if !has(MatchField::ExternalId) {
			suggestions.push("Set external_id to the unified user id".to_string());
		}
		if !has(MatchField::FirstName) || !has(MatchField::LastName) {
			suggestions.push("Add first and last name".to_string());
		}
		suggestions
	}

	/// Production-safe hashed fields plus browser signals, shaped as a
	/// conversion-API `user_data` object.
	pub fn matching_payload(&self) -> Map<String, Value> {
		let state = self.state.read();
		let mut payload = Map::new();

		for (field, value) in &state.fields {
			if value.tier.production_safe() {
				payload.insert(field.key().to_string(), json!([value.digest]));
			}
		}

		if let Ok(Value::Object(signals)) = serde_json::to_value(&state.signals) {
			payload.extend(signals);
		}
		payload
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hasher(chain: HasherChain) -> (MatchQualityHasher, Arc<Diagnostics>) {
		let diagnostics = Arc::new(Diagnostics::new());
		(MatchQualityHasher::new(chain, diagnostics.clone()), diagnostics)
	}

	fn email(value: &str) -> UserDataInput {
		UserDataInput {
			email: Some(value.to_string()),
			..Default::default()
		}
	}

	#[test]
	fn falls_back_to_checksum_when_sha256_is_unavailable() {
		let (hasher, _) = hasher(HasherChain::new(vec![
			Arc::new(PlatformHasher::unavailable()),
			Arc::new(Sha256Hasher::disabled()),
			Arc::new(ChecksumHasher),
		]));
		let report = hasher.set_user_data(&email("a@b.com"));
		assert_eq!(report.hashed, vec![(MatchField::Email, HashTier::Checksum)]);

		let hashed = hasher.hashed(MatchField::Email).unwrap();
		assert!(!hashed.digest.is_empty());
		// Checksum digests never reach the conversions payload.
		assert!(!hasher.matching_payload().contains_key("em"));
	}

	#[test]
	fn exhausted_chain_omits_field_and_counts() {
		let (hasher, diagnostics) = hasher(HasherChain::new(Vec::new()));
		let report = hasher.set_user_data(&email("a@b.com"));
		assert!(report.hashed.is_empty());
		assert_eq!(
			report.omitted,
			vec![(MatchField::Email, OmitReason::HashingExhausted)]
		);
		assert_eq!(diagnostics.get(Counter::HashingExhausted), 1);
	}

	#[test]
	fn equivalent_emails_hash_identically() {
		let (hasher, _) = hasher(HasherChain::default());
		hasher.set_user_data(&email("John.Doe@gmail.com"));
		let a = hasher.hashed(MatchField::Email).unwrap();
		hasher.set_user_data(&email(" johndoe@GMAIL.com"));
		let b = hasher.hashed(MatchField::Email).unwrap();
		assert_eq!(a, b);
		assert_eq!(a.tier, HashTier::Library);
	}

	#[test]
	fn invalid_values_are_reported() {
		let (hasher, _) = hasher(HasherChain::default());
		let report = hasher.set_user_data(&UserDataInput {
			country: Some("USA".into()),
			gender: Some("unknown".into()),
			..Default::default()
		});
		assert!(report.hashed.is_empty());
		assert_eq!(report.omitted.len(), 2);
	}

	#[test]
	fn score_is_weighted_and_capped() {
		let (hasher, _) = hasher(HasherChain::default());
		assert_eq!(hasher.score(), 0.0);

		hasher.set_user_data(&UserDataInput {
			email: Some("a@b.com".into()),
			phone: Some("5551234567".into()),
			first_name: Some("Ada".into()),
			..Default::default()
		});
		assert_eq!(hasher.score(), 4.3);

		hasher.set_browser_signals(BrowserSignals {
			fbp: Some(browser_id(1)),
			fbc: Some(click_id(1, "abc")),
			client_ip_address: Some("203.0.113.7".into()),
			client_user_agent: Some("Mozilla/5.0".into()),
			fb_login_id: Some("42".into()),
		});
		hasher.set_user_data(&UserDataInput {
			last_name: Some("Lovelace".into()),
			city: Some("London".into()),
			state: Some("ldn".into()),
			zip: Some("SW1A 1AA".into()),
			country: Some("gb".into()),
			gender: Some("f".into()),
			birth_date: Some("1815-12-10".into()),
			external_id: Some("uid_1".into()),
			..Default::default()
		});
		assert_eq!(hasher.score(), 10.0);
		assert_eq!(hasher.improvement_suggestions(), Vec::<String>::new());
	}

	#[test]
	fn payload_includes_signals_and_safe_hashes() {
		let (hasher, _) = hasher(HasherChain::default());
		hasher.set_user_data(&email("a@b.com"));
		hasher.set_browser_signals(BrowserSignals {
			fbc: Some(click_id(1_700_000_000_000, "IwAR0")),
			..Default::default()
		});

		let payload = hasher.matching_payload();
		assert_eq!(payload["em"].as_array().unwrap().len(), 1);
		assert_eq!(payload["fbc"], "fb.1.1700000000000.IwAR0");
		assert!(!payload.contains_key("fbp"));
	}

	#[test]
	fn browser_id_format() {
		let id = browser_id(1_700_000_000_000);
		let parts: Vec<&str> = id.split('.').collect();
		assert_eq!(parts.len(), 4);
		assert_eq!(parts[0], "fb");
		assert_eq!(parts[2], "1700000000000");
		assert_eq!(parts[3].len(), 10);
	}

	#[test]
	fn suggestions_start_with_email() {
		let (hasher, _) = hasher(HasherChain::default());
		let suggestions = hasher.improvement_suggestions();
		assert!(suggestions[0].contains("email"));
	}
}

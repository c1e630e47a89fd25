// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Consent decisions and sink gating.
//!
//! Fails closed: until the user decides, only necessary sinks receive events.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};
use waymark_config::ConsentConfig;
use waymark_core::{ConsentCategory, ConsentState};

use crate::clock::Clock;
use crate::storage::{keys, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentAction {
	AcceptAll,
	RejectAll,
	Customize,
}

/// One recorded consent decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentChange {
	pub action: ConsentAction,
	pub state: ConsentState,
	pub changed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StoredConsent {
	#[serde(flatten)]
	state: ConsentState,
	#[serde(default)]
	updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct GateState {
	state: ConsentState,
	decided_at: Option<DateTime<Utc>>,
	decided: bool,
	history: Vec<ConsentChange>,
}

/// Holds the current consent state and answers which sinks may receive
/// events.
#[derive(Debug)]
pub struct ConsentGate {
	store: Arc<dyn KeyValueStore>,
	clock: Arc<dyn Clock>,
	mapping: ConsentConfig,
	inner: RwLock<GateState>,
	tx: watch::Sender<ConsentState>,
}

impl ConsentGate {
	/// Loads the stored decision. Absent or unreadable values leave the gate
	/// in the denied state with no decision recorded.
	pub fn load(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, mapping: ConsentConfig) -> Self {
		let mut inner = GateState::default();

		match store.get(keys::CONSENT) {
			Ok(Some(raw)) => match ConsentState::decode_stored(&raw) {
				Some(state) => {
					inner.state = state;
					inner.decided = true;
					inner.decided_at = serde_json::from_str::<StoredConsent>(&raw)
						.ok()
						.and_then(|stored| stored.updated_at);
				}
				None => warn!("stored consent is unreadable, treating as undecided"),
			},
			Ok(None) => {}
			Err(e) => warn!(error = %e, "failed to read stored consent"),
		}

		let (tx, _) = watch::channel(inner.state);
		Self {
			store,
			clock,
			mapping,
			inner: RwLock::new(inner),
			tx,
		}
	}

	pub fn state(&self) -> ConsentState {
		self.inner.read().state
	}

	pub fn has_decision(&self) -> bool {
		self.inner.read().decided
	}

	pub fn decided_at(&self) -> Option<DateTime<Utc>> {
		self.inner.read().decided_at
	}

	pub fn allows(&self, category: ConsentCategory) -> bool {
		self.state().allows(category)
	}

	pub fn accept_all(&self) -> ConsentState {
		self.apply(ConsentAction::AcceptAll, ConsentState::granted_all())
	}

	pub fn reject_all(&self) -> ConsentState {
		self.apply(ConsentAction::RejectAll, ConsentState::denied())
	}

	pub fn customize(&self, analytics: bool, marketing: bool) -> ConsentState {
		self.apply(
			ConsentAction::Customize,
			ConsentState::custom(analytics, marketing),
		)
	}

	/// Decisions made through this gate, oldest first.
	pub fn history(&self) -> Vec<ConsentChange> {
		self.inner.read().history.clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<ConsentState> {
		self.tx.subscribe()
	}

	/// The category a sink is gated by. Configured mappings take precedence
	/// over what the sink declares.
	pub fn category_for_sink(&self, sink: &str, declared: ConsentCategory) -> ConsentCategory {
		self.mapping.category_for(sink).unwrap_or(declared)
	}

	pub fn allows_sink(&self, sink: &str, declared: ConsentCategory) -> bool {
		self.allows(self.category_for_sink(sink, declared))
	}

	/// Google consent-mode signals for the current state.
	pub fn consent_mode(&self) -> BTreeMap<&'static str, &'static str> {
		let state = self.state();
		let signal = |granted: bool| if granted { "granted" } else { "denied" };
		BTreeMap::from([
			("analytics_storage", signal(state.analytics)),
			("ad_storage", signal(state.marketing)),
			("ad_user_data", signal(state.marketing)),
			("ad_personalization", signal(state.marketing)),
			("functionality_storage", "granted"),
			("security_storage", "granted"),
		])
	}

	/// Parameters propagating the decision to the app through a link. Empty
	/// until a decision exists.
	pub fn link_params(&self) -> BTreeMap<String, String> {
		let inner = self.inner.read();
		if !inner.decided {
			return BTreeMap::new();
		}

		let flag = |granted: bool| (if granted { "1" } else { "0" }).to_string();
		let mut params = BTreeMap::from([
			("consent_sync".to_string(), "1".to_string()),
			("consent_analytics".to_string(), flag(inner.state.analytics)),
			("consent_marketing".to_string(), flag(inner.state.marketing)),
		]);
		if let Some(at) = inner.decided_at {
			params.insert("consent_ts".to_string(), at.timestamp_millis().to_string());
		}
		params
	}

	fn apply(&self, action: ConsentAction, state: ConsentState) -> ConsentState {
		let now = self.clock.now();
		{
			let mut inner = self.inner.write();
			inner.state = state;
			inner.decided = true;
			inner.decided_at = Some(now);
			inner.history.push(ConsentChange {
				action,
				state,
				changed_at: now,
			});
		}

		let stored = StoredConsent {
			state,
			updated_at: Some(now),
		};
		match serde_json::to_string(&stored) {
			Ok(raw) => {
				if let Err(e) = self.store.set(keys::CONSENT, &raw) {
					warn!(error = %e, "failed to persist consent decision");
				}
			}
			Err(e) => warn!(error = %e, "failed to encode consent decision"),
		}

		self.tx.send_replace(state);
		info!(action = ?action, consent = %state.summary(), "consent updated");
		state
	}
}

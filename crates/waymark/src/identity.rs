// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity, session, visit and attribution resolution.

use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;
use waymark_core::session::{SessionEventRecord, DEFAULT_SESSION_TIMEOUT_SECS};
use waymark_core::{
	AttributionParams, AttributionRecord, AttributionState, Session, SessionId, UnifiedIdentity,
	UnifiedUserId, VisitMetrics,
};

use crate::clock::Clock;
use crate::diagnostics::{Counter, Diagnostics};
use crate::error::StorageError;
use crate::fingerprint::{compute_fingerprint, DeviceEnvironment};
use crate::storage::{keys, read_json, write_json, KeyValueStore, Storage};

/// The page the host is currently showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
	pub url: Url,
	pub referrer: Option<String>,
	pub title: Option<String>,
}

impl PageContext {
	pub fn new(url: Url) -> Self {
		Self {
			url,
			referrer: None,
			title: None,
		}
	}

	pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
		self.referrer = Some(referrer.into()).filter(|r: &String| !r.is_empty());
		self
	}

	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.title = Some(title.into());
		self
	}

	/// The URL without query or fragment.
	pub fn landing_page(&self) -> String {
		let mut url = self.url.clone();
		url.set_query(None);
		url.set_fragment(None);
		url.to_string()
	}
}

/// Read-only view of the resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySnapshot {
	pub unified_user_id: UnifiedUserId,
	pub session_id: Option<SessionId>,
	pub device_fingerprint: String,
	pub is_new_user: bool,
	pub visit_metrics: Option<VisitMetrics>,
	pub attribution: AttributionState,
}

#[derive(Debug, Default)]
struct ResolverState {
	identity: Option<UnifiedIdentity>,
	/// False while the cached identity has not reached storage.
	persisted: bool,
	is_new_user: bool,
	environment: DeviceEnvironment,
	page: Option<PageContext>,
}

/// Owns the identity, session, visit-metric and attribution records.
///
/// All mutation goes through this type. Storage failures are logged and
/// counted; the in-memory view keeps the SDK usable when storage is not.
#[derive(Debug)]
pub struct IdentityResolver {
	storage: Storage,
	clock: Arc<dyn Clock>,
	diagnostics: Arc<Diagnostics>,
	session_timeout: Duration,
	state: Mutex<ResolverState>,
}

impl IdentityResolver {
	pub fn new(storage: Storage, clock: Arc<dyn Clock>, diagnostics: Arc<Diagnostics>) -> Self {
		Self {
			storage,
			clock,
			diagnostics,
			session_timeout: Duration::seconds(DEFAULT_SESSION_TIMEOUT_SECS),
			state: Mutex::new(ResolverState::default()),
		}
	}

	pub fn with_environment(self, environment: DeviceEnvironment) -> Self {
		self.state.lock().environment = environment;
		self
	}

	pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
		self.session_timeout = timeout;
		self
	}

	pub fn session_timeout(&self) -> Duration {
		self.session_timeout
	}

	pub fn environment(&self) -> DeviceEnvironment {
		self.state.lock().environment.clone()
	}

	pub fn current_page(&self) -> Option<PageContext> {
		self.state.lock().page.clone()
	}

	/// Resolves identity, session, visit metrics and landing-page attribution
	/// for `page`.
	pub fn init(&self, page: &PageContext) -> IdentitySnapshot {
		self.state.lock().page = Some(page.clone());

		let identity = self.ensure_identity();
		let session = self.ensure_session();
		self.record_visit();
		self.record_attribution(&AttributionParams::from_url(&page.url), Some(page));

		info!(
			unified_user_id = %identity.id,
			session_id = %session.id,
			page_views = session.page_views,
			"identity initialized"
		);
		self.snapshot()
	}

	/// Returns the stored identity, creating one on first use.
	pub fn ensure_identity(&self) -> UnifiedIdentity {
		let mut state = self.state.lock();

		match read_json::<UnifiedIdentity>(self.storage.durable.as_ref(), keys::IDENTITY) {
			Ok(Some(identity)) => {
				state.identity = Some(identity.clone());
				state.persisted = true;
				return identity;
			}
			Ok(None) => {
				if let (Some(cached), false) = (&state.identity, state.persisted) {
					let cached = cached.clone();
					state.persisted = self.persist(keys::IDENTITY, &cached);
					return cached;
				}
			}
			Err(e) => {
				self.storage_failed(keys::IDENTITY, &e);
				if let Some(cached) = &state.identity {
					return cached.clone();
				}
			}
		}

		let identity = UnifiedIdentity::new(compute_fingerprint(&state.environment), self.clock.now());
		state.persisted = self.persist(keys::IDENTITY, &identity);
		state.identity = Some(identity.clone());
		state.is_new_user = true;
		info!(unified_user_id = %identity.id, "created unified identity");
		identity
	}

	/// Returns the active session, extending it and counting a page view, or
	/// starts a new one when the inactivity window has elapsed.
	pub fn ensure_session(&self) -> Session {
		let now = self.clock.now();
		let session = match self.load_session() {
			Some(mut session) if !session.is_expired(now, self.session_timeout) => {
				session.touch(now);
				session
			}
			_ => self.start_session(),
		};
		self.persist_ephemeral(keys::SESSION, &session);
		session
	}

	/// The active session, without touching it.
	pub fn current_session(&self) -> Option<Session> {
		self
			.load_session()
			.filter(|s| !s.is_expired(self.clock.now(), self.session_timeout))
	}

	/// The active session, starting and storing a new one when none is live.
	/// Activity is not extended.
	pub fn active_session(&self) -> Session {
		if let Some(session) = self.current_session() {
			return session;
		}
		let session = self.start_session();
		self.persist_ephemeral(keys::SESSION, &session);
		session
	}

	/// Appends an event to the session log and extends activity without
	/// counting a page view.
	pub fn record_event(&self, event_name: &str, event_id: &str) -> Session {
		let now = self.clock.now();
		let mut session = self
			.current_session()
			.unwrap_or_else(|| self.start_session());
		session.record_event(SessionEventRecord {
			event_name: event_name.to_string(),
			event_id: event_id.to_string(),
			timestamp: now,
		});
		self.persist_ephemeral(keys::SESSION, &session);
		session
	}

	/// Records attribution seen on a landing. Last touch is always replaced;
	/// first touch is written only once. Returns false for empty input.
	pub fn record_attribution(
		&self,
		params: &AttributionParams,
		page: Option<&PageContext>,
	) -> bool {
		if params.is_empty() {
			return false;
		}

		let record = AttributionRecord::new(
			params.clone(),
			page.and_then(|p| p.referrer.clone()),
			page.map(PageContext::landing_page),
			self.clock.now(),
		);

		self.persist_ephemeral(keys::LAST_TOUCH, &record);

		match read_json::<AttributionRecord>(self.storage.durable.as_ref(), keys::FIRST_TOUCH) {
			Ok(None) => {
				if self.persist(keys::FIRST_TOUCH, &record) {
					debug!(source = ?record.source(), "recorded first touch");
				}
			}
			Ok(Some(_)) => {}
			// An unreadable first touch is never overwritten.
			Err(e) => self.storage_failed(keys::FIRST_TOUCH, &e),
		}
		true
	}

	pub fn attribution(&self) -> AttributionState {
		AttributionState {
			first_touch: self.read_or_none(self.storage.durable.as_ref(), keys::FIRST_TOUCH),
			last_touch: self.read_or_none(self.storage.ephemeral.as_ref(), keys::LAST_TOUCH),
		}
	}

	pub fn visit_metrics(&self) -> Option<VisitMetrics> {
		self.read_or_none(self.storage.durable.as_ref(), keys::VISIT_METRICS)
	}

	fn record_visit(&self) -> VisitMetrics {
		let now = self.clock.now();
		let metrics = match self.visit_metrics() {
			Some(mut metrics) => {
				metrics.record_visit(now);
				metrics
			}
			None => VisitMetrics::first(now),
		};
		self.persist(keys::VISIT_METRICS, &metrics);
		metrics
	}

	/// Current identity, session and attribution. Creates the identity on
	/// first use; never touches the session or attribution records.
	pub fn snapshot(&self) -> IdentitySnapshot {
		let identity = self.ensure_identity();
		let is_new_user = self.state.lock().is_new_user;
		IdentitySnapshot {
			unified_user_id: identity.id,
			session_id: self.current_session().map(|s| s.id),
			device_fingerprint: identity.device_fingerprint,
			is_new_user,
			visit_metrics: self.visit_metrics(),
			attribution: self.attribution(),
		}
	}

	/// Recomputes the fingerprint from a fresh environment reading. Storage
	/// failures are counted, never returned.
	pub fn refresh_fingerprint(&self, environment: DeviceEnvironment) -> String {
		let fingerprint = compute_fingerprint(&environment);
		self.state.lock().environment = environment;

		let mut identity = self.ensure_identity();
		if identity.device_fingerprint != fingerprint {
			identity.device_fingerprint = fingerprint.clone();
			if !self.persist(keys::IDENTITY, &identity) {
				self.diagnostics.incr(Counter::FingerprintFailures);
			}
			debug!(unified_user_id = %identity.id, "device fingerprint changed");
			self.state.lock().identity = Some(identity);
		}
		fingerprint
	}

	/// Replaces the stored unified user id, keeping creation time and
	/// fingerprint.
	pub fn adopt_unified_user_id(&self, id: UnifiedUserId) -> UnifiedIdentity {
		let mut identity = self.ensure_identity();
		if identity.id == id {
			return identity;
		}

		info!(previous = %identity.id, adopted = %id, "adopting unified user id");
		identity.id = id;
		let persisted = self.persist(keys::IDENTITY, &identity);

		let mut state = self.state.lock();
		state.identity = Some(identity.clone());
		state.persisted = persisted;
		identity
	}

	pub(crate) fn storage(&self) -> &Storage {
		&self.storage
	}

	fn start_session(&self) -> Session {
		let page = self.state.lock().page.clone();
		let session = Session::start(
			self.clock.now(),
			page.as_ref().and_then(|p| p.referrer.clone()),
			page.as_ref().map(PageContext::landing_page),
		);
		debug!(session_id = %session.id, "started session");
		session
	}

	fn load_session(&self) -> Option<Session> {
		self.read_or_none(self.storage.ephemeral.as_ref(), keys::SESSION)
	}

	fn read_or_none<T: serde::de::DeserializeOwned>(
		&self,
		store: &dyn KeyValueStore,
		key: &str,
	) -> Option<T> {
		read_json(store, key).unwrap_or_else(|e| {
			self.storage_failed(key, &e);
			None
		})
	}

	fn persist<T: Serialize>(&self, key: &str, value: &T) -> bool {
		self.write(self.storage.durable.as_ref(), key, value)
	}

	fn persist_ephemeral<T: Serialize>(&self, key: &str, value: &T) -> bool {
		self.write(self.storage.ephemeral.as_ref(), key, value)
	}

	fn write<T: Serialize>(&self, store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
		match write_json(store, key, value) {
			Ok(()) => true,
			Err(e) => {
				self.storage_failed(key, &e);
				false
			}
		}
	}

	fn storage_failed(&self, key: &str, error: &StorageError) {
		self.diagnostics.incr(Counter::StorageFailures);
		warn!(key, error = %error, "identity storage operation failed");
	}
}

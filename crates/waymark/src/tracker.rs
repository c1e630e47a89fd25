// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The tracker: one explicitly constructed context that owns every service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use waymark_config::{SinksConfig, WaymarkConfig};
use waymark_core::event::names;
use waymark_core::{
	compute_event_hash, normalize_at, validate, AttributionParams, Event, FlatRawEvent, Platform,
	RawEvent, ValidationReport,
};

use crate::batch::{BatchEngine, BatchSettings, DispatchOptions, EnqueueOutcome, FlushReport};
use crate::beacon::BeaconSender;
use crate::clock::{Clock, SystemClock};
use crate::consent::ConsentGate;
use crate::diagnostics::{Counter, Diagnostics, DiagnosticsSnapshot};
use crate::error::{Result, WaymarkError};
use crate::fingerprint::DeviceEnvironment;
use crate::handoff::{
	HandoffRequest, HandoffService, HandoffStore, HandoffToken, HttpHandoffStore, RestoredHandoff,
	Surface,
};
use crate::hasher::{
	browser_id, click_id, BrowserSignals, DigestProvider, HasherChain, MatchField, MatchQualityHasher,
	MatchReport, UserDataInput,
};
use crate::identity::{IdentityResolver, IdentitySnapshot, PageContext};
use crate::link::{AppPlatform, AttributionLink, AttributionLinkBuilder};
use crate::network::{NetworkQuality, Visibility};
use crate::sink::{BackendSink, ConversionsSink, RelaySink, RelayVendor, Sink, TracingSink};
use crate::storage::Storage;

/// What happened to one tracked event.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
	Queued { event_id: String },
	Flushed { event_id: String, report: FlushReport },
	Duplicate { event_id: String },
	/// Dropped before queueing.
	Invalid(ValidationReport),
	/// The tracker has been shut down.
	Closed,
}

impl TrackOutcome {
	pub fn event_id(&self) -> Option<&str> {
		match self {
			TrackOutcome::Queued { event_id }
			| TrackOutcome::Flushed { event_id, .. }
			| TrackOutcome::Duplicate { event_id } => Some(event_id),
			TrackOutcome::Invalid(_) | TrackOutcome::Closed => None,
		}
	}
}

/// Result of [`Tracker::init`].
#[derive(Debug, Clone, PartialEq)]
pub struct InitReport {
	pub identity: IdentitySnapshot,
	pub restored: Option<RestoredHandoff>,
}

/// Builder for constructing a [`Tracker`].
pub struct TrackerBuilder {
	config: WaymarkConfig,
	platform: Platform,
	surface: Surface,
	storage: Option<Storage>,
	clock: Option<Arc<dyn Clock>>,
	environment: DeviceEnvironment,
	sinks: Vec<Arc<dyn Sink>>,
	tracing_sink: bool,
	handoff_store: Option<Arc<dyn HandoffStore>>,
	digest_provider: Option<Arc<dyn DigestProvider>>,
	http_client: Option<Client>,
}

impl TrackerBuilder {
	pub fn new() -> Self {
		Self {
			config: WaymarkConfig::default(),
			platform: Platform::Website,
			surface: Surface::Web,
			storage: None,
			clock: None,
			environment: DeviceEnvironment::default(),
			sinks: Vec::new(),
			tracing_sink: true,
			handoff_store: None,
			digest_provider: None,
			http_client: None,
		}
	}

	pub fn config(mut self, config: WaymarkConfig) -> Self {
		self.config = config;
		self
	}

	/// Platform stamped on every event. Defaults to `website`.
	pub fn platform(mut self, platform: Platform) -> Self {
		self.platform = platform;
		self
	}

	/// The surface this tracker runs on, for handoff tokens.
	pub fn surface(mut self, surface: Surface) -> Self {
		self.surface = surface;
		self
	}

	/// Overrides the storage chosen from `identity.storage_dir`.
	pub fn storage(mut self, storage: Storage) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn environment(mut self, environment: DeviceEnvironment) -> Self {
		self.environment = environment;
		self
	}

	/// Adds a sink next to the ones built from configuration.
	pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
		self.sinks.push(sink);
		self
	}

	/// Enables or disables the built-in [`TracingSink`]. Enabled by default.
	pub fn with_tracing_sink(mut self, enabled: bool) -> Self {
		self.tracing_sink = enabled;
		self
	}

	/// Overrides the remote store built from `handoff.base_url`.
	pub fn handoff_store(mut self, store: Arc<dyn HandoffStore>) -> Self {
		self.handoff_store = Some(store);
		self
	}

	/// Host-provided SHA-256, tried before the in-process implementation.
	pub fn digest_provider(mut self, provider: Arc<dyn DigestProvider>) -> Self {
		self.digest_provider = Some(provider);
		self
	}

	pub fn http_client(mut self, client: Client) -> Self {
		self.http_client = Some(client);
		self
	}

	pub fn build(self) -> Result<Tracker> {
		let config = self.config;

		let http_client = match self.http_client {
			Some(client) => client,
			None => waymark_common_http::builder()
				.timeout(Duration::from_millis(config.handoff.request_timeout_ms))
				.build()
				.map_err(WaymarkError::HttpClient)?,
		};

		let storage = match (self.storage, &config.identity.storage_dir) {
			(Some(storage), _) => storage,
			(None, Some(dir)) => Storage::on_disk(dir)?,
			(None, None) => Storage::in_memory(),
		};
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let diagnostics = Arc::new(Diagnostics::new());

		let session_timeout =
			chrono::Duration::from_std(Duration::from_secs(config.identity.session_timeout_secs))
				.unwrap_or(chrono::Duration::MAX);
		let identity = Arc::new(
			IdentityResolver::new(storage.clone(), clock.clone(), diagnostics.clone())
				.with_environment(self.environment)
				.with_session_timeout(session_timeout),
		);
		let consent = Arc::new(ConsentGate::load(
			storage.durable.clone(),
			clock.clone(),
			config.consent.clone(),
		));
		let hasher = Arc::new(MatchQualityHasher::new(
			HasherChain::standard(self.digest_provider),
			diagnostics.clone(),
		));

		let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
		if self.tracing_sink {
			sinks.push(Arc::new(TracingSink::new()));
		}
		if let Some(url) = &config.sinks.backend_url {
			let mut sink = BackendSink::new(http_client.clone(), url);
			if let Some(key) = &config.sinks.backend_api_key {
				sink = sink.with_api_key(key.clone());
			}
			sinks.push(Arc::new(sink));
		}
		if let Some(url) = &config.sinks.conversions_url {
			let mut sink = ConversionsSink::new(http_client.clone(), url, config.sinks.sdk_version.clone())
				.with_hasher(hasher.clone());
			if let Some(key) = &config.sinks.conversions_api_key {
				sink = sink.with_api_key(key.clone());
			}
			if let Some(pixel_id) = &config.sinks.meta_pixel_id {
				sink = sink.with_pixel_id(pixel_id.clone());
			}
			sinks.push(Arc::new(sink));
		}
		if let Some(relay_url) = &config.sinks.tagging_url {
			for vendor in relay_vendors(&config.sinks) {
				sinks.push(Arc::new(RelaySink::new(http_client.clone(), relay_url, vendor)));
			}
		}
		sinks.extend(self.sinks);

		let engine = BatchEngine::new(
			BatchSettings::from(&config.batch),
			sinks,
			consent.clone(),
			clock.clone(),
			diagnostics.clone(),
		);

		let links = AttributionLinkBuilder::new(config.links.clone(), identity.clone(), consent.clone())?;

		let remote_store = match (self.handoff_store, &config.handoff.base_url) {
			(Some(store), _) => Some(store),
			(None, Some(base_url)) => Some(Arc::new(HttpHandoffStore::new(http_client.clone(), base_url))
				as Arc<dyn HandoffStore>),
			(None, None) => None,
		};
		let mut handoff = HandoffService::new(
			identity.clone(),
			clock.clone(),
			diagnostics.clone(),
			config.handoff.clone(),
		)
		.with_surface(self.surface)
		.with_beacon(BeaconSender::new(
			http_client,
			Duration::from_millis(config.batch.beacon_timeout_ms),
		));
		if let Some(store) = remote_store {
			handoff = handoff.with_store(store);
		}

		info!(
			platform = %self.platform,
			surface = %self.surface,
			sinks = ?engine.sink_names(),
			link_mode = ?links.mode(),
			"tracker initialized"
		);

		Ok(Tracker {
			inner: Arc::new(TrackerInner {
				platform: self.platform,
				clock,
				diagnostics,
				identity,
				consent,
				hasher,
				engine,
				links,
				handoff,
				network: Mutex::new(NetworkQuality::Unknown),
			}),
		})
	}
}

/// Relay vendors with credentials present in `config`.
fn relay_vendors(config: &SinksConfig) -> Vec<RelayVendor> {
	let mut vendors = Vec::new();
	if let Some(measurement_id) = &config.ga4_measurement_id {
		vendors.push(RelayVendor::Ga4 {
			measurement_id: measurement_id.clone(),
		});
	}
	if let Some(dev_key) = &config.appsflyer_dev_key {
		vendors.push(RelayVendor::AppsFlyer {
			dev_key: dev_key.clone(),
		});
	}
	if let Some(api_key) = &config.amplitude_api_key {
		vendors.push(RelayVendor::Amplitude {
			api_key: api_key.clone(),
		});
	}
	vendors
}

impl Default for TrackerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct TrackerInner {
	platform: Platform,
	clock: Arc<dyn Clock>,
	diagnostics: Arc<Diagnostics>,
	identity: Arc<IdentityResolver>,
	consent: Arc<ConsentGate>,
	hasher: Arc<MatchQualityHasher>,
	engine: BatchEngine,
	links: AttributionLinkBuilder,
	handoff: HandoffService,
	network: Mutex<NetworkQuality>,
}

/// Identity, attribution and event dispatch for one surface.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Tracker {
	inner: Arc<TrackerInner>,
}

impl std::fmt::Debug for Tracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tracker")
			.field("platform", &self.inner.platform)
			.field("engine", &self.inner.engine)
			.finish_non_exhaustive()
	}
}

impl Tracker {
	pub fn builder() -> TrackerBuilder {
		TrackerBuilder::new()
	}

	/// Resolves identity for `page`, restores a handoff when the URL carries
	/// one, and records click-id browser signals.
	pub async fn init(&self, page: PageContext) -> InitReport {
		let inner = &self.inner;
		let mut identity = inner.identity.init(&page);

		let restored = match HandoffRequest::from_url(&page.url) {
			Some(request) => inner.handoff.restore_handoff(&request).await,
			None => None,
		};
		if restored.as_ref().is_some_and(|r| r.adopted_identity) {
			identity = inner.identity.snapshot();
		}

		let now_ms = inner.clock.now().timestamp_millis();
		let params = AttributionParams::from_url(&page.url);
		let existing = inner.hasher.browser_signals();
		inner.hasher.set_browser_signals(BrowserSignals {
			fbp: existing.fbp.is_none().then(|| browser_id(now_ms)),
			fbc: params.get("fbclid").map(|fbclid| click_id(now_ms, fbclid)),
			client_user_agent: inner.identity.environment().user_agent,
			..BrowserSignals::default()
		});

		InitReport { identity, restored }
	}

	/// Tracks a named event with free-form properties.
	pub async fn track(&self, event_name: &str, properties: Map<String, Value>) -> TrackOutcome {
		let raw = RawEvent::Flat(FlatRawEvent {
			event_name: Some(event_name.to_string()),
			custom_data: properties,
			..FlatRawEvent::default()
		});
		self.track_with(raw, DispatchOptions::default()).await
	}

	/// Tracks a raw event from another surface or the host.
	pub async fn track_raw(&self, raw: RawEvent) -> TrackOutcome {
		self.track_with(raw, DispatchOptions::default()).await
	}

	/// Normalizes, enriches, validates and queues `raw`.
	pub async fn track_with(&self, raw: RawEvent, options: DispatchOptions) -> TrackOutcome {
		let inner = &self.inner;
		if inner.engine.is_shutdown() {
			return TrackOutcome::Closed;
		}

		let mut event = normalize_at(raw, inner.platform, inner.clock.now());
		self.enrich(&mut event);
		event.tracking_meta.event_hash = compute_event_hash(&event);

		let report = validate(&event);
		if !report.is_valid() {
			inner.diagnostics.incr(Counter::ValidationFailures);
			warn!(
				event_name = %event.event_name,
				errors = ?report.messages(),
				"dropping invalid event"
			);
			return TrackOutcome::Invalid(report);
		}

		if event.user_data.session_id.is_none() {
			event.user_data.session_id = Some(inner.identity.active_session().id.to_string());
		}
		inner.diagnostics.incr(Counter::EventsTracked);

		let event_id = event.event_id.clone();
		let event_name = event.event_name.clone();
		let report = match inner.engine.enqueue(event, options).await {
			EnqueueOutcome::Duplicate => return TrackOutcome::Duplicate { event_id },
			EnqueueOutcome::Rejected => return TrackOutcome::Closed,
			EnqueueOutcome::Queued => None,
			EnqueueOutcome::Flushed(report) => Some(report),
		};

		inner.identity.record_event(&event_name, &event_id);
		match report {
			Some(report) => TrackOutcome::Flushed { event_id, report },
			None => TrackOutcome::Queued { event_id },
		}
	}

	/// Counts a page view on the session and tracks `page_view`.
	pub async fn track_page_view(&self) -> TrackOutcome {
		self.inner.identity.ensure_session();
		let mut properties = Map::new();
		if let Some(page) = self.inner.identity.current_page() {
			properties.insert("page_url".into(), json!(page.url.as_str()));
			if let Some(title) = page.title {
				properties.insert("page_title".into(), json!(title));
			}
		}
		self.track(names::PAGE_VIEW, properties).await
	}

	/// Builds a download link and tracks `download_intent` immediately.
	pub async fn download_link(
		&self,
		platform: AppPlatform,
		overrides: &BTreeMap<String, String>,
	) -> Result<AttributionLink> {
		let link = self.inner.links.build_link(platform, overrides, None)?;

		let mut properties = Map::new();
		properties.insert("target_platform".into(), json!(platform.as_str()));
		properties.insert("link_mode".into(), json!(link.mode));
		properties.insert("download_url".into(), json!(link.url.as_str()));
		let raw = RawEvent::Flat(FlatRawEvent {
			event_name: Some(names::DOWNLOAD_INTENT.to_string()),
			custom_data: properties,
			..FlatRawEvent::default()
		});
		self.track_with(raw, DispatchOptions::critical()).await;

		Ok(link)
	}

	/// Prepares a handoff to `target` and tracks `cross_platform_handoff`.
	pub async fn prepare_handoff(&self, target: Surface, extra: Map<String, Value>) -> HandoffToken {
		let token = self.inner.handoff.prepare_handoff(target, extra).await;

		let mut properties = Map::new();
		properties.insert("target_platform".into(), json!(target));
		properties.insert("handoff_session_id".into(), json!(token.session_id));
		self.track(names::CROSS_PLATFORM_HANDOFF, properties).await;

		token
	}

	pub fn set_user_data(&self, input: &UserDataInput) -> MatchReport {
		let report = self.inner.hasher.set_user_data(input);
		debug!(
			hashed = report.hashed.len(),
			omitted = report.omitted.len(),
			score = report.score,
			"user data updated"
		);
		report
	}

	pub fn set_browser_signals(&self, signals: BrowserSignals) {
		self.inner.hasher.set_browser_signals(signals);
	}

	pub async fn set_network_quality(&self, quality: NetworkQuality) {
		*self.inner.network.lock() = quality;
		self.inner.engine.set_network_quality(quality).await;
	}

	pub async fn set_visibility(&self, visibility: Visibility) -> Option<FlushReport> {
		self.inner.engine.set_visibility(visibility).await
	}

	pub async fn flush(&self) -> FlushReport {
		self.inner.engine.flush().await
	}

	/// Page teardown: posts final session state and hands the queue to
	/// detached deliveries. Returns the number of events handed off.
	pub async fn teardown(&self) -> usize {
		if let Some(page) = self.inner.identity.current_page() {
			self.inner.handoff.send_unload_state(&page.url);
		}
		self.inner.engine.flush_on_unload().await
	}

	/// Flushes what is queued and rejects further events.
	pub async fn shutdown(&self) -> FlushReport {
		info!("shutting down tracker");
		self.inner.engine.shutdown().await
	}

	pub fn snapshot(&self) -> IdentitySnapshot {
		self.inner.identity.snapshot()
	}

	pub fn diagnostics(&self) -> DiagnosticsSnapshot {
		self.inner.diagnostics.snapshot()
	}

	pub fn consent(&self) -> &ConsentGate {
		&self.inner.consent
	}

	pub fn identity(&self) -> &IdentityResolver {
		&self.inner.identity
	}

	pub fn hasher(&self) -> &MatchQualityHasher {
		&self.inner.hasher
	}

	pub fn links(&self) -> &AttributionLinkBuilder {
		&self.inner.links
	}

	pub fn handoff(&self) -> &HandoffService {
		&self.inner.handoff
	}

	pub fn engine(&self) -> &BatchEngine {
		&self.inner.engine
	}

	/// Fills identity, attribution and context fields the caller left empty.
	fn enrich(&self, event: &mut Event) {
		let inner = &self.inner;
		let snapshot = inner.identity.snapshot();

		let user = &mut event.user_data;
		user.unified_user_id
			.get_or_insert_with(|| snapshot.unified_user_id.to_string());
		if let Some(session_id) = &snapshot.session_id {
			user.session_id.get_or_insert_with(|| session_id.to_string());
		}
		user.device_fingerprint
			.get_or_insert_with(|| snapshot.device_fingerprint.clone());
		if user.email_hash.is_none() {
			user.email_hash = self.production_hash(MatchField::Email);
		}
		if user.phone_hash.is_none() {
			user.phone_hash = self.production_hash(MatchField::Phone);
		}

		if event.attribution.params.is_empty() {
			if let Some(record) = snapshot.attribution.effective() {
				event.attribution.params = record.params.clone();
				event.attribution.referrer = event.attribution.referrer.take().or(record.referrer.clone());
				event.attribution.landing_page = event
					.attribution
					.landing_page
					.take()
					.or(record.landing_page.clone());
			}
		}

		let environment = inner.identity.environment();
		let context = &mut event.context;
		context
			.device_type
			.get_or_insert_with(|| environment.device_type().to_string());
		if context.locale.is_none() {
			context.locale = environment.locale();
		}
		if context.timezone.is_none() {
			context.timezone = environment.timezone.clone();
		}
		if context.screen_resolution.is_none() {
			context.screen_resolution = environment.screen.clone();
		}
		if context.user_agent.is_none() {
			context.user_agent = environment.user_agent.clone();
		}
		if let Some(page) = inner.identity.current_page() {
			context
				.page_url
				.get_or_insert_with(|| page.url.to_string());
			if context.page_title.is_none() {
				context.page_title = page.title;
			}
		}
		let network = *inner.network.lock();
		if context.connection_type.is_none() && network != NetworkQuality::Unknown {
			context.connection_type = Some(network.to_string());
		}
	}

	fn production_hash(&self, field: MatchField) -> Option<String> {
		self
			.inner
			.hasher
			.hashed(field)
			.filter(|value| value.tier.production_safe())
			.map(|value| value.digest)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::handoff::MemoryHandoffStore;
	use crate::link::LinkMode;
	use crate::sink::{DeliveryReport, SinkError};
	use async_trait::async_trait;
	use chrono::{TimeZone, Utc};
	use url::Url;
	use waymark_core::ConsentCategory;

	#[derive(Debug, Default)]
	struct CaptureSink {
		events: Mutex<Vec<Event>>,
	}

	impl CaptureSink {
		fn events(&self) -> Vec<Event> {
			self.events.lock().clone()
		}
	}

	#[async_trait]
	impl Sink for CaptureSink {
		fn name(&self) -> &str {
			"capture"
		}

		fn category(&self) -> ConsentCategory {
			ConsentCategory::Necessary
		}

		async fn deliver(&self, events: &[Arc<Event>]) -> std::result::Result<DeliveryReport, SinkError> {
			self
				.events
				.lock()
				.extend(events.iter().map(|e| e.as_ref().clone()));
			Ok(DeliveryReport {
				delivered: events.len(),
				projection_failures: 0,
			})
		}
	}

	fn clock() -> Arc<ManualClock> {
		Arc::new(ManualClock::new(
			Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
		))
	}

	fn tracker_with(clock: Arc<ManualClock>, store: Option<Arc<MemoryHandoffStore>>) -> (Tracker, Arc<CaptureSink>) {
		let sink = Arc::new(CaptureSink::default());
		let mut builder = Tracker::builder()
			.storage(Storage::in_memory())
			.clock(clock)
			.with_tracing_sink(false)
			.environment(DeviceEnvironment {
				language: Some("en-US".into()),
				user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile".into()),
				..DeviceEnvironment::default()
			})
			.sink(sink.clone());
		if let Some(store) = store {
			builder = builder.handoff_store(store);
		}
		(builder.build().unwrap(), sink)
	}

	fn page(url: &str) -> PageContext {
		PageContext::new(Url::parse(url).unwrap()).with_title("CDL Practice Test")
	}

	#[tokio::test]
	async fn tracked_events_carry_identity_and_attribution() {
		let (tracker, sink) = tracker_with(clock(), None);
		let init = tracker
			.init(page("https://example.com/quiz?utm_source=google&utm_medium=cpc"))
			.await;

		let raw = RawEvent::named(names::QUIZ_STARTED);
		let outcome = tracker.track_with(raw, DispatchOptions::critical()).await;
		assert!(matches!(outcome, TrackOutcome::Flushed { .. }));

		let events = sink.events();
		assert_eq!(events.len(), 1);
		let event = &events[0];
		assert_eq!(
			event.unified_user_id(),
			Some(init.identity.unified_user_id.as_str())
		);
		assert_eq!(
			event.user_data.session_id.as_deref(),
			init.identity.session_id.as_ref().map(|s| s.as_str())
		);
		assert_eq!(event.attribution.params.get("utm_source"), Some("google"));
		assert_eq!(event.platform, "website");
		assert_eq!(event.context.device_type.as_deref(), Some("mobile"));
		assert_eq!(event.context.locale.as_deref(), Some("en"));
		assert_eq!(event.context.page_title.as_deref(), Some("CDL Practice Test"));
		assert!(!event.event_hash().is_empty());
		assert_eq!(tracker.diagnostics().events_tracked, 1);
	}

	#[tokio::test]
	async fn invalid_events_are_counted_not_sent() {
		let (tracker, sink) = tracker_with(clock(), None);
		tracker.init(page("https://example.com/")).await;

		let outcome = tracker
			.track_with(RawEvent::named(""), DispatchOptions::critical())
			.await;

		let TrackOutcome::Invalid(report) = outcome else {
			panic!("expected invalid outcome, got {outcome:?}");
		};
		assert!(report
			.messages()
			.contains(&"event_name is required".to_string()));
		assert!(sink.events().is_empty());
		assert_eq!(tracker.diagnostics().validation_failures, 1);
	}

	#[tokio::test]
	async fn repeated_event_in_same_instant_is_dropped() {
		let (tracker, _sink) = tracker_with(clock(), None);
		tracker.init(page("https://example.com/")).await;

		let mut props = Map::new();
		props.insert("quiz_id".into(), json!("hazmat"));
		let first = tracker.track(names::QUIZ_COMPLETED, props.clone()).await;
		let second = tracker.track(names::QUIZ_COMPLETED, props).await;

		assert!(matches!(first, TrackOutcome::Queued { .. }));
		assert!(matches!(second, TrackOutcome::Duplicate { .. }));
		assert_eq!(tracker.diagnostics().batch.duplicates_dropped, 1);

		let session = tracker.identity().current_session().unwrap();
		let logged: Vec<&str> = session
			.events
			.iter()
			.filter(|e| e.event_name == names::QUIZ_COMPLETED)
			.map(|e| e.event_id.as_str())
			.collect();
		assert_eq!(logged, vec![first.event_id().unwrap()]);
	}

	#[tokio::test]
	async fn init_restores_handoff_from_url() {
		let clock = clock();
		let store = Arc::new(MemoryHandoffStore::new());
		let issued = clock.now() - chrono::Duration::minutes(5);
		store.insert(HandoffToken {
			session_id: "sess_web".into(),
			unified_user_id: "uid_web".into(),
			handoff_timestamp: issued.timestamp_millis(),
			session_data: Map::new(),
			source_platform: Surface::Web,
			target_platform: Surface::Ios,
			device_fingerprint: None,
			source_url: None,
		});
		let (tracker, _sink) = tracker_with(clock, Some(store));

		let url = format!(
			"https://example.com/continue?session_id=sess_web&handoff_timestamp={}",
			issued.timestamp_millis()
		);
		let init = tracker.init(page(&url)).await;

		let restored = init.restored.expect("handoff restored");
		assert_eq!(restored.continued.original_unified_user_id, "uid_web");
		assert!(!restored.adopted_identity);
		assert_ne!(init.identity.unified_user_id.as_str(), "uid_web");
		assert_eq!(tracker.diagnostics().handoffs_restored, 1);
	}

	#[tokio::test]
	async fn init_records_click_id_signal() {
		let clock = clock();
		let now_ms = clock.now().timestamp_millis();
		let (tracker, _sink) = tracker_with(clock, None);

		tracker.init(page("https://example.com/?fbclid=IwAR123")).await;

		let signals = tracker.hasher().browser_signals();
		assert_eq!(signals.fbc, Some(format!("fb.1.{now_ms}.IwAR123")));
		assert!(signals.fbp.is_some_and(|fbp| fbp.starts_with("fb.1.")));
		assert!(signals.client_user_agent.is_some());
	}

	#[tokio::test]
	async fn download_link_without_consent_is_untracked_but_counted() {
		let (tracker, sink) = tracker_with(clock(), None);
		tracker.init(page("https://example.com/?utm_source=tiktok")).await;

		let link = tracker
			.download_link(AppPlatform::Android, &BTreeMap::new())
			.await
			.unwrap();

		assert_eq!(link.mode, LinkMode::Untracked);
		assert!(link.url.query().is_some_and(|q| !q.contains("utm_source")));
		let events = sink.events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].event_name, names::DOWNLOAD_INTENT);
		assert_eq!(events[0].custom_data["target_platform"], json!("android"));
	}

	#[tokio::test]
	async fn hashed_email_reaches_events() {
		let (tracker, sink) = tracker_with(clock(), None);
		tracker.init(page("https://example.com/")).await;
		tracker.set_user_data(&UserDataInput {
			email: Some("Driver@Example.com".into()),
			..UserDataInput::default()
		});

		tracker
			.track_with(RawEvent::named(names::FORM_SUBMITTED), DispatchOptions::critical())
			.await;

		let email_hash = sink.events()[0].user_data.email_hash.clone();
		assert_eq!(email_hash.map(|h| h.len()), Some(64));
	}

	#[tokio::test]
	async fn shutdown_flushes_and_closes() {
		let (tracker, sink) = tracker_with(clock(), None);
		tracker.init(page("https://example.com/")).await;
		tracker.track(names::QUIZ_STARTED, Map::new()).await;

		let report = tracker.shutdown().await;
		assert_eq!(report.delivered_to("capture"), 1);
		assert_eq!(sink.events().len(), 1);
		assert_eq!(
			tracker.track(names::QUIZ_COMPLETED, Map::new()).await,
			TrackOutcome::Closed
		);
	}

	#[tokio::test]
	async fn identity_survives_rebuild_on_disk() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = WaymarkConfig::default();
		config.identity.storage_dir = Some(dir.path().to_path_buf());

		let first = Tracker::builder()
			.config(config.clone())
			.with_tracing_sink(false)
			.build()
			.unwrap();
		let id = first.init(page("https://example.com/")).await.identity.unified_user_id;

		let second = Tracker::builder()
			.config(config)
			.with_tracing_sink(false)
			.build()
			.unwrap();
		let again = second.init(page("https://example.com/")).await;
		assert_eq!(again.identity.unified_user_id, id);
		assert!(!again.identity.is_new_user);
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event batching, deduplication and per-sink dispatch.
//!
//! The queue, dedup window, phase and batch timer share one async mutex.
//! Dispatch runs outside that lock behind a second lock, so enqueueing never
//! waits on the network while each sink still sees its events in enqueue
//! order.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use waymark_config::BatchConfig;
use waymark_core::Event;

use crate::beacon::{spawn_detached, DetachedOutcome};
use crate::clock::Clock;
use crate::consent::ConsentGate;
use crate::diagnostics::{BatchStats, Counter, Diagnostics};
use crate::network::{BatchPolicy, NetworkQuality, Visibility};
use crate::sink::{Sink, SinkError};

/// Engine tuning, usually derived from [`BatchConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
	pub base_policy: BatchPolicy,
	pub max_queue_size: usize,
	pub dedup_window: chrono::Duration,
	pub beacon_timeout: Duration,
}

impl From<&BatchConfig> for BatchSettings {
	fn from(config: &BatchConfig) -> Self {
		Self {
			base_policy: BatchPolicy {
				batch_size: config.batch_size,
				flush_interval: Duration::from_millis(config.flush_interval_ms),
			},
			max_queue_size: config.max_queue_size,
			dedup_window: chrono::Duration::from_std(Duration::from_secs(config.dedup_window_secs))
				.unwrap_or(chrono::Duration::MAX),
			beacon_timeout: Duration::from_millis(config.beacon_timeout_ms),
		}
	}
}

impl Default for BatchSettings {
	fn default() -> Self {
		Self::from(&BatchConfig::default())
	}
}

/// Per-event dispatch controls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOptions {
	/// Flush as soon as this event is queued.
	pub critical: bool,
	/// Bypass the dedup window for this event.
	pub allow_duplicates: bool,
	/// Deliver only to these sinks.
	pub only_sinks: Option<BTreeSet<String>>,
	/// Never deliver to these sinks.
	pub skip_sinks: BTreeSet<String>,
}

impl DispatchOptions {
	pub fn critical() -> Self {
		Self {
			critical: true,
			..Default::default()
		}
	}

	pub fn with_critical(mut self, critical: bool) -> Self {
		self.critical = critical;
		self
	}

	pub fn allow_duplicates(mut self) -> Self {
		self.allow_duplicates = true;
		self
	}

	pub fn only<I, S>(mut self, sinks: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.only_sinks = Some(sinks.into_iter().map(Into::into).collect());
		self
	}

	pub fn skip(mut self, sink: impl Into<String>) -> Self {
		self.skip_sinks.insert(sink.into());
		self
	}

	/// Whether an event with these options may go to `sink`.
	pub fn targets(&self, sink: &str) -> bool {
		if self.skip_sinks.contains(sink) {
			return false;
		}
		self.only_sinks
			.as_ref()
			.map_or(true, |only| only.contains(sink))
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BatchPhase {
	#[default]
	Idle,
	Accumulating,
	Flushing,
}

/// Result of delivering one batch to one sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
	pub sink: String,
	pub attempted: usize,
	pub delivered: usize,
	pub projection_failures: usize,
	pub error: Option<String>,
}

impl SinkOutcome {
	pub fn is_success(&self) -> bool {
		self.error.is_none()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
	pub batch_id: String,
	pub events: usize,
	pub sinks: Vec<SinkOutcome>,
}

impl FlushReport {
	pub fn is_empty(&self) -> bool {
		self.events == 0
	}

	pub fn outcome(&self, sink: &str) -> Option<&SinkOutcome> {
		self.sinks.iter().find(|o| o.sink == sink)
	}

	/// Events delivered to `sink`, zero when it was not part of the batch.
	pub fn delivered_to(&self, sink: &str) -> usize {
		self.outcome(sink).map_or(0, |o| o.delivered)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
	Queued,
	Flushed(FlushReport),
	/// Dropped by the dedup window.
	Duplicate,
	/// The engine is shut down.
	Rejected,
}

#[derive(Debug)]
struct QueuedEvent {
	event: Event,
	options: DispatchOptions,
}

/// Event hashes seen since `started_at`. The whole set is cleared once the
/// window elapses.
#[derive(Debug)]
struct DedupWindow {
	hashes: HashSet<String>,
	started_at: DateTime<Utc>,
}

impl DedupWindow {
	fn new(now: DateTime<Utc>) -> Self {
		Self {
			hashes: HashSet::new(),
			started_at: now,
		}
	}

	/// Records `hash` and reports whether it was already present.
	fn seen(&mut self, hash: &str, now: DateTime<Utc>, window: chrono::Duration) -> bool {
		if now - self.started_at >= window {
			debug!(cleared = self.hashes.len(), "dedup window rolled over");
			self.hashes.clear();
			self.started_at = now;
		}
		if hash.is_empty() {
			return false;
		}
		!self.hashes.insert(hash.to_string())
	}

	/// Forgets a hash whose event never reached a sink.
	fn forget(&mut self, hash: &str) {
		self.hashes.remove(hash);
	}
}

#[derive(Debug)]
struct QueueState {
	queue: VecDeque<QueuedEvent>,
	dedup: DedupWindow,
	phase: BatchPhase,
	timer: Option<(u64, JoinHandle<()>)>,
	network: NetworkQuality,
	visibility: Visibility,
}

impl QueueState {
	fn cancel_timer(&mut self) {
		if let Some((_, handle)) = self.timer.take() {
			handle.abort();
		}
	}
}

struct EngineInner {
	settings: BatchSettings,
	sinks: Vec<Arc<dyn Sink>>,
	consent: Arc<ConsentGate>,
	clock: Arc<dyn Clock>,
	diagnostics: Arc<Diagnostics>,
	state: Mutex<QueueState>,
	dispatch_lock: Mutex<()>,
	timer_generation: AtomicU64,
	shutdown: AtomicBool,
}

/// Accumulates events and dispatches them to sinks in batches.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct BatchEngine {
	inner: Arc<EngineInner>,
}

impl std::fmt::Debug for BatchEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BatchEngine")
			.field("settings", &self.inner.settings)
			.field(
				"sinks",
				&self.inner.sinks.iter().map(|s| s.name()).collect::<Vec<_>>(),
			)
			.finish_non_exhaustive()
	}
}

impl BatchEngine {
	pub fn new(
		settings: BatchSettings,
		sinks: Vec<Arc<dyn Sink>>,
		consent: Arc<ConsentGate>,
		clock: Arc<dyn Clock>,
		diagnostics: Arc<Diagnostics>,
	) -> Self {
		let now = clock.now();
		info!(
			sinks = sinks.len(),
			batch_size = settings.base_policy.batch_size,
			flush_interval_ms = settings.base_policy.flush_interval.as_millis(),
			"batch engine created"
		);
		Self {
			inner: Arc::new(EngineInner {
				settings,
				sinks,
				consent,
				clock,
				diagnostics,
				state: Mutex::new(QueueState {
					queue: VecDeque::new(),
					dedup: DedupWindow::new(now),
					phase: BatchPhase::Idle,
					timer: None,
					network: NetworkQuality::Unknown,
					visibility: Visibility::Visible,
				}),
				dispatch_lock: Mutex::new(()),
				timer_generation: AtomicU64::new(0),
				shutdown: AtomicBool::new(false),
			}),
		}
	}

	pub fn sink_names(&self) -> Vec<String> {
		self.inner.sinks.iter().map(|s| s.name().to_string()).collect()
	}

	/// Queues an event, flushing when the batch is full, the event is
	/// critical or the page is hidden.
	pub async fn enqueue(&self, event: Event, options: DispatchOptions) -> EnqueueOutcome {
		let inner = &self.inner;
		if inner.shutdown.load(Ordering::SeqCst) {
			debug!(event_name = %event.event_name, "engine shut down, rejecting event");
			return EnqueueOutcome::Rejected;
		}

		let flush_now = {
			let mut state = inner.state.lock().await;

			let now = inner.clock.now();
			let duplicate =
				state
					.dedup
					.seen(event.event_hash(), now, inner.settings.dedup_window);
			let bypass = options.allow_duplicates || event.tracking_meta.skip_deduplication;
			if duplicate && !bypass {
				inner.diagnostics.incr(Counter::DuplicatesDropped);
				debug!(
					event_name = %event.event_name,
					event_hash = %event.event_hash(),
					"dropping duplicate event"
				);
				return EnqueueOutcome::Duplicate;
			}

			while state.queue.len() >= inner.settings.max_queue_size.max(1) {
				if let Some(dropped) = state.queue.pop_front() {
					state.dedup.forget(dropped.event.event_hash());
					inner.diagnostics.incr(Counter::EventsDroppedOverflow);
					warn!(
						event_name = %dropped.event.event_name,
						event_id = %dropped.event.event_id,
						"dropped event due to queue overflow"
					);
				}
			}

			let critical = options.critical;
			state.queue.push_back(QueuedEvent { event, options });
			inner.diagnostics.incr(Counter::EventsQueued);
			if state.phase == BatchPhase::Idle {
				state.phase = BatchPhase::Accumulating;
			}

			let policy = BatchPolicy::adaptive(inner.settings.base_policy, state.network);
			let flush_now = critical
				|| state.visibility == Visibility::Hidden
				|| state.queue.len() >= policy.batch_size;

			if !flush_now && state.timer.is_none() {
				self.arm_timer(&mut state, policy.flush_interval);
			}
			flush_now
		};

		if flush_now {
			EnqueueOutcome::Flushed(self.flush().await)
		} else {
			EnqueueOutcome::Queued
		}
	}

	fn arm_timer(&self, state: &mut QueueState, after: Duration) {
		let generation = self.inner.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
		let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
		let handle = tokio::spawn(async move {
			tokio::time::sleep(after).await;
			let Some(inner) = weak.upgrade() else {
				return;
			};
			{
				let mut state = inner.state.lock().await;
				let armed = state.timer.as_ref().map(|(armed, _)| *armed);
				if armed != Some(generation) {
					return;
				}
				state.timer = None;
			}
			debug!("batch timer elapsed");
			BatchEngine { inner }.flush().await;
		});
		state.timer = Some((generation, handle));
	}

	/// Drains the queue and dispatches it. A flush that started always runs
	/// to completion.
	pub async fn flush(&self) -> FlushReport {
		let inner = &self.inner;
		let _dispatching = inner.dispatch_lock.lock().await;

		let batch = {
			let mut state = inner.state.lock().await;
			state.cancel_timer();
			if state.queue.is_empty() {
				state.phase = BatchPhase::Idle;
				return FlushReport::default();
			}
			state.phase = BatchPhase::Flushing;
			state.queue.drain(..).collect::<Vec<_>>()
		};

		let report = self.dispatch(batch).await;

		let mut state = inner.state.lock().await;
		state.phase = if state.queue.is_empty() {
			BatchPhase::Idle
		} else {
			BatchPhase::Accumulating
		};
		report
	}

	async fn dispatch(&self, batch: Vec<QueuedEvent>) -> FlushReport {
		let inner = &self.inner;
		let batch_id = format!("batch_{}", uuid::Uuid::new_v4().simple());
		let total = batch.len();
		let batch = stamp(batch, &batch_id);

		let deliveries = self.group(&batch).into_iter().map(|(sink, events)| async move {
			let attempted = events.len();
			let result = sink.deliver(&events).await;
			(sink, attempted, result)
		});
		let results = join_all(deliveries).await;

		let mut outcomes = Vec::with_capacity(results.len());
		for (sink, attempted, result) in results {
			let name = sink.name().to_string();
			let outcome = match result {
				Ok(report) => {
					inner.diagnostics.incr(Counter::SinkSuccesses);
					inner
						.diagnostics
						.add(Counter::EventsSent, report.delivered as u64);
					inner.diagnostics.add(
						Counter::ProjectionFailures,
						report.projection_failures as u64,
					);
					debug!(sink = %name, delivered = report.delivered, "sink delivery succeeded");
					SinkOutcome {
						sink: name,
						attempted,
						delivered: report.delivered,
						projection_failures: report.projection_failures,
						error: None,
					}
				}
				Err(e) => {
					self.record_failure(&name, &e);
					SinkOutcome {
						sink: name,
						attempted,
						delivered: 0,
						projection_failures: 0,
						error: Some(e.to_string()),
					}
				}
			};
			outcomes.push(outcome);
		}

		inner.diagnostics.incr(Counter::BatchesFlushed);
		info!(
			batch_id = %batch_id,
			events = total,
			sinks = outcomes.len(),
			failed = outcomes.iter().filter(|o| !o.is_success()).count(),
			"batch flushed"
		);

		FlushReport {
			batch_id,
			events: total,
			sinks: outcomes,
		}
	}

	fn record_failure(&self, sink: &str, error: &SinkError) {
		let counter = if matches!(error, SinkError::Timeout) {
			Counter::SinkTimeouts
		} else {
			Counter::SinkFailures
		};
		self.inner.diagnostics.incr(counter);
		warn!(sink, error = %error, transient = error.is_transient(), "sink delivery failed");
	}

	/// Consent-permitted sinks paired with the events each may receive, in
	/// enqueue order. Sinks with nothing to receive are left out.
	fn group(&self, batch: &[(Arc<Event>, DispatchOptions)]) -> Vec<(Arc<dyn Sink>, Vec<Arc<Event>>)> {
		let consent = &self.inner.consent;
		self.inner
			.sinks
			.iter()
			.filter(|sink| {
				let allowed = consent.allows_sink(sink.name(), sink.category());
				if !allowed {
					debug!(sink = %sink.name(), "sink excluded by consent");
				}
				allowed
			})
			.filter_map(|sink| {
				let events: Vec<Arc<Event>> = batch
					.iter()
					.filter(|(_, options)| options.targets(sink.name()))
					.map(|(event, _)| Arc::clone(event))
					.collect();
				(!events.is_empty()).then(|| (Arc::clone(sink), events))
			})
			.collect()
	}

	/// Drains the queue into detached deliveries bounded by the beacon
	/// timeout. Returns the number of events handed off.
	pub async fn flush_on_unload(&self) -> usize {
		let inner = &self.inner;
		let batch = {
			let mut state = inner.state.lock().await;
			state.cancel_timer();
			state.phase = BatchPhase::Idle;
			state.queue.drain(..).collect::<Vec<_>>()
		};
		if batch.is_empty() {
			return 0;
		}

		let total = batch.len();
		let batch_id = format!("batch_{}", uuid::Uuid::new_v4().simple());
		let batch = stamp(batch, &batch_id);

		for (sink, events) in self.group(&batch) {
			let diagnostics = Arc::clone(&inner.diagnostics);
			let count = events.len() as u64;
			let work = async move { sink.deliver_once(&events).await.map(|_| ()) };
			let spawned = spawn_detached(
				"unload_flush",
				inner.settings.beacon_timeout,
				work,
				move |outcome| match outcome {
					DetachedOutcome::Completed => {
						diagnostics.incr(Counter::SinkSuccesses);
						diagnostics.add(Counter::EventsSent, count);
					}
					DetachedOutcome::Failed => diagnostics.incr(Counter::SinkFailures),
					DetachedOutcome::TimedOut => diagnostics.incr(Counter::SinkTimeouts),
				},
			);
			if !spawned {
				inner.diagnostics.incr(Counter::SinkFailures);
			}
		}

		inner.diagnostics.incr(Counter::BatchesFlushed);
		info!(batch_id = %batch_id, events = total, "unload batch handed off");
		total
	}

	pub async fn set_network_quality(&self, quality: NetworkQuality) {
		let mut state = self.inner.state.lock().await;
		if state.network != quality {
			debug!(from = %state.network, to = %quality, "network quality changed");
			state.network = quality;
		}
	}

	/// Records page visibility. Hiding the page flushes whatever is queued.
	pub async fn set_visibility(&self, visibility: Visibility) -> Option<FlushReport> {
		{
			let mut state = self.inner.state.lock().await;
			state.visibility = visibility;
			if visibility == Visibility::Visible || state.queue.is_empty() {
				return None;
			}
		}
		Some(self.flush().await)
	}

	/// Stops accepting events and flushes what is left.
	pub async fn shutdown(&self) -> FlushReport {
		if self.inner.shutdown.swap(true, Ordering::SeqCst) {
			return FlushReport::default();
		}
		info!("batch engine shutting down");
		self.flush().await
	}

	pub fn is_shutdown(&self) -> bool {
		self.inner.shutdown.load(Ordering::SeqCst)
	}

	pub async fn phase(&self) -> BatchPhase {
		self.inner.state.lock().await.phase
	}

	pub async fn queue_len(&self) -> usize {
		self.inner.state.lock().await.queue.len()
	}

	/// Policy currently in effect for the observed network.
	pub async fn policy(&self) -> BatchPolicy {
		let state = self.inner.state.lock().await;
		BatchPolicy::adaptive(self.inner.settings.base_policy, state.network)
	}

	pub fn stats(&self) -> BatchStats {
		self.inner.diagnostics.batch_stats()
	}
}

/// Tags every event with the batch id and freezes it for sharing across
/// sinks.
fn stamp(batch: Vec<QueuedEvent>, batch_id: &str) -> Vec<(Arc<Event>, DispatchOptions)> {
	batch
		.into_iter()
		.map(|QueuedEvent { mut event, options }| {
			event.tracking_meta.batch_id = Some(batch_id.to_string());
			(Arc::new(event), options)
		})
		.collect()
}

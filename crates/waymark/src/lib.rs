// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Waymark: cross-platform identity, attribution and event dispatch.
//!
//! A [`Tracker`] owns every service for one surface:
//!
//! - [`IdentityResolver`]: durable anonymous id, sessions, visit metrics and
//!   first/last-touch attribution
//! - [`ConsentGate`]: consent categories and per-sink gating
//! - [`BatchEngine`]: dedup, adaptive batching and fan-out to [`Sink`]s
//! - [`AttributionLinkBuilder`]: app-download links carrying attribution
//! - [`HandoffService`]: session continuity between web and app
//! - [`MatchQualityHasher`]: normalized, hashed user data for conversion APIs
//!
//! # Example
//!
//! ```ignore
//! let tracker = waymark::Tracker::builder()
//!     .config(waymark_config::load_config()?)
//!     .build()?;
//! tracker.init(PageContext::new(url)).await;
//! tracker.track("quiz_started", serde_json::Map::new()).await;
//! tracker.teardown().await;
//! ```

pub mod batch;
pub mod beacon;
pub mod clock;
pub mod consent;
pub mod diagnostics;
pub mod error;
pub mod fingerprint;
pub mod handoff;
pub mod hasher;
pub mod identity;
pub mod link;
pub mod network;
pub mod sink;
pub mod storage;
pub mod telemetry;
pub mod tracker;

pub use batch::{
	BatchEngine, BatchPhase, BatchSettings, DispatchOptions, EnqueueOutcome, FlushReport,
	SinkOutcome,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consent::{ConsentAction, ConsentChange, ConsentGate};
pub use diagnostics::{BatchStats, Counter, Diagnostics, DiagnosticsSnapshot};
pub use error::{Result, StorageError, WaymarkError};
pub use fingerprint::{compute_fingerprint, DeviceEnvironment};
pub use handoff::{
	ContinuedSession, HandoffError, HandoffRequest, HandoffService, HandoffStore, HandoffToken,
	HttpHandoffStore, MemoryHandoffStore, RestoredHandoff, Surface,
};
pub use hasher::{BrowserSignals, MatchField, MatchQualityHasher, MatchReport, UserDataInput};
pub use identity::{IdentityResolver, IdentitySnapshot, PageContext};
pub use link::{attribution_chain, AppPlatform, AttributionLink, AttributionLinkBuilder, LinkMode};
pub use network::{BatchPolicy, NetworkQuality, Visibility};
pub use sink::{
	BackendSink, ConversionsSink, DeliveryReport, RelaySink, RelayVendor, Sink, SinkError, TracingSink,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, Storage};
pub use tracker::{InitReport, TrackOutcome, Tracker, TrackerBuilder};

pub use waymark_core as core;

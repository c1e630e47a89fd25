// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Waymark identity and attribution pipeline.
//!
//! This crate is runtime-free: it holds the data model shared by every surface
//! (web, mobile, backend) plus the pure pieces of the pipeline:
//!
//! - Identity, session and attribution records
//! - Consent categories and state
//! - The canonical event envelope, raw-input normalization, validation and the
//!   dedup hash
//! - Projections of the envelope into downstream sink vocabularies

pub mod attribution;
pub mod consent;
pub mod error;
pub mod event;
pub mod identity;
pub mod projection;
pub mod session;

pub use attribution::{AttributionParams, AttributionRecord, AttributionState, ATTRIBUTION_KEYS};
pub use consent::{ConsentCategory, ConsentState};
pub use error::{CoreError, Result};
pub use event::{
	compute_event_hash, extract_value_data, normalize, normalize_at, validate, Event,
	EventAttribution, EventContext, FlatRawEvent, NestedRawEvent, Platform, RawEvent,
	TrackingMeta, UserData, ValidationError, ValidationReport, ValueData, TRACKING_VERSION,
};
pub use identity::{DeviceType, UnifiedIdentity, UnifiedUserId, VisitMetrics};
pub use projection::{ProjectionError, Vocabulary};
pub use session::{Session, SessionEventRecord, SessionId};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	BatchConfigLayer, ConsentConfigLayer, HandoffConfigLayer, IdentityConfigLayer,
	LinksConfigLayer, LoggingConfigLayer, SinksConfigLayer,
};

/// Waymark configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WaymarkConfigLayer {
	#[serde(default)]
	pub batch: Option<BatchConfigLayer>,
	#[serde(default)]
	pub identity: Option<IdentityConfigLayer>,
	#[serde(default)]
	pub sinks: Option<SinksConfigLayer>,
	#[serde(default)]
	pub consent: Option<ConsentConfigLayer>,
	#[serde(default)]
	pub handoff: Option<HandoffConfigLayer>,
	#[serde(default)]
	pub links: Option<LinksConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl WaymarkConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: WaymarkConfigLayer) {
		merge_option(&mut self.batch, other.batch, BatchConfigLayer::merge);
		merge_option(&mut self.identity, other.identity, IdentityConfigLayer::merge);
		merge_option(&mut self.sinks, other.sinks, SinksConfigLayer::merge);
		merge_option(&mut self.consent, other.consent, ConsentConfigLayer::merge);
		merge_option(&mut self.handoff, other.handoff, HandoffConfigLayer::merge);
		merge_option(&mut self.links, other.links, LinksConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T>(target: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	let Some(incoming) = other else {
		return;
	};
	match target {
		Some(current) => merge(current, incoming),
		None => *target = Some(incoming),
	}
}

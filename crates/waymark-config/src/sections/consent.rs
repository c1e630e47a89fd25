// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Consent-category-to-sink mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use waymark_core::ConsentCategory;

fn default_sink_categories() -> BTreeMap<String, ConsentCategory> {
	[
		("backend", ConsentCategory::Necessary),
		("tracing", ConsentCategory::Necessary),
		("ga4", ConsentCategory::Analytics),
		("amplitude", ConsentCategory::Analytics),
		("smartlook", ConsentCategory::Analytics),
		("conversions", ConsentCategory::Marketing),
		("meta", ConsentCategory::Marketing),
		("appsflyer", ConsentCategory::Marketing),
	]
	.into_iter()
	.map(|(name, category)| (name.to_string(), category))
	.collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsentConfigLayer {
	pub sink_categories: Option<BTreeMap<String, ConsentCategory>>,
}

impl ConsentConfigLayer {
	/// Entries from `other` override matching sink names; other names are kept.
	pub fn merge(&mut self, other: Self) {
		if let Some(incoming) = other.sink_categories {
			self.sink_categories
				.get_or_insert_with(BTreeMap::new)
				.extend(incoming);
		}
	}

	pub fn finalize(self) -> ConsentConfig {
		let mut sink_categories = default_sink_categories();
		if let Some(overrides) = self.sink_categories {
			sink_categories.extend(overrides);
		}
		ConsentConfig { sink_categories }
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsentConfig {
	pub sink_categories: BTreeMap<String, ConsentCategory>,
}

impl ConsentConfig {
	/// Configured category for a sink, if the sink is mapped.
	pub fn category_for(&self, sink: &str) -> Option<ConsentCategory> {
		self.sink_categories.get(sink).copied()
	}
}

impl Default for ConsentConfig {
	fn default() -> Self {
		ConsentConfigLayer::default().finalize()
	}
}

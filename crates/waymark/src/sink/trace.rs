// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use waymark_core::{ConsentCategory, Event};

use super::{DeliveryReport, Sink, SinkError};

/// Writes each event to the `tracing` pipeline. Useful in development and
/// as an audit trail next to remote sinks.
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl TracingSink {
	pub fn new() -> Self {
		Self
	}
}

#[async_trait]
impl Sink for TracingSink {
	fn name(&self) -> &str {
		"tracing"
	}

	fn category(&self) -> ConsentCategory {
		ConsentCategory::Necessary
	}

	async fn deliver(&self, events: &[Arc<Event>]) -> Result<DeliveryReport, SinkError> {
		for event in events {
			info!(
				target: "waymark::events",
				event_name = %event.event_name,
				event_id = %event.event_id,
				unified_user_id = event.unified_user_id().unwrap_or_default(),
				platform = %event.platform,
				timestamp = event.timestamp,
				"event dispatched"
			);
		}
		Ok(DeliveryReport {
			delivered: events.len(),
			projection_failures: 0,
		})
	}
}

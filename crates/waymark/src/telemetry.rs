// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Subscriber setup for hosts that do not install their own.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use waymark_config::LoggingConfig;

use crate::error::{Result, WaymarkError};

/// `RUST_LOG` when set, otherwise the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs a global fmt subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
	let registry = tracing_subscriber::registry().with(env_filter(config));
	let installed = if config.json {
		registry
			.with(tracing_subscriber::fmt::layer().json().with_current_span(false))
			.try_init()
	} else {
		registry.with(tracing_subscriber::fmt::layer()).try_init()
	};
	installed.map_err(|e| WaymarkError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_install_fails() {
		let config = LoggingConfig {
			level: "debug".into(),
			json: true,
		};
		// The first call may lose to another test; the second always fails.
		let _ = init_tracing(&config);
		assert!(matches!(
			init_tracing(&config),
			Err(WaymarkError::Telemetry(_))
		));
	}
}

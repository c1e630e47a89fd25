// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Waymark pipeline.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `/etc/waymark/config.toml`
//! 3. `$XDG_CONFIG_HOME/waymark/config.toml` (or an explicit path)
//! 4. Environment variables (`WAYMARK_*`)
//!
//! # Usage
//!
//! ```ignore
//! let config = waymark_config::load_config()?;
//! println!("batch size {}", config.batch.batch_size);
//! ```

pub mod error;
pub mod layer;
pub mod secret;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::WaymarkConfigLayer;
pub use secret::SecretString;
pub use sections::*;
pub use sources::{
	env_bool, env_u64, env_var, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource,
};

use tracing::{debug, info};
use url::Url;

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaymarkConfig {
	pub batch: BatchConfig,
	pub identity: IdentityConfig,
	pub sinks: SinksConfig,
	pub consent: ConsentConfig,
	pub handoff: HandoffConfig,
	pub links: LinksConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all standard sources.
pub fn load_config() -> Result<WaymarkConfig, ConfigError> {
	let mut sources: Vec<Box<dyn ConfigSource>> =
		vec![Box::new(DefaultsSource), Box::new(TomlSource::system())];
	if let Some(user) = TomlSource::user() {
		sources.push(Box::new(user));
	}
	sources.push(Box::new(EnvSource));
	load_from_sources(sources)
}

/// Load configuration with an explicit config file in place of the user file.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<WaymarkConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<WaymarkConfig, ConfigError> {
	load_from_sources(vec![Box::new(DefaultsSource), Box::new(EnvSource)])
}

/// Merge the given sources in precedence order and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<WaymarkConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = WaymarkConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Resolve a merged layer into validated configuration.
pub fn finalize(layer: WaymarkConfigLayer) -> Result<WaymarkConfig, ConfigError> {
	let config = WaymarkConfig {
		batch: layer.batch.unwrap_or_default().finalize(),
		identity: layer.identity.unwrap_or_default().finalize(),
		sinks: layer.sinks.unwrap_or_default().finalize(),
		consent: layer.consent.unwrap_or_default().finalize(),
		handoff: layer.handoff.unwrap_or_default().finalize(),
		links: layer.links.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		batch_size = config.batch.batch_size,
		flush_interval_ms = config.batch.flush_interval_ms,
		backend_sink = config.sinks.backend_url.is_some(),
		conversions_sink = config.sinks.conversions_url.is_some(),
		tagging_relay = config.sinks.tagging_url.is_some(),
		handoff_remote = config.handoff.base_url.is_some(),
		onelink = config.links.onelink_url.is_some(),
		"Waymark configuration loaded"
	);

	Ok(config)
}

fn validate_config(config: &WaymarkConfig) -> Result<(), ConfigError> {
	if config.batch.batch_size == 0 {
		return Err(ConfigError::Validation(
			"batch.batch_size must be at least 1".to_string(),
		));
	}
	if config.batch.flush_interval_ms == 0 {
		return Err(ConfigError::Validation(
			"batch.flush_interval_ms must be greater than 0".to_string(),
		));
	}
	if config.batch.max_queue_size < config.batch.batch_size {
		return Err(ConfigError::Validation(format!(
			"batch.max_queue_size ({}) must be at least batch.batch_size ({})",
			config.batch.max_queue_size, config.batch.batch_size
		)));
	}
	if config.identity.session_timeout_secs == 0 {
		return Err(ConfigError::Validation(
			"identity.session_timeout_secs must be greater than 0".to_string(),
		));
	}
	if config.handoff.ttl_secs == 0 {
		return Err(ConfigError::Validation(
			"handoff.ttl_secs must be greater than 0".to_string(),
		));
	}

	let urls = [
		("sinks.backend_url", config.sinks.backend_url.as_deref()),
		(
			"sinks.conversions_url",
			config.sinks.conversions_url.as_deref(),
		),
		("sinks.tagging_url", config.sinks.tagging_url.as_deref()),
		("handoff.base_url", config.handoff.base_url.as_deref()),
		("links.onelink_url", config.links.onelink_url.as_deref()),
	];
	for (key, value) in urls {
		if let Some(raw) = value {
			validate_url(key, raw)?;
		}
	}

	Ok(())
}

fn validate_url(key: &str, raw: &str) -> Result<(), ConfigError> {
	let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
		key: key.to_string(),
		message: e.to_string(),
	})?;
	if !matches!(url.scheme(), "http" | "https") {
		return Err(ConfigError::InvalidValue {
			key: key.to_string(),
			message: format!("unsupported scheme '{}'", url.scheme()),
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	struct FixedSource {
		precedence: Precedence,
		layer: WaymarkConfigLayer,
	}

	impl ConfigSource for FixedSource {
		fn name(&self) -> &'static str {
			"fixed"
		}

		fn precedence(&self) -> Precedence {
			self.precedence
		}

		fn load(&self) -> Result<WaymarkConfigLayer, ConfigError> {
			Ok(self.layer.clone())
		}
	}

	fn batch_layer(batch_size: usize) -> WaymarkConfigLayer {
		WaymarkConfigLayer {
			batch: Some(BatchConfigLayer {
				batch_size: Some(batch_size),
				..Default::default()
			}),
			..Default::default()
		}
	}

	#[test]
	fn defaults_validate() {
		let config = finalize(WaymarkConfigLayer::default()).unwrap();
		assert_eq!(config, WaymarkConfig::default());
	}

	#[test]
	fn higher_precedence_wins_regardless_of_order() {
		let config = load_from_sources(vec![
			Box::new(FixedSource {
				precedence: Precedence::Environment,
				layer: batch_layer(9),
			}),
			Box::new(FixedSource {
				precedence: Precedence::UserFile,
				layer: batch_layer(4),
			}),
		])
		.unwrap();
		assert_eq!(config.batch.batch_size, 9);
	}

	#[test]
	fn zero_batch_size_is_rejected() {
		let err = finalize(batch_layer(0)).unwrap_err();
		assert!(matches!(err, ConfigError::Validation(_)));
	}

	#[test]
	fn malformed_url_is_rejected() {
		let layer = WaymarkConfigLayer {
			handoff: Some(HandoffConfigLayer {
				base_url: Some("not a url".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		let err = finalize(layer).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "handoff.base_url"));
	}

	#[test]
	fn non_http_url_is_rejected() {
		let layer = WaymarkConfigLayer {
			sinks: Some(SinksConfigLayer {
				backend_url: Some("ftp://example.com".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		assert!(finalize(layer).is_err());
	}

	#[test]
	fn malformed_tagging_url_is_rejected() {
		let layer = WaymarkConfigLayer {
			sinks: Some(SinksConfigLayer {
				tagging_url: Some("relay".to_string()),
				ga4_measurement_id: Some("G-1".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		let err = finalize(layer).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "sinks.tagging_url"));
	}

	proptest! {
		#[test]
		fn later_layer_overrides_batch_size(a in 1usize..500, b in 1usize..500) {
			let mut merged = batch_layer(a);
			merged.merge(batch_layer(b));
			let config = finalize(merged).unwrap();
			prop_assert_eq!(config.batch.batch_size, b);
		}
	}
}

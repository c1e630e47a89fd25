// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files and environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, trace};
use waymark_core::ConsentCategory;

use crate::error::ConfigError;
use crate::layer::WaymarkConfigLayer;
use crate::secret::SecretString;
use crate::sections::{
	BatchConfigLayer, ConsentConfigLayer, HandoffConfigLayer, IdentityConfigLayer,
	LinksConfigLayer, LoggingConfigLayer, SinksConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	SystemFile = 20,
	UserFile = 30,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<WaymarkConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<WaymarkConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(WaymarkConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file yields an empty layer.
pub struct TomlSource {
	path: PathBuf,
	precedence: Precedence,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			precedence: Precedence::UserFile,
		}
	}

	pub fn system() -> Self {
		Self {
			path: PathBuf::from("/etc/waymark/config.toml"),
			precedence: Precedence::SystemFile,
		}
	}

	/// `$XDG_CONFIG_HOME/waymark/config.toml` (platform equivalent elsewhere).
	pub fn user() -> Option<Self> {
		dirs::config_dir().map(|dir| Self::new(dir.join("waymark").join("config.toml")))
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		self.precedence
	}

	fn load(&self) -> Result<WaymarkConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(WaymarkConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: WaymarkConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `WAYMARK_<SECTION>_<FIELD>`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<WaymarkConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(WaymarkConfigLayer {
			batch: Some(load_batch_from_env()?),
			identity: Some(load_identity_from_env()?),
			sinks: Some(load_sinks_from_env()),
			consent: Some(load_consent_from_env()?),
			handoff: Some(load_handoff_from_env()?),
			links: Some(load_links_from_env()?),
			logging: Some(load_logging_from_env()),
		})
	}
}

pub fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

pub fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

pub fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid usize value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_secret(name: &str) -> Option<SecretString> {
	env_var(name).map(SecretString::new)
}

/// Parses `key=value,key=value` pairs.
pub(crate) fn parse_pairs(key: &str, raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
	raw.split(',')
		.map(str::trim)
		.filter(|pair| !pair.is_empty())
		.map(|pair| {
			pair.split_once('=')
				.map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
				.filter(|(k, v)| !k.is_empty() && !v.is_empty())
				.ok_or_else(|| ConfigError::InvalidValue {
					key: key.to_string(),
					message: format!("expected key=value, got '{pair}'"),
				})
		})
		.collect()
}

fn load_batch_from_env() -> Result<BatchConfigLayer, ConfigError> {
	Ok(BatchConfigLayer {
		batch_size: env_usize("WAYMARK_BATCH_SIZE")?,
		flush_interval_ms: env_u64("WAYMARK_BATCH_FLUSH_INTERVAL_MS")?,
		max_queue_size: env_usize("WAYMARK_BATCH_MAX_QUEUE_SIZE")?,
		dedup_window_secs: env_u64("WAYMARK_BATCH_DEDUP_WINDOW_SECS")?,
		beacon_timeout_ms: env_u64("WAYMARK_BATCH_BEACON_TIMEOUT_MS")?,
	})
}

fn load_identity_from_env() -> Result<IdentityConfigLayer, ConfigError> {
	Ok(IdentityConfigLayer {
		session_timeout_secs: env_u64("WAYMARK_IDENTITY_SESSION_TIMEOUT_SECS")?,
		storage_dir: env_var("WAYMARK_IDENTITY_STORAGE_DIR").map(PathBuf::from),
	})
}

fn load_sinks_from_env() -> SinksConfigLayer {
	SinksConfigLayer {
		backend_url: env_var("WAYMARK_SINKS_BACKEND_URL"),
		backend_api_key: env_secret("WAYMARK_SINKS_BACKEND_API_KEY"),
		conversions_url: env_var("WAYMARK_SINKS_CONVERSIONS_URL"),
		conversions_api_key: env_secret("WAYMARK_SINKS_CONVERSIONS_API_KEY"),
		sdk_version: env_var("WAYMARK_SINKS_SDK_VERSION"),
		meta_pixel_id: env_var("WAYMARK_SINKS_META_PIXEL_ID"),
		tagging_url: env_var("WAYMARK_SINKS_TAGGING_URL"),
		ga4_measurement_id: env_var("WAYMARK_SINKS_GA4_MEASUREMENT_ID"),
		appsflyer_dev_key: env_secret("WAYMARK_SINKS_APPSFLYER_DEV_KEY"),
		amplitude_api_key: env_secret("WAYMARK_SINKS_AMPLITUDE_API_KEY"),
	}
}

fn load_consent_from_env() -> Result<ConsentConfigLayer, ConfigError> {
	const KEY: &str = "WAYMARK_CONSENT_SINK_CATEGORIES";
	let sink_categories = match env_var(KEY) {
		Some(raw) => Some(
			parse_pairs(KEY, &raw)?
				.into_iter()
				.map(|(sink, category)| {
					category
						.parse::<ConsentCategory>()
						.map(|category| (sink, category))
						.map_err(|e| ConfigError::InvalidValue {
							key: KEY.to_string(),
							message: e.to_string(),
						})
				})
				.collect::<Result<BTreeMap<_, _>, _>>()?,
		),
		None => None,
	};
	Ok(ConsentConfigLayer { sink_categories })
}

fn load_handoff_from_env() -> Result<HandoffConfigLayer, ConfigError> {
	Ok(HandoffConfigLayer {
		base_url: env_var("WAYMARK_HANDOFF_BASE_URL"),
		ttl_secs: env_u64("WAYMARK_HANDOFF_TTL_SECS")?,
		adopt_remote_identity: env_bool("WAYMARK_HANDOFF_ADOPT_REMOTE_IDENTITY"),
		request_timeout_ms: env_u64("WAYMARK_HANDOFF_REQUEST_TIMEOUT_MS")?,
	})
}

fn load_links_from_env() -> Result<LinksConfigLayer, ConfigError> {
	const KEY: &str = "WAYMARK_LINKS_PID_OVERRIDES";
	Ok(LinksConfigLayer {
		ios_app_id: env_var("WAYMARK_LINKS_IOS_APP_ID"),
		ios_app_slug: env_var("WAYMARK_LINKS_IOS_APP_SLUG"),
		android_package: env_var("WAYMARK_LINKS_ANDROID_PACKAGE"),
		onelink_url: env_var("WAYMARK_LINKS_ONELINK_URL"),
		app_scheme: env_var("WAYMARK_LINKS_APP_SCHEME"),
		default_locale: env_var("WAYMARK_LINKS_DEFAULT_LOCALE"),
		pid_overrides: env_var(KEY)
			.map(|raw| parse_pairs(KEY, &raw))
			.transpose()?,
	})
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("WAYMARK_LOG_LEVEL"),
		json: env_bool("WAYMARK_LOG_JSON"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn parse_pairs_accepts_spacing() {
		let pairs = parse_pairs("K", " ga4=analytics , conversions = marketing ,").unwrap();
		assert_eq!(pairs["ga4"], "analytics");
		assert_eq!(pairs["conversions"], "marketing");
	}

	#[test]
	fn parse_pairs_rejects_malformed() {
		assert!(parse_pairs("K", "ga4").is_err());
		assert!(parse_pairs("K", "=analytics").is_err());
	}

	#[test]
	fn missing_toml_file_is_empty_layer() {
		let source = TomlSource::new("/nonexistent/waymark/config.toml");
		let layer = source.load().unwrap();
		assert!(layer.batch.is_none());
	}

	#[test]
	fn toml_file_loads_sections() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[batch]
batch_size = 7

[handoff]
base_url = "https://api.example.com/api/v2/meta"
adopt_remote_identity = true

[sinks]
conversions_url = "https://api.example.com"
conversions_api_key = "secret"
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(layer.batch.unwrap().batch_size, Some(7));
		let handoff = layer.handoff.unwrap();
		assert_eq!(handoff.adopt_remote_identity, Some(true));
		let sinks = layer.sinks.unwrap();
		assert_eq!(
			sinks.conversions_api_key.map(|k| k.expose().to_string()),
			Some("secret".to_string())
		);
	}

	#[test]
	fn invalid_toml_reports_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[batch\nbatch_size = ").unwrap();
		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}

	#[test]
	fn precedence_ordering() {
		assert!(Precedence::Defaults < Precedence::SystemFile);
		assert!(Precedence::SystemFile < Precedence::UserFile);
		assert!(Precedence::UserFile < Precedence::Environment);
	}
}

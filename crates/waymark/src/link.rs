// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! App-download links that carry attribution and identity into the app.
//!
//! Parameters are resolved per key with the precedence explicit override,
//! current page URL, last touch, first touch, then static default. They live
//! in a sorted map, so identical inputs always serialize to the same URL.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use waymark_config::LinksConfig;
use waymark_core::{AttributionParams, AttributionRecord, ConsentCategory, ATTRIBUTION_KEYS};

use crate::consent::ConsentGate;
use crate::error::{Result, WaymarkError};
use crate::identity::IdentityResolver;

const APP_STORE_BASE: &str = "https://apps.apple.com";
const PLAY_STORE_BASE: &str = "https://play.google.com/store/apps/details";

/// Override keys that steer link construction instead of being forwarded.
const CONTROL_KEYS: [&str; 3] = ["screen", "path", "locale"];

const DEFAULT_SCREEN: &str = "home";
const UTM_KEYS: [&str; 5] = [
	"utm_source",
	"utm_medium",
	"utm_campaign",
	"utm_term",
	"utm_content",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppPlatform {
	Ios,
	Android,
}

impl AppPlatform {
	pub fn as_str(&self) -> &'static str {
		match self {
			AppPlatform::Ios => "ios",
			AppPlatform::Android => "android",
		}
	}
}

impl fmt::Display for AppPlatform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
	/// App Store or Play Store URL with the parameters as query.
	Direct,
	/// Deep-link aggregator URL.
	OneLink,
	/// Store URL without tracking parameters.
	Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionLink {
	pub url: Url,
	pub platform: AppPlatform,
	pub mode: LinkMode,
	/// Resolved parameters before serialization.
	pub params: BTreeMap<String, String>,
}

impl AttributionLink {
	pub fn param(&self, key: &str) -> Option<&str> {
		self.params.get(key).map(String::as_str)
	}
}

impl fmt::Display for AttributionLink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.url, f)
	}
}

fn static_default(key: &str) -> Option<&'static str> {
	match key {
		"utm_source" => Some("website"),
		"utm_medium" => Some("app_download"),
		"utm_campaign" => Some("mobile_app"),
		_ => None,
	}
}

/// `first:{src}/{medium}`, then `last:` when its source differs from
/// first, then `current:` when it differs from the latest stored source.
/// Missing mediums render as `none`.
pub fn attribution_chain(
	first: Option<&AttributionParams>,
	last: Option<&AttributionParams>,
	current: Option<&AttributionParams>,
) -> String {
	fn link(label: &str, params: &AttributionParams) -> Option<String> {
		let source = params.utm_source.as_deref()?;
		let medium = params.utm_medium.as_deref().unwrap_or("none");
		Some(format!("{label}:{source}/{medium}"))
	}

	fn source(params: Option<&AttributionParams>) -> Option<&str> {
		params.and_then(|p| p.utm_source.as_deref())
	}

	let mut chain = Vec::new();

	if let Some(entry) = first.and_then(|p| link("first", p)) {
		chain.push(entry);
	}

	if source(last).is_some() && source(last) != source(first) {
		if let Some(entry) = last.and_then(|p| link("last", p)) {
			chain.push(entry);
		}
	}

	let latest = source(last).or(source(first));
	if source(current).is_some() && source(current) != latest {
		if let Some(entry) = current.and_then(|p| link("current", p)) {
			chain.push(entry);
		}
	}

	chain.join("|")
}

/// First two-letter path segment of `url` when it is a lowercase locale.
fn locale_from_path(url: &Url) -> Option<String> {
	let segment = url.path_segments()?.next()?;
	let is_locale = segment.len() == 2 && segment.chars().all(|c| c.is_ascii_lowercase());
	(is_locale && url.path().len() > 3).then(|| segment.to_string())
}

fn invalid_url(name: &str, e: url::ParseError) -> WaymarkError {
	WaymarkError::InvalidUrl {
		name: name.to_string(),
		message: e.to_string(),
	}
}

/// Builds download links from the identity and consent state.
#[derive(Debug)]
pub struct AttributionLinkBuilder {
	config: LinksConfig,
	onelink: Option<Url>,
	identity: Arc<IdentityResolver>,
	consent: Arc<ConsentGate>,
}

impl AttributionLinkBuilder {
	pub fn new(
		config: LinksConfig,
		identity: Arc<IdentityResolver>,
		consent: Arc<ConsentGate>,
	) -> Result<Self> {
		let onelink = config
			.onelink_url
			.as_deref()
			.map(Url::parse)
			.transpose()
			.map_err(|e| invalid_url("links.onelink_url", e))?;

		let builder = Self {
			config,
			onelink,
			identity,
			consent,
		};
		builder.store_url(AppPlatform::Ios, "en")?;
		builder.store_url(AppPlatform::Android, "en")?;
		Ok(builder)
	}

	pub fn mode(&self) -> LinkMode {
		if self.onelink.is_some() {
			LinkMode::OneLink
		} else {
			LinkMode::Direct
		}
	}

	/// Store listing for `platform`. iOS regions follow the locale, with
	/// `en` mapped to `us`.
	pub fn store_url(&self, platform: AppPlatform, locale: &str) -> Result<Url> {
		match platform {
			AppPlatform::Ios => {
				let region = if locale == "en" { "us" } else { locale };
				Url::parse(&format!(
					"{APP_STORE_BASE}/{region}/app/{}/id{}",
					self.config.ios_app_slug, self.config.ios_app_id
				))
				.map_err(|e| invalid_url("links.ios_app_id", e))
			}
			AppPlatform::Android => {
				let mut url =
					Url::parse(PLAY_STORE_BASE).map_err(|e| invalid_url("links.android_package", e))?;
				url.query_pairs_mut()
					.append_pair("id", &self.config.android_package);
				Ok(url)
			}
		}
	}

	/// Builds a download link. `current_url` defaults to the page the
	/// identity resolver was initialised with.
	pub fn build_link(
		&self,
		platform: AppPlatform,
		overrides: &BTreeMap<String, String>,
		current_url: Option<&Url>,
	) -> Result<AttributionLink> {
		let page = self.identity.current_page();
		let current_url = current_url.cloned().or_else(|| page.as_ref().map(|p| p.url.clone()));
		let locale = self.resolve_locale(overrides, current_url.as_ref());
		let store_url = self.store_url(platform, &locale)?;

		if !self.consent.allows(ConsentCategory::Marketing) {
			debug!(platform = %platform, "no marketing consent, returning untracked store link");
			return Ok(AttributionLink {
				url: store_url,
				platform,
				mode: LinkMode::Untracked,
				params: BTreeMap::new(),
			});
		}

		let current = current_url.as_ref().map(AttributionParams::from_url);
		let snapshot = self.identity.snapshot();
		let first = snapshot.attribution.first_touch.as_ref();
		let last = snapshot.attribution.last_touch.as_ref();

		let mut params = BTreeMap::new();
		for key in ATTRIBUTION_KEYS {
			let value = overrides
				.get(key)
				.map(String::as_str)
				.filter(|v| !v.is_empty())
				.or_else(|| current.as_ref().and_then(|c| c.get(key)))
				.or_else(|| last.and_then(|r| r.params.get(key)))
				.or_else(|| first.and_then(|r| r.params.get(key)))
				.or_else(|| static_default(key));
			if let Some(value) = value {
				params.insert(key.to_string(), value.to_string());
			}
		}

		let referrer = last
			.and_then(|r| r.referrer.clone())
			.or_else(|| first.and_then(|r| r.referrer.clone()))
			.or_else(|| page.as_ref().and_then(|p| p.referrer.clone()))
			.unwrap_or_else(|| "direct".to_string());
		params.insert("web_referrer".into(), referrer);
		if let Some(landing) = first
			.and_then(|r| r.landing_page.clone())
			.or_else(|| current_url.as_ref().map(Url::to_string))
		{
			params.insert("web_landing_page".into(), landing);
		}
		if let Some(url) = &current_url {
			params.insert("web_current_page".into(), url.to_string());
		}
		params.insert("target_platform".into(), platform.to_string());
		params.insert("handoff_type".into(), "app_download".into());

		for (key, value) in overrides {
			if !ATTRIBUTION_KEYS.contains(&key.as_str()) && !CONTROL_KEYS.contains(&key.as_str()) {
				params.insert(key.clone(), value.clone());
			}
		}

		params.insert(
			"unified_user_id".into(),
			snapshot.unified_user_id.to_string(),
		);
		if let Some(session_id) = &snapshot.session_id {
			params.insert("session_id".into(), session_id.to_string());
		}
		params.insert(
			"device_fingerprint".into(),
			snapshot.device_fingerprint.clone(),
		);
		if let Some(metrics) = &snapshot.visit_metrics {
			params.insert("web_visit_count".into(), metrics.visit_count.to_string());
		}
		let timestamp = |r: &AttributionRecord| r.timestamp.timestamp_millis().to_string();
		if let Some(first) = first {
			params.insert("first_touch_timestamp".into(), timestamp(first));
		}
		if let Some(last) = last {
			params.insert("last_touch_timestamp".into(), timestamp(last));
		}
		params.insert(
			"attribution_chain".into(),
			attribution_chain(
				first.map(|r| &r.params),
				last.map(|r| &r.params),
				current.as_ref(),
			),
		);

		params.extend(self.consent.link_params());
		params.retain(|_, value| !value.is_empty());

		let link = match &self.onelink {
			Some(onelink) => AttributionLink {
				url: self.onelink_url(onelink, platform, &params, overrides, current_url.as_ref(), &locale)?,
				platform,
				mode: LinkMode::OneLink,
				params,
			},
			None => {
				let mut url = store_url;
				url.query_pairs_mut().extend_pairs(params.iter());
				AttributionLink {
					url,
					platform,
					mode: LinkMode::Direct,
					params,
				}
			}
		};

		debug!(
			platform = %platform,
			mode = ?link.mode,
			params = link.params.len(),
			"attribution link built"
		);
		Ok(link)
	}

	fn onelink_url(
		&self,
		base: &Url,
		platform: AppPlatform,
		params: &BTreeMap<String, String>,
		overrides: &BTreeMap<String, String>,
		current_url: Option<&Url>,
		locale: &str,
	) -> Result<Url> {
		let param = |key: &str| params.get(key).map(String::as_str);
		let source = param("utm_source").unwrap_or("website");

		let pid = overrides
			.get("pid")
			.cloned()
			.or_else(|| self.config.pid_overrides.get(source).cloned())
			.unwrap_or_else(|| source.to_string());
		let screen = overrides
			.get("screen")
			.map(String::as_str)
			.unwrap_or(DEFAULT_SCREEN);
		let path = overrides.get("path").map(String::as_str).unwrap_or("");

		let mut af = BTreeMap::new();
		af.insert("pid".to_string(), pid);
		if let Some(campaign) = param("utm_campaign") {
			af.insert("c".to_string(), campaign.to_string());
		}
		af.insert(
			"af_dp".to_string(),
			format!("{}://{screen}{path}", self.config.app_scheme),
		);
		if let Some(url) = current_url {
			af.insert("af_web_dp".to_string(), url.to_string());
		}
		af.insert("af_force_deeplink".to_string(), "true".to_string());
		af.insert(
			"af_ios_url".to_string(),
			self.store_url(AppPlatform::Ios, "en")?.to_string(),
		);
		af.insert(
			"af_android_url".to_string(),
			self.store_url(AppPlatform::Android, "en")?.to_string(),
		);

		for (key, value) in params {
			if !UTM_KEYS.contains(&key.as_str()) && key != "pid" {
				af.insert(format!("af_{key}"), value.clone());
			}
		}

		af.insert(
			"af_sub1".to_string(),
			param("utm_medium").unwrap_or("organic").to_string(),
		);
		af.insert(
			"af_sub2".to_string(),
			param("utm_term").unwrap_or_default().to_string(),
		);
		af.insert(
			"af_sub3".to_string(),
			param("utm_content").unwrap_or_default().to_string(),
		);
		af.insert("af_sub4".to_string(), platform.to_string());
		af.insert("af_sub5".to_string(), locale.to_string());
		af.retain(|_, value| !value.is_empty());

		let mut url = base.clone();
		url.query_pairs_mut().extend_pairs(af.iter());
		Ok(url)
	}

	fn resolve_locale(&self, overrides: &BTreeMap<String, String>, current_url: Option<&Url>) -> String {
		overrides
			.get("locale")
			.filter(|l| !l.is_empty())
			.cloned()
			.or_else(|| current_url.and_then(locale_from_path))
			.unwrap_or_else(|| self.config.default_locale.clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::diagnostics::Diagnostics;
	use crate::identity::PageContext;
	use crate::storage::{MemoryStore, Storage};
	use chrono::{TimeZone, Utc};
	use waymark_config::ConsentConfig;

	struct Fixture {
		identity: Arc<IdentityResolver>,
		consent: Arc<ConsentGate>,
	}

	fn fixture() -> Fixture {
		let clock = Arc::new(ManualClock::new(
			Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
		));
		let storage = Storage::in_memory();
		let identity = Arc::new(IdentityResolver::new(
			storage,
			clock.clone(),
			Arc::new(Diagnostics::new()),
		));
		let consent = Arc::new(ConsentGate::load(
			Arc::new(MemoryStore::new()),
			clock,
			ConsentConfig::default(),
		));
		consent.accept_all();
		Fixture { identity, consent }
	}

	fn builder(f: &Fixture, config: LinksConfig) -> AttributionLinkBuilder {
		AttributionLinkBuilder::new(config, f.identity.clone(), f.consent.clone()).unwrap()
	}

	fn url(s: &str) -> Url {
		Url::parse(s).unwrap()
	}

	fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
		pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect()
	}

	#[test]
	fn override_beats_current_url_and_last_touch() {
		let f = fixture();
		f.identity
			.init(&PageContext::new(url("https://example.com/?utm_source=z_last")));
		let links = builder(&f, LinksConfig::default());

		let link = links
			.build_link(
				AppPlatform::Ios,
				&overrides(&[("utm_source", "x_override")]),
				Some(&url("https://example.com/pricing?utm_source=y_current")),
			)
			.unwrap();
		assert_eq!(link.param("utm_source"), Some("x_override"));

		let link = links
			.build_link(
				AppPlatform::Ios,
				&BTreeMap::new(),
				Some(&url("https://example.com/pricing?utm_source=y_current")),
			)
			.unwrap();
		assert_eq!(link.param("utm_source"), Some("y_current"));

		let link = links
			.build_link(AppPlatform::Ios, &BTreeMap::new(), Some(&url("https://example.com/")))
			.unwrap();
		assert_eq!(link.param("utm_source"), Some("z_last"));
	}

	#[test]
	fn defaults_fill_missing_utms() {
		let f = fixture();
		let links = builder(&f, LinksConfig::default());
		let link = links
			.build_link(AppPlatform::Android, &BTreeMap::new(), None)
			.unwrap();

		assert_eq!(link.mode, LinkMode::Direct);
		assert_eq!(link.param("utm_source"), Some("website"));
		assert_eq!(link.param("utm_medium"), Some("app_download"));
		assert_eq!(link.param("utm_campaign"), Some("mobile_app"));
		assert!(link.param("utm_term").is_none());
		assert!(link
			.url
			.as_str()
			.starts_with("https://play.google.com/store/apps/details?id=help.truckdriver.cdlhelp&"));
		assert!(link.param("unified_user_id").is_some());
		assert_eq!(link.param("consent_marketing"), Some("1"));
	}

	#[test]
	fn no_marketing_consent_returns_bare_store_url() {
		let f = fixture();
		f.consent.customize(true, false);
		let links = builder(&f, LinksConfig::default());

		let link = links
			.build_link(
				AppPlatform::Ios,
				&overrides(&[("utm_source", "google")]),
				Some(&url("https://example.com/es/quiz")),
			)
			.unwrap();
		assert_eq!(link.mode, LinkMode::Untracked);
		assert!(link.params.is_empty());
		assert_eq!(
			link.url.as_str(),
			"https://apps.apple.com/es/app/cdl-help/id6444388755"
		);
	}

	#[test]
	fn english_maps_to_us_store() {
		let f = fixture();
		f.consent.reject_all();
		let links = builder(&f, LinksConfig::default());
		let link = links
			.build_link(AppPlatform::Ios, &BTreeMap::new(), Some(&url("https://example.com/")))
			.unwrap();
		assert_eq!(
			link.url.as_str(),
			"https://apps.apple.com/us/app/cdl-help/id6444388755"
		);
	}

	#[test]
	fn same_inputs_same_url() {
		let f = fixture();
		let links = builder(&f, LinksConfig::default());
		let current = url("https://example.com/?utm_source=google&utm_medium=cpc");
		let a = links
			.build_link(AppPlatform::Ios, &BTreeMap::new(), Some(&current))
			.unwrap();
		let b = links
			.build_link(AppPlatform::Ios, &BTreeMap::new(), Some(&current))
			.unwrap();
		assert_eq!(a.url, b.url);
	}

	#[test]
	fn onelink_maps_pid_and_prefixes_params() {
		let f = fixture();
		let links = builder(
			&f,
			LinksConfig {
				onelink_url: Some("https://cdlhelp.onelink.me/mHbW/mgvvp96d".into()),
				..Default::default()
			},
		);

		let link = links
			.build_link(
				AppPlatform::Android,
				&overrides(&[("screen", "quiz"), ("path", "/3"), ("quiz_id", "42")]),
				Some(&url("https://example.com/fr/quiz?utm_source=google&gclid=abc")),
			)
			.unwrap();
		assert_eq!(link.mode, LinkMode::OneLink);

		let query: BTreeMap<String, String> = link.url.query_pairs().into_owned().collect();
		assert_eq!(query["pid"], "google_ads");
		assert_eq!(query["c"], "mobile_app");
		assert_eq!(query["af_dp"], "cdlhelp://quiz/3");
		assert_eq!(query["af_force_deeplink"], "true");
		assert_eq!(query["af_sub1"], "app_download");
		assert_eq!(query["af_sub4"], "android");
		assert_eq!(query["af_sub5"], "fr");
		assert_eq!(query["af_gclid"], "abc");
		assert_eq!(query["af_quiz_id"], "42");
		assert!(query.contains_key("af_unified_user_id"));
		assert!(!query.contains_key("af_screen"));
		assert!(!query.contains_key("utm_source"));
		assert!(!query.contains_key("af_sub2"));
	}

	#[test]
	fn invalid_onelink_is_rejected() {
		let f = fixture();
		let err = AttributionLinkBuilder::new(
			LinksConfig {
				onelink_url: Some("not a url".into()),
				..Default::default()
			},
			f.identity.clone(),
			f.consent.clone(),
		)
		.unwrap_err();
		assert!(matches!(err, WaymarkError::InvalidUrl { .. }));
	}

	fn utm(source: &str, medium: Option<&str>) -> AttributionParams {
		let mut params = AttributionParams::default();
		params.set("utm_source", source);
		if let Some(medium) = medium {
			params.set("utm_medium", medium);
		}
		params
	}

	#[test]
	fn chain_skips_repeated_sources() {
		let first = utm("twitter", None);
		let last = utm("facebook", Some("social"));
		let current = utm("google", Some("cpc"));
		assert_eq!(
			attribution_chain(Some(&first), Some(&last), Some(&current)),
			"first:twitter/none|last:facebook/social|current:google/cpc"
		);

		let same = utm("twitter", Some("paid"));
		assert_eq!(
			attribution_chain(Some(&first), Some(&same), Some(&same)),
			"first:twitter/none"
		);
		assert_eq!(attribution_chain(None, None, None), "");
		assert_eq!(
			attribution_chain(None, None, Some(&current)),
			"current:google/cpc"
		);
	}
}

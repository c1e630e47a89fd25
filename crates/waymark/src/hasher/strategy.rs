// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Ordered, capability-checked hashing strategies.

use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

const SHA256_HEX_LEN: usize = 64;

/// Which strategy produced a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashTier {
	/// SHA-256 from the host platform.
	Platform,
	/// SHA-256 computed in-process.
	Library,
	/// Non-cryptographic fallback. Never sent to production endpoints.
	Checksum,
}

impl HashTier {
	pub fn production_safe(&self) -> bool {
		!matches!(self, HashTier::Checksum)
	}
}

/// One hashing strategy. `digest` returns `None` when the strategy is
/// unavailable so the next one can be tried.
pub trait Hasher: Send + Sync + std::fmt::Debug {
	fn name(&self) -> &'static str;

	fn tier(&self) -> HashTier;

	fn digest(&self, input: &str) -> Option<String>;
}

/// SHA-256 supplied by the embedding host (e.g. a platform crypto API).
pub trait DigestProvider: Send + Sync + std::fmt::Debug {
	/// Lowercase hex SHA-256 of `input`, or `None` if the call failed.
	fn sha256_hex(&self, input: &[u8]) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct PlatformHasher {
	provider: Option<Arc<dyn DigestProvider>>,
}

impl PlatformHasher {
	pub fn new(provider: Arc<dyn DigestProvider>) -> Self {
		Self {
			provider: Some(provider),
		}
	}

	/// A platform hasher with no provider; always yields to the next tier.
	pub fn unavailable() -> Self {
		Self::default()
	}
}

impl Hasher for PlatformHasher {
	fn name(&self) -> &'static str {
		"platform_sha256"
	}

	fn tier(&self) -> HashTier {
		HashTier::Platform
	}

	fn digest(&self, input: &str) -> Option<String> {
		let digest = self.provider.as_ref()?.sha256_hex(input.as_bytes())?;
		let well_formed =
			digest.len() == SHA256_HEX_LEN && digest.chars().all(|c| c.is_ascii_hexdigit());
		well_formed.then(|| digest.to_ascii_lowercase())
	}
}

#[derive(Debug, Clone)]
pub struct Sha256Hasher {
	enabled: bool,
}

impl Sha256Hasher {
	pub fn new() -> Self {
		Self { enabled: true }
	}

	/// A library hasher that reports itself unavailable.
	pub fn disabled() -> Self {
		Self { enabled: false }
	}
}

impl Default for Sha256Hasher {
	fn default() -> Self {
		Self::new()
	}
}

impl Hasher for Sha256Hasher {
	fn name(&self) -> &'static str {
		"library_sha256"
	}

	fn tier(&self) -> HashTier {
		HashTier::Library
	}

	fn digest(&self, input: &str) -> Option<String> {
		self
			.enabled
			.then(|| hex::encode(Sha256::digest(input.as_bytes())))
	}
}

/// 32-bit multiplicative string checksum rendered as eight hex digits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumHasher;

impl Hasher for ChecksumHasher {
	fn name(&self) -> &'static str {
		"checksum"
	}

	fn tier(&self) -> HashTier {
		HashTier::Checksum
	}

	fn digest(&self, input: &str) -> Option<String> {
		let h = input
			.encode_utf16()
			.fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)));
		Some(format!("{h:08x}"))
	}
}

/// A digest and the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashedValue {
	pub digest: String,
	pub tier: HashTier,
}

/// Strategies tried in order until one yields a digest.
#[derive(Debug, Clone)]
pub struct HasherChain {
	strategies: Vec<Arc<dyn Hasher>>,
}

impl HasherChain {
	pub fn new(strategies: Vec<Arc<dyn Hasher>>) -> Self {
		Self { strategies }
	}

	/// Platform (when a provider is given), library SHA-256, then checksum.
	pub fn standard(provider: Option<Arc<dyn DigestProvider>>) -> Self {
		let platform = provider.map(PlatformHasher::new).unwrap_or_default();
		Self::new(vec![
			Arc::new(platform),
			Arc::new(Sha256Hasher::new()),
			Arc::new(ChecksumHasher),
		])
	}

	pub fn digest(&self, input: &str) -> Option<HashedValue> {
		self.strategies.iter().find_map(|strategy| {
			strategy.digest(input).map(|digest| HashedValue {
				digest,
				tier: strategy.tier(),
			})
		})
	}
}

impl Default for HasherChain {
	fn default() -> Self {
		Self::standard(None)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	struct FixedProvider(Option<String>);

	impl DigestProvider for FixedProvider {
		fn sha256_hex(&self, _input: &[u8]) -> Option<String> {
			self.0.clone()
		}
	}

	#[test]
	fn library_sha256_matches_known_vector() {
		assert_eq!(
			Sha256Hasher::new().digest("abc").unwrap(),
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
	}

	#[test]
	fn platform_hasher_is_preferred_when_available() {
		let digest = "A".repeat(64);
		let chain = HasherChain::standard(Some(Arc::new(FixedProvider(Some(digest)))));
		let hashed = chain.digest("a@b.com").unwrap();
		assert_eq!(hashed.tier, HashTier::Platform);
		assert_eq!(hashed.digest, "a".repeat(64));
	}

	#[test]
	fn malformed_platform_digest_falls_through() {
		let chain = HasherChain::standard(Some(Arc::new(FixedProvider(Some("nope".into())))));
		assert_eq!(chain.digest("a@b.com").unwrap().tier, HashTier::Library);
	}

	#[test]
	fn checksum_is_last_resort() {
		let chain = HasherChain::new(vec![
			Arc::new(PlatformHasher::unavailable()),
			Arc::new(Sha256Hasher::disabled()),
			Arc::new(ChecksumHasher),
		]);
		let hashed = chain.digest("a@b.com").unwrap();
		assert_eq!(hashed.tier, HashTier::Checksum);
		assert_eq!(hashed.digest.len(), 8);
		assert!(!hashed.tier.production_safe());
	}

	#[test]
	fn empty_chain_is_exhausted() {
		assert_eq!(HasherChain::new(Vec::new()).digest("a@b.com"), None);
	}
}

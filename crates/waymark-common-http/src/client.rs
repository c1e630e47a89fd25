// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP client builder with a consistent User-Agent header.

use reqwest::{Client, ClientBuilder};

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates a client builder with the standard Waymark User-Agent header.
///
/// # Example
/// ```ignore
/// let client = waymark_common_http::builder()
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Returns the standard Waymark User-Agent string.
///
/// Format: `waymark/{os}-{arch}/{version}`
pub fn user_agent() -> String {
	format!(
		"waymark/{}-{}/{}",
		std::env::consts::OS,
		std::env::consts::ARCH,
		SDK_VERSION
	)
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-field normalization applied before hashing user data. Each function
//! returns `None` when the input cannot be normalized.

use chrono::NaiveDate;

const DEFAULT_COUNTRY_CODE: &str = "1";
const BIRTH_DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

fn non_empty(value: String) -> Option<String> {
	(!value.is_empty()).then_some(value)
}

/// Lowercased and trimmed; Gmail local parts lose their dots.
pub fn email(raw: &str) -> Option<String> {
	let lowered = raw.trim().to_lowercase();
	let (local, domain) = lowered.split_once('@')?;
	if local.is_empty() || domain.is_empty() {
		return None;
	}

	if matches!(domain, "gmail.com" | "googlemail.com") {
		let local: String = local.chars().filter(|c| *c != '.').collect();
		return non_empty(format!("{local}@{domain}"));
	}
	Some(lowered)
}

/// Digits only. Ten-digit numbers get the default country code.
pub fn phone(raw: &str) -> Option<String> {
	let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
	match digits.len() {
		0 => None,
		10 => Some(format!("{DEFAULT_COUNTRY_CODE}{digits}")),
		_ => Some(digits),
	}
}

/// Names, city, state: lowercased and trimmed.
pub fn text(raw: &str) -> Option<String> {
	non_empty(raw.trim().to_lowercase())
}

pub fn zip(raw: &str) -> Option<String> {
	non_empty(
		raw.trim()
			.to_lowercase()
			.chars()
			.filter(|c| !c.is_whitespace())
			.collect(),
	)
}

/// Two-letter lowercase country code.
pub fn country(raw: &str) -> Option<String> {
	let code = raw.trim().to_ascii_lowercase();
	(code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic())).then_some(code)
}

/// `m` or `f` from the first letter.
pub fn gender(raw: &str) -> Option<String> {
	match raw.trim().chars().next()?.to_ascii_lowercase() {
		'm' => Some("m".to_string()),
		'f' => Some("f".to_string()),
		_ => None,
	}
}

/// `YYYYMMDD` from `YYYY-MM-DD`, `MM/DD/YYYY` or `YYYYMMDD`.
pub fn birth_date(raw: &str) -> Option<String> {
	let raw = raw.trim();
	BIRTH_DATE_FORMATS
		.iter()
		.find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
		.map(|date| date.format("%Y%m%d").to_string())
}

pub fn external_id(raw: &str) -> Option<String> {
	non_empty(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn gmail_dots_are_stripped() {
		assert_eq!(
			email("  John.Doe@Gmail.com ").as_deref(),
			Some("johndoe@gmail.com")
		);
		assert_eq!(
			email("john.doe@example.com").as_deref(),
			Some("john.doe@example.com")
		);
		assert_eq!(email("not-an-email"), None);
		assert_eq!(email("@example.com"), None);
	}

	#[test]
	fn phone_numbers() {
		assert_eq!(phone("(555) 123-4567").as_deref(), Some("15551234567"));
		assert_eq!(phone("+44 20 7946 0958").as_deref(), Some("442079460958"));
		assert_eq!(phone("n/a"), None);
	}

	#[test]
	fn gender_and_country() {
		assert_eq!(gender("Female").as_deref(), Some("f"));
		assert_eq!(gender("M").as_deref(), Some("m"));
		assert_eq!(gender("x"), None);
		assert_eq!(country(" US ").as_deref(), Some("us"));
		assert_eq!(country("USA"), None);
	}

	#[test]
	fn birth_date_formats() {
		assert_eq!(birth_date("1990-07-04").as_deref(), Some("19900704"));
		assert_eq!(birth_date("07/04/1990").as_deref(), Some("19900704"));
		assert_eq!(birth_date("19900704").as_deref(), Some("19900704"));
		assert_eq!(birth_date("July 4th"), None);
	}

	#[test]
	fn zip_drops_whitespace() {
		assert_eq!(zip(" SW1A 1AA ").as_deref(), Some("sw1a1aa"));
		assert_eq!(text("   "), None);
	}
}

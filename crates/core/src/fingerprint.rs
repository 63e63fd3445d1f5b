//! Canonical session identity.

use std::fmt;

use pagebridge_protocol::ModelConfig;
use serde::Serialize;

use crate::error::Result;

/// Canonical string form of a [`ModelConfig`], used as the session cache key.
///
/// Fields are written in a fixed order and absent values are written as an
/// explicit placeholder, so configs that differ only in key order or in
/// omitted-vs-`null` fields fingerprint equally. Defaults are not applied
/// here; callers fingerprint the effective config.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Canonical<'a> {
	shared_context: Option<&'a str>,
	expected_input_languages: &'a [String],
	expected_context_languages: &'a [String],
	output_language: Option<&'a str>,
	tone: Option<&'a str>,
	source_language: Option<&'a str>,
	target_language: Option<&'a str>,
}

impl Fingerprint {
	pub fn of(config: &ModelConfig) -> Result<Self> {
		let canonical = Canonical {
			shared_context: config.shared_context.as_deref(),
			expected_input_languages: config.expected_input_languages.as_deref().unwrap_or_default(),
			expected_context_languages: config.expected_context_languages.as_deref().unwrap_or_default(),
			output_language: config.output_language.as_deref(),
			tone: config.tone.as_deref(),
			source_language: config.source_language.as_deref(),
			target_language: config.target_language.as_deref(),
		};
		Ok(Self(serde_json::to_string(&canonical)?))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

//! Session configuration and the mapping from request payloads onto it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Capability;

/// Language used for every unspecified language expectation.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Configuration fields that decide session identity.
///
/// Two requests whose effective `ModelConfig` is equal share one session.
/// Capability-specific knobs that do not affect identity travel as extras
/// (see [`CapabilityRequest::extras`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shared_context: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_input_languages: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_context_languages: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output_language: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tone: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source_language: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target_language: Option<String>,
}

impl ModelConfig {
	/// Applies the defaults the page realm probes and creates sessions with.
	///
	/// Input languages default to `["en"]`, context languages to the input
	/// languages, the output language to `"en"`, and the shared context to the
	/// capability's default.
	pub fn with_defaults(mut self, capability: Capability) -> Self {
		let input = self
			.expected_input_languages
			.take()
			.unwrap_or_else(|| vec![DEFAULT_LANGUAGE.to_string()]);
		if self.expected_context_languages.is_none() {
			self.expected_context_languages = Some(input.clone());
		}
		self.expected_input_languages = Some(input);
		if self.output_language.is_none() {
			self.output_language = Some(DEFAULT_LANGUAGE.to_string());
		}
		if self.shared_context.is_none() {
			self.shared_context = capability.default_shared_context().map(str::to_string);
		}
		self
	}
}

/// Per-call options handed to the capability alongside the input text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tone: Option<String>,
}

/// A request payload for one capability.
///
/// Implementors are the `<OP>` / `<OP>_STREAMING` payloads; the page realm
/// uses this trait to turn a validated payload into host calls without knowing
/// which capability it serves.
pub trait CapabilityRequest: Serialize + DeserializeOwned + Send + Sync + 'static {
	/// Capability this payload is addressed to.
	const CAPABILITY: Capability;

	/// Success data of a completed `<OP>` call.
	type Output: Serialize + DeserializeOwned + Send + Sync + 'static;

	/// Text the operation runs on.
	fn input(&self) -> &str;

	/// Identity-relevant configuration, before defaults are applied.
	fn model_config(&self) -> ModelConfig;

	/// Capability-specific availability and create options.
	fn extras(&self) -> Map<String, Value> {
		Map::new()
	}

	fn run_options(&self) -> RunOptions {
		RunOptions::default()
	}

	/// Wraps the capability's text result into the success data.
	fn output(text: String) -> Self::Output;
}

/// Inserts `value` under `key` unless it serializes to `null`.
pub(crate) fn insert_extra<T: Serialize>(extras: &mut Map<String, Value>, key: &str, value: &T) {
	match serde_json::to_value(value) {
		Ok(Value::Null) | Err(_) => {}
		Ok(value) => {
			extras.insert(key.to_string(), value);
		}
	}
}

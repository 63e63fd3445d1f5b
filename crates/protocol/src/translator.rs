//! `TRANSLATE` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::insert_extra;
use crate::{Capability, CapabilityRequest, ModelConfig, TextOutput};

/// Language pair a translator session is created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorConfig {
	pub source_language: String,
	pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslateRequest {
	pub text: String,
	pub config: TranslatorConfig,
}

impl TranslateRequest {
	pub fn new(text: impl Into<String>, source_language: impl Into<String>, target_language: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			config: TranslatorConfig {
				source_language: source_language.into(),
				target_language: target_language.into(),
			},
		}
	}
}

impl CapabilityRequest for TranslateRequest {
	const CAPABILITY: Capability = Capability::Translator;
	type Output = TextOutput;

	fn input(&self) -> &str {
		&self.text
	}

	fn model_config(&self) -> ModelConfig {
		ModelConfig {
			source_language: Some(self.config.source_language.clone()),
			target_language: Some(self.config.target_language.clone()),
			..Default::default()
		}
	}

	fn extras(&self) -> Map<String, Value> {
		let mut extras = Map::new();
		insert_extra(&mut extras, "sourceLanguage", &self.config.source_language);
		insert_extra(&mut extras, "targetLanguage", &self.config.target_language);
		extras
	}

	fn output(text: String) -> TextOutput {
		TextOutput { text }
	}
}

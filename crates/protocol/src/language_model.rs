//! `PROMPT` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{DEFAULT_LANGUAGE, insert_extra};
use crate::{Capability, CapabilityRequest, ModelConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
	System,
	User,
	Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialPrompt {
	pub role: PromptRole,
	pub content: String,
}

/// Modality and languages a session expects on one side of the exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedModality {
	#[serde(rename = "type")]
	pub modality: String,
	pub languages: Vec<String>,
}

impl ExpectedModality {
	pub fn text(languages: Vec<String>) -> Self {
		Self {
			modality: "text".to_string(),
			languages,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageModelConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub top_k: Option<u32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_inputs: Option<Vec<ExpectedModality>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_outputs: Option<Vec<ExpectedModality>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub initial_prompts: Option<Vec<InitialPrompt>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
	pub text: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub config: Option<LanguageModelConfig>,
}

impl PromptRequest {
	pub fn new(text: impl Into<String>) -> Self {
		Self { text: text.into(), config: None }
	}

	pub fn with_config(mut self, config: LanguageModelConfig) -> Self {
		self.config = Some(config);
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextOutput {
	pub text: String,
}

impl CapabilityRequest for PromptRequest {
	const CAPABILITY: Capability = Capability::LanguageModel;
	type Output = TextOutput;

	fn input(&self) -> &str {
		&self.text
	}

	fn model_config(&self) -> ModelConfig {
		ModelConfig::default()
	}

	fn extras(&self) -> Map<String, Value> {
		let config = self.config.clone().unwrap_or_default();
		let expected_outputs = config
			.expected_outputs
			.unwrap_or_else(|| vec![ExpectedModality::text(vec![DEFAULT_LANGUAGE.to_string()])]);

		let mut extras = Map::new();
		insert_extra(&mut extras, "topK", &config.top_k);
		insert_extra(&mut extras, "temperature", &config.temperature);
		insert_extra(&mut extras, "expectedInputs", &config.expected_inputs);
		insert_extra(&mut extras, "expectedOutputs", &expected_outputs);
		insert_extra(&mut extras, "initialPrompts", &config.initial_prompts);
		extras
	}

	fn output(text: String) -> TextOutput {
		TextOutput { text }
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn expected_outputs_default_to_english_text() {
		let extras = PromptRequest::new("hi").extras();
		assert_eq!(extras.get("expectedOutputs"), Some(&json!([{"type": "text", "languages": ["en"]}])));
		assert!(!extras.contains_key("temperature"));
	}

	#[test]
	fn sampling_knobs_travel_as_extras() {
		let request = PromptRequest::new("hi").with_config(LanguageModelConfig {
			top_k: Some(3),
			temperature: Some(0.5),
			initial_prompts: Some(vec![InitialPrompt {
				role: PromptRole::System,
				content: "be brief".into(),
			}]),
			..Default::default()
		});
		let extras = request.extras();
		assert_eq!(extras.get("topK"), Some(&json!(3)));
		assert_eq!(extras.get("temperature"), Some(&json!(0.5)));
		assert_eq!(extras["initialPrompts"][0]["role"], "system");
		assert_eq!(request.model_config(), ModelConfig::default());
	}
}

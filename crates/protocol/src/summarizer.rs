//! `SUMMARIZE` payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::insert_extra;
use crate::{Capability, CapabilityRequest, ModelConfig, RunOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryType {
	Tldr,
	KeyPoints,
	Teaser,
	Headline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryFormat {
	#[default]
	PlainText,
	Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
	Short,
	Medium,
	Long,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummarizerConfig {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_input_languages: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_context_languages: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shared_context: Option<String>,
	#[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
	pub summary_type: Option<SummaryType>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub format: Option<SummaryFormat>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub length: Option<SummaryLength>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub output_language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarizeRequest {
	pub text: String,
	#[serde(default)]
	pub config: SummarizerConfig,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub options: Option<SummarizeOptions>,
}

impl SummarizeRequest {
	pub fn new(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			config: SummarizerConfig::default(),
			options: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryOutput {
	pub summary: String,
}

impl CapabilityRequest for SummarizeRequest {
	const CAPABILITY: Capability = Capability::Summarizer;
	type Output = SummaryOutput;

	fn input(&self) -> &str {
		&self.text
	}

	fn model_config(&self) -> ModelConfig {
		ModelConfig {
			shared_context: self.config.shared_context.clone(),
			expected_input_languages: self.config.expected_input_languages.clone(),
			expected_context_languages: self.config.expected_context_languages.clone(),
			output_language: self.config.output_language.clone(),
			..Default::default()
		}
	}

	fn extras(&self) -> Map<String, Value> {
		let mut extras = Map::new();
		insert_extra(&mut extras, "type", &self.config.summary_type);
		insert_extra(&mut extras, "format", &self.config.format.unwrap_or_default());
		insert_extra(&mut extras, "length", &self.config.length);
		extras
	}

	fn run_options(&self) -> RunOptions {
		RunOptions {
			context: self.options.as_ref().and_then(|options| options.context.clone()),
			tone: None,
		}
	}

	fn output(summary: String) -> SummaryOutput {
		SummaryOutput { summary }
	}
}

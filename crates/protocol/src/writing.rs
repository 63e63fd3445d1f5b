//! `REWRITE` and `WRITE` payloads.
//!
//! Both capabilities take the same configuration; they differ only in the
//! capability they address and in their default shared context.

use serde::{Deserialize, Serialize};

use crate::{Capability, CapabilityRequest, ModelConfig, RunOptions, TextOutput};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WritingConfig {
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
}

impl WritingConfig {
	fn model_config(&self) -> ModelConfig {
		ModelConfig {
			shared_context: self.shared_context.clone(),
			expected_input_languages: self.expected_input_languages.clone(),
			expected_context_languages: self.expected_context_languages.clone(),
			output_language: self.output_language.clone(),
			tone: self.tone.clone(),
			..Default::default()
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritingOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub context: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tone: Option<String>,
}

impl From<Option<&WritingOptions>> for RunOptions {
	fn from(options: Option<&WritingOptions>) -> Self {
		let options = options.cloned().unwrap_or_default();
		RunOptions {
			context: options.context,
			tone: options.tone,
		}
	}
}

macro_rules! writing_request {
	($(#[$meta:meta])* $name:ident, $capability:expr) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
		pub struct $name {
			pub text: String,
			#[serde(default, skip_serializing_if = "Option::is_none")]
			pub config: Option<WritingConfig>,
			#[serde(default, skip_serializing_if = "Option::is_none")]
			pub options: Option<WritingOptions>,
		}

		impl $name {
			pub fn new(text: impl Into<String>) -> Self {
				Self {
					text: text.into(),
					config: None,
					options: None,
				}
			}
		}

		impl CapabilityRequest for $name {
			const CAPABILITY: Capability = $capability;
			type Output = TextOutput;

			fn input(&self) -> &str {
				&self.text
			}

			fn model_config(&self) -> ModelConfig {
				self.config.as_ref().map(WritingConfig::model_config).unwrap_or_default()
			}

			fn run_options(&self) -> RunOptions {
				RunOptions::from(self.options.as_ref())
			}

			fn output(text: String) -> TextOutput {
				TextOutput { text }
			}
		}
	};
}

writing_request!(
	/// Rewrites existing text.
	RewriteRequest,
	Capability::Rewriter
);

writing_request!(
	/// Writes new text from a task description.
	WriteRequest,
	Capability::Writer
);

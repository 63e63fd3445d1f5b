use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pagebridge_protocol::{
	InitialPrompt, LanguageModelConfig, PromptRequest, PromptRole, RewriteRequest, SummarizeOptions, SummarizeRequest,
	SummarizerConfig, SummaryFormat, SummaryLength, SummaryType, TranslateRequest, WriteRequest, WritingConfig,
	WritingOptions,
};
use serde::de::DeserializeOwned;

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pagebridge")]
#[command(about = "Run AI capability calls through a loopback page bridge")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug, -vvv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Bridge configuration file (JSON)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Capability script for the simulated page (JSON)
	#[arg(long, global = true, value_name = "FILE")]
	pub script: Option<PathBuf>,

	/// Output format
	#[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Summarize text
	Summarize(SummarizeArgs),

	/// Prompt the language model
	Prompt(PromptArgs),

	/// Translate text between two languages
	Translate(TranslateArgs),

	/// Rewrite existing text
	Rewrite(WritingArgs),

	/// Write new text from a task description
	Write(WritingArgs),
}

impl Commands {
	pub fn call(&self) -> &CallArgs {
		match self {
			Commands::Summarize(args) => &args.call,
			Commands::Prompt(args) => &args.call,
			Commands::Translate(args) => &args.call,
			Commands::Rewrite(args) | Commands::Write(args) => &args.call,
		}
	}
}

/// Options every capability command accepts.
#[derive(Args, Debug, Clone, Default)]
pub struct CallArgs {
	/// Print chunks as they arrive
	#[arg(long)]
	pub stream: bool,

	/// Give up waiting for a reply after this many milliseconds
	#[arg(long, value_name = "MS")]
	pub timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct SummarizeArgs {
	pub text: String,

	/// Summary type (tldr, key-points, teaser, headline)
	#[arg(long = "type", value_parser = wire_value::<SummaryType>)]
	pub summary_type: Option<SummaryType>,

	/// Summary length (short, medium, long)
	#[arg(long, value_parser = wire_value::<SummaryLength>)]
	pub length: Option<SummaryLength>,

	/// Ask for markdown instead of plain text
	#[arg(long)]
	pub markdown: bool,

	/// Context shared by every summary of this session
	#[arg(long)]
	pub shared_context: Option<String>,

	/// Context for this summary only
	#[arg(long)]
	pub context: Option<String>,

	#[arg(long)]
	pub output_language: Option<String>,

	#[command(flatten)]
	pub call: CallArgs,
}

impl SummarizeArgs {
	pub fn request(&self) -> SummarizeRequest {
		SummarizeRequest {
			text: self.text.clone(),
			config: SummarizerConfig {
				shared_context: self.shared_context.clone(),
				summary_type: self.summary_type,
				format: self.markdown.then_some(SummaryFormat::Markdown),
				length: self.length,
				output_language: self.output_language.clone(),
				..Default::default()
			},
			options: self.context.clone().map(|context| SummarizeOptions { context: Some(context) }),
		}
	}
}

#[derive(Args, Debug)]
pub struct PromptArgs {
	pub text: String,

	/// System prompt the session starts with
	#[arg(long)]
	pub system: Option<String>,

	#[arg(long)]
	pub temperature: Option<f64>,

	#[arg(long)]
	pub top_k: Option<u32>,

	#[command(flatten)]
	pub call: CallArgs,
}

impl PromptArgs {
	pub fn request(&self) -> PromptRequest {
		let request = PromptRequest::new(self.text.clone());
		if self.system.is_none() && self.temperature.is_none() && self.top_k.is_none() {
			return request;
		}
		request.with_config(LanguageModelConfig {
			top_k: self.top_k,
			temperature: self.temperature,
			initial_prompts: self.system.clone().map(|content| {
				vec![InitialPrompt {
					role: PromptRole::System,
					content,
				}]
			}),
			..Default::default()
		})
	}
}

#[derive(Args, Debug)]
pub struct TranslateArgs {
	pub text: String,

	/// Source language (BCP 47)
	#[arg(long)]
	pub from: String,

	/// Target language (BCP 47)
	#[arg(long)]
	pub to: String,

	#[command(flatten)]
	pub call: CallArgs,
}

impl TranslateArgs {
	pub fn request(&self) -> TranslateRequest {
		TranslateRequest::new(self.text.clone(), self.from.clone(), self.to.clone())
	}
}

#[derive(Args, Debug)]
pub struct WritingArgs {
	pub text: String,

	/// Session tone, e.g. more-casual or formal
	#[arg(long)]
	pub tone: Option<String>,

	/// Context shared by every call of this session
	#[arg(long)]
	pub shared_context: Option<String>,

	/// Context for this call only
	#[arg(long)]
	pub context: Option<String>,

	#[arg(long)]
	pub output_language: Option<String>,

	#[command(flatten)]
	pub call: CallArgs,
}

impl WritingArgs {
	fn parts(&self) -> (Option<WritingConfig>, Option<WritingOptions>) {
		let config = WritingConfig {
			shared_context: self.shared_context.clone(),
			output_language: self.output_language.clone(),
			tone: self.tone.clone(),
			..Default::default()
		};
		let config = (config != WritingConfig::default()).then_some(config);
		let options = self.context.clone().map(|context| WritingOptions {
			context: Some(context),
			tone: None,
		});
		(config, options)
	}

	pub fn rewrite_request(&self) -> RewriteRequest {
		let (config, options) = self.parts();
		RewriteRequest {
			text: self.text.clone(),
			config,
			options,
		}
	}

	pub fn write_request(&self) -> WriteRequest {
		let (config, options) = self.parts();
		WriteRequest {
			text: self.text.clone(),
			config,
			options,
		}
	}
}

/// Parses a flag value with its wire name, e.g. `key-points`.
fn wire_value<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
	serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| format!("invalid value: {raw}"))
}

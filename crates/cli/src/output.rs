use std::io::Write;
use std::process::ExitCode;

use anyhow::Result;
use clap::ValueEnum;
use pagebridge_protocol::{Capability, OperationResult, SummaryOutput, TextOutput};
use serde::Serialize;

/// Output format for CLI results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	/// The success text, or a one-line reason on stderr
	#[default]
	Text,
	/// The operation result as JSON
	Json,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Text => write!(f, "text"),
			OutputFormat::Json => write!(f, "json"),
		}
	}
}

/// How a command ended, and the process status it maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
	Success,
	Failed,
	NotSupported,
	NoModelAvailable,
	Aborted,
}

impl Outcome {
	pub fn of<T>(result: &OperationResult<T>) -> Self {
		match result {
			OperationResult::Success(_) => Outcome::Success,
			OperationResult::NotSupported => Outcome::NotSupported,
			OperationResult::NoModelAvailable => Outcome::NoModelAvailable,
			OperationResult::Aborted => Outcome::Aborted,
			OperationResult::Error { .. } => Outcome::Failed,
		}
	}

	pub fn code(self) -> u8 {
		match self {
			Outcome::Success => 0,
			Outcome::Failed => 1,
			Outcome::NotSupported => 2,
			Outcome::NoModelAvailable => 3,
			Outcome::Aborted => 4,
		}
	}

	pub fn exit_code(self) -> ExitCode {
		ExitCode::from(self.code())
	}
}

/// Success data that carries one text field.
pub trait PrimaryText {
	fn primary_text(&self) -> &str;
}

impl PrimaryText for TextOutput {
	fn primary_text(&self) -> &str {
		&self.text
	}
}

impl PrimaryText for SummaryOutput {
	fn primary_text(&self) -> &str {
		&self.summary
	}
}

/// Writes results to stdout and failure reasons to stderr.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
	format: OutputFormat,
	capability: Capability,
}

impl Printer {
	pub fn new(format: OutputFormat, capability: Capability) -> Self {
		Self { format, capability }
	}

	/// Prints a completed result.
	pub fn result<T: Serialize + PrimaryText>(&self, result: &OperationResult<T>) -> Result<Outcome> {
		match self.format {
			OutputFormat::Json => println!("{}", serde_json::to_string(result)?),
			OutputFormat::Text => match result {
				OperationResult::Success(data) => println!("{}", data.primary_text()),
				other => eprintln!("{}", self.describe(other)),
			},
		}
		Ok(Outcome::of(result))
	}

	/// Prints one streamed chunk as it arrives. JSON output waits for the end.
	pub fn chunk(&self, text: &str) -> Result<()> {
		if self.format == OutputFormat::Text {
			let mut stdout = std::io::stdout().lock();
			stdout.write_all(text.as_bytes())?;
			stdout.flush()?;
		}
		Ok(())
	}

	/// Finishes a stream whose chunks were already printed.
	pub fn stream_finished<T: Serialize + PrimaryText>(&self, result: &OperationResult<T>) -> Result<Outcome> {
		match self.format {
			OutputFormat::Json => return self.result(result),
			OutputFormat::Text => {
				println!();
				if !result.is_success() {
					eprintln!("{}", self.describe(result));
				}
			}
		}
		Ok(Outcome::of(result))
	}

	fn describe<T>(&self, result: &OperationResult<T>) -> String {
		let capability = self.capability;
		match result {
			OperationResult::Success(_) => format!("{capability} succeeded"),
			OperationResult::NotSupported => format!("{capability} is not supported by this page"),
			OperationResult::NoModelAvailable => format!("no {capability} model is available"),
			OperationResult::Aborted => format!("{capability} request aborted"),
			OperationResult::Error { message } => format!("{capability} failed: {message}"),
		}
	}
}

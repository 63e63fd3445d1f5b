use std::process::ExitCode;

use clap::Parser;
use pagebridge_cli::{cli::Cli, commands, logging};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match commands::run(cli).await {
		Ok(outcome) => outcome.exit_code(),
		Err(err) => {
			error!(target = "pagebridge", error = %format!("{err:#}"), "command failed");
			ExitCode::FAILURE
		}
	}
}

//! Runs one capability call through a loopback bridge.
//!
//! The page realm is a dispatcher over the scripted provider; the content
//! realm is a correlator. Both share one in-process channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use pagebridge::{CapabilityClient, Dispatcher, Error};
use pagebridge_protocol::{CapabilityRequest, OperationResult};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::{Cli, Commands};
use crate::output::{Outcome, OutputFormat, Printer, PrimaryText};
use crate::settings;

pub async fn run(cli: Cli) -> Result<Outcome> {
	let mut config = settings::load_config(cli.config.as_deref())?;
	let provider = settings::load_provider(cli.script.as_deref())?;
	let call = cli.command.call().clone();
	if let Some(timeout_ms) = call.timeout_ms {
		config.request_timeout_ms = Some(timeout_ms);
	}
	debug!(target = "pagebridge", ?config, "bridge configured");

	let channel = config.channel();
	let page = Dispatcher::new(channel.clone(), Arc::new(provider)).spawn();
	let correlator = config.correlator(channel.clone());

	let signal = CancellationToken::new();
	let interrupt = {
		let signal = signal.clone();
		tokio::spawn(async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				info!(target = "pagebridge", "interrupted, aborting request");
				signal.cancel();
			}
		})
	};

	let invocation = Invocation {
		format: cli.format,
		stream: call.stream,
		signal: &signal,
	};
	let outcome = match &cli.command {
		Commands::Summarize(args) => invocation.invoke(correlator.summarizer(), &args.request()).await,
		Commands::Prompt(args) => invocation.invoke(correlator.language_model(), &args.request()).await,
		Commands::Translate(args) => invocation.invoke(correlator.translator(), &args.request()).await,
		Commands::Rewrite(args) => invocation.invoke(correlator.rewriter(), &args.rewrite_request()).await,
		Commands::Write(args) => invocation.invoke(correlator.writer(), &args.write_request()).await,
	};

	interrupt.abort();
	page.shutdown().await;
	channel.close();
	outcome
}

struct Invocation<'a> {
	format: OutputFormat,
	stream: bool,
	signal: &'a CancellationToken,
}

impl Invocation<'_> {
	async fn invoke<R>(&self, client: CapabilityClient<R>, request: &R) -> Result<Outcome>
	where
		R: CapabilityRequest,
		R::Output: Serialize + PrimaryText,
	{
		let printer = Printer::new(self.format, client.capability());
		if !self.stream {
			let result = client
				.call(request, self.signal)
				.await
				.with_context(|| format!("{} call failed", client.capability()))?;
			return printer.result(&result);
		}

		let mut relay = match client
			.stream(request, self.signal)
			.await
			.with_context(|| format!("{} stream failed to start", client.capability()))?
		{
			OperationResult::Success(relay) => relay,
			other => return printer.result(&other.map(|_| R::output(String::new()))),
		};

		let mut text = String::new();
		let mut ended = None;
		while let Some(item) = relay.next().await {
			match item {
				Ok(chunk) => {
					printer.chunk(&chunk)?;
					text.push_str(&chunk);
				}
				Err(Error::Stream { message, .. }) => {
					ended = Some(OperationResult::Error { message });
					break;
				}
				Err(Error::Aborted { .. }) => {
					ended = Some(OperationResult::Aborted);
					break;
				}
				Err(err) => return Err(err).context("stream interrupted"),
			}
		}

		let result = ended.unwrap_or_else(|| OperationResult::Success(R::output(text)));
		printer.stream_finished(&result)
	}
}

//! In-memory capability provider driven by a JSON script.
//!
//! Stands in for the page's capability objects in tests and in the loopback
//! CLI. Every probe, creation, teardown and run is recorded so callers can
//! assert on ordering.
//!
//! ```json
//! {
//!   "capabilities": {
//!     "Writer": { "reply": { "text": "Once upon a time" }, "delayMs": 20 },
//!     "Translator": { "availability": "unavailable" },
//!     "Rewriter": { "chunks": ["a", "b"], "failStreamAfter": 1 }
//!   }
//! }
//! ```
//!
//! Capabilities missing from `capabilities` are not exposed at all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use pagebridge_protocol::{Capability, ModelAvailability, ModelConfig, RunOptions};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::host::{
	AvailabilityOptions, CapabilityProvider, CreateOptions, HostError, ModelFactory, ModelSession, TextStream,
};

/// What a scripted run answers with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScriptedReply {
	/// Returns the input unchanged.
	#[default]
	Echo,
	Text(String),
	Error(String),
}

/// Behaviour of one scripted capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilityScript {
	/// Probe answer; `available` when unset.
	pub availability: Option<ModelAvailability>,
	pub probe_error: Option<String>,
	pub create_error: Option<String>,
	pub destroy_error: Option<String>,
	pub reply: ScriptedReply,
	/// Streamed chunks; the reply split after each space when unset.
	pub chunks: Option<Vec<String>>,
	/// Fails the stream after this many chunks.
	pub fail_stream_after: Option<usize>,
	/// Delay before a run answers and before every chunk.
	pub delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
	#[serde(default)]
	pub capabilities: HashMap<Capability, CapabilityScript>,
}

/// One recorded interaction with the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
	Probed(Capability),
	Created(Capability, ModelConfig),
	/// A download monitor was attached to a creation.
	Downloaded(Capability),
	Destroyed(Capability),
	Ran(Capability, String),
	Streamed(Capability, String),
}

type EventLog = Arc<Mutex<Vec<ScriptEvent>>>;

/// Scripted [`CapabilityProvider`].
#[derive(Clone)]
pub struct ScriptedProvider {
	factories: HashMap<Capability, Arc<ScriptedFactory>>,
	events: EventLog,
}

impl ScriptedProvider {
	/// Exposes every capability, each available and echoing its input.
	pub fn echo() -> Self {
		let capabilities = Capability::ALL
			.into_iter()
			.map(|capability| (capability, CapabilityScript::default()))
			.collect();
		Self::from_script(Script { capabilities })
	}

	pub fn from_script(script: Script) -> Self {
		let events = EventLog::default();
		let factories = script
			.capabilities
			.into_iter()
			.map(|(capability, script)| {
				let factory = ScriptedFactory {
					capability,
					script: Arc::new(script),
					events: Arc::clone(&events),
				};
				(capability, Arc::new(factory))
			})
			.collect();
		Self { factories, events }
	}

	pub fn from_json(json: &str) -> serde_json::Result<Self> {
		Ok(Self::from_script(serde_json::from_str(json)?))
	}

	/// Everything recorded so far, oldest first.
	pub fn events(&self) -> Vec<ScriptEvent> {
		self.events.lock().clone()
	}

	/// Number of recorded events matching `predicate`.
	pub fn count(&self, predicate: impl Fn(&ScriptEvent) -> bool) -> usize {
		self.events.lock().iter().filter(|event| predicate(event)).count()
	}
}

impl Default for ScriptedProvider {
	fn default() -> Self {
		Self::echo()
	}
}

impl CapabilityProvider for ScriptedProvider {
	fn factory(&self, capability: Capability) -> Option<Arc<dyn ModelFactory>> {
		let factory = self.factories.get(&capability)?;
		Some(Arc::clone(factory) as Arc<dyn ModelFactory>)
	}
}

impl std::fmt::Debug for ScriptedProvider {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut capabilities: Vec<_> = self.factories.keys().collect();
		capabilities.sort();
		f.debug_struct("ScriptedProvider")
			.field("capabilities", &capabilities)
			.finish()
	}
}

struct ScriptedFactory {
	capability: Capability,
	script: Arc<CapabilityScript>,
	events: EventLog,
}

#[async_trait]
impl ModelFactory for ScriptedFactory {
	async fn availability(&self, _options: &AvailabilityOptions) -> Result<ModelAvailability, HostError> {
		self.events.lock().push(ScriptEvent::Probed(self.capability));
		if let Some(message) = &self.script.probe_error {
			return Err(HostError::new(message.clone()));
		}
		Ok(self.script.availability.unwrap_or(ModelAvailability::Available))
	}

	async fn create(&self, options: CreateOptions) -> Result<Arc<dyn ModelSession>, HostError> {
		if let Some(monitor) = &options.monitor {
			self.events.lock().push(ScriptEvent::Downloaded(self.capability));
			monitor.progress(0.0);
			monitor.progress(1.0);
		}
		if let Some(message) = &self.script.create_error {
			return Err(HostError::new(message.clone()));
		}
		self.events.lock().push(ScriptEvent::Created(self.capability, options.config));
		Ok(Arc::new(ScriptedSession {
			capability: self.capability,
			script: Arc::clone(&self.script),
			events: Arc::clone(&self.events),
		}))
	}
}

struct ScriptedSession {
	capability: Capability,
	script: Arc<CapabilityScript>,
	events: EventLog,
}

impl ScriptedSession {
	fn reply(&self, input: &str) -> Result<String, HostError> {
		match &self.script.reply {
			ScriptedReply::Echo => Ok(input.to_string()),
			ScriptedReply::Text(text) => Ok(text.clone()),
			ScriptedReply::Error(message) => Err(HostError::new(message.clone())),
		}
	}

	fn delay(&self) -> Option<Duration> {
		self.script.delay_ms.map(Duration::from_millis)
	}
}

/// Sleeps for `delay`, failing early if `signal` fires.
async fn pause(delay: Option<Duration>, signal: &CancellationToken) -> Result<(), HostError> {
	let Some(delay) = delay else {
		return Ok(());
	};
	tokio::select! {
		_ = tokio::time::sleep(delay) => Ok(()),
		_ = signal.cancelled() => Err(HostError::new("operation aborted")),
	}
}

#[async_trait]
impl ModelSession for ScriptedSession {
	async fn run(&self, input: &str, _options: &RunOptions, signal: &CancellationToken) -> Result<String, HostError> {
		self.events.lock().push(ScriptEvent::Ran(self.capability, input.to_string()));
		pause(self.delay(), signal).await?;
		self.reply(input)
	}

	async fn run_streaming(
		&self,
		input: &str,
		_options: &RunOptions,
		signal: &CancellationToken,
	) -> Result<TextStream, HostError> {
		self.events.lock().push(ScriptEvent::Streamed(self.capability, input.to_string()));
		let chunks = match &self.script.chunks {
			Some(chunks) => chunks.clone(),
			None => self.reply(input)?.split_inclusive(' ').map(str::to_string).collect(),
		};
		let fail_after = self.script.fail_stream_after;
		let delay = self.delay();
		let signal = signal.clone();

		let items = chunks.into_iter().enumerate().map(move |(index, chunk)| match fail_after {
			Some(limit) if index >= limit => Err(HostError::new("stream failed")),
			_ => Ok(chunk),
		});
		let stream = stream::iter(items)
			.then(move |item| {
				let signal = signal.clone();
				async move {
					pause(delay, &signal).await?;
					item
				}
			})
			.scan(false, |failed, item| {
				if *failed {
					return futures_util::future::ready(None);
				}
				*failed = item.is_err();
				futures_util::future::ready(Some(item))
			});
		Ok(stream.boxed())
	}

	async fn destroy(&self) -> Result<(), HostError> {
		self.events.lock().push(ScriptEvent::Destroyed(self.capability));
		match &self.script.destroy_error {
			Some(message) => Err(HostError::new(message.clone())),
			None => Ok(()),
		}
	}
}

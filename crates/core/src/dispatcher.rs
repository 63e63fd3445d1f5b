//! Page-realm dispatch loop.
//!
//! A single subscriber validates every broadcast against the inbound
//! request shapes, runs each accepted request in its own task and posts the
//! result under the same `requestId`. Streaming requests post their setup
//! result, then one chunk per item, then exactly one terminal chunk.
//!
//! Every request task is tracked, so shutdown can wait for them before it
//! destroys sessions.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use pagebridge_protocol::{
	Capability, CapabilityRequest, Envelope, EnvelopeHeader, Inbound, InboundMessage, MessageKind, OperationResult,
	Phase, Reply, RequestId, StreamChunk, StreamReady,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::channel::{Channel, Subscription};
use crate::executor::OperationExecutor;
use crate::host::{CapabilityProvider, TextStream};

type RequestKey = (Capability, RequestId);

/// Cancellation tokens of running requests.
///
/// Ids are only unique per correlator, so one key may hold several entries
/// when more than one correlator shares the channel. Each entry carries a
/// dispatcher-local serial so a finished task removes only its own token.
#[derive(Default)]
struct InFlight {
	next_serial: u64,
	entries: HashMap<RequestKey, Vec<(u64, CancellationToken)>>,
}

impl InFlight {
	fn insert(&mut self, key: RequestKey, signal: CancellationToken) -> u64 {
		self.next_serial += 1;
		let serial = self.next_serial;
		self.entries.entry(key).or_default().push((serial, signal));
		serial
	}

	fn remove(&mut self, key: RequestKey, serial: u64) {
		if let Some(tokens) = self.entries.get_mut(&key) {
			tokens.retain(|(entry, _)| *entry != serial);
			if tokens.is_empty() {
				self.entries.remove(&key);
			}
		}
	}

	/// Cancels every request under `key`. The wire cannot tell them apart.
	fn cancel(&self, key: &RequestKey) -> usize {
		let tokens = self.entries.get(key).map(Vec::as_slice).unwrap_or_default();
		for (_, signal) in tokens {
			signal.cancel();
		}
		tokens.len()
	}

	fn len(&self) -> usize {
		self.entries.values().map(Vec::len).sum()
	}

	fn drain(&mut self) -> Vec<CancellationToken> {
		self.entries
			.drain()
			.flat_map(|(_, tokens)| tokens.into_iter().map(|(_, signal)| signal))
			.collect()
	}
}

/// Routes inbound envelopes to per-capability executors.
pub struct Dispatcher {
	channel: Channel,
	executors: HashMap<Capability, Arc<OperationExecutor>>,
	in_flight: Mutex<InFlight>,
	tasks: Mutex<JoinSet<()>>,
}

impl Dispatcher {
	/// Registers an executor for every capability over `provider`.
	pub fn new(channel: Channel, provider: Arc<dyn CapabilityProvider>) -> Self {
		let executors = Capability::ALL
			.into_iter()
			.map(|capability| {
				let executor = OperationExecutor::new(capability, Arc::clone(&provider));
				(capability, Arc::new(executor))
			})
			.collect();
		Self {
			channel,
			executors,
			in_flight: Mutex::new(InFlight::default()),
			tasks: Mutex::new(JoinSet::new()),
		}
	}

	pub fn executor(&self, capability: Capability) -> Option<&Arc<OperationExecutor>> {
		self.executors.get(&capability)
	}

	/// Number of requests currently being served.
	pub fn in_flight(&self) -> usize {
		self.in_flight.lock().len()
	}

	/// Starts the dispatch loop on the current runtime.
	///
	/// The subscription is registered before this returns, so requests posted
	/// right after are never missed.
	pub fn spawn(self) -> DispatcherHandle {
		let subscription = self.channel.subscribe();
		let dispatcher = Arc::new(self);
		let task = tokio::spawn(Arc::clone(&dispatcher).run(subscription));
		DispatcherHandle { dispatcher, task }
	}

	async fn run(self: Arc<Self>, mut subscription: Subscription) {
		debug!(target = "pagebridge.dispatch", "dispatcher started");
		while let Some(message) = subscription.recv().await {
			match InboundMessage::parse(&message) {
				Some(inbound) => self.dispatch(inbound),
				None => trace!(target = "pagebridge.dispatch", "ignoring broadcast"),
			}
		}
		debug!(target = "pagebridge.dispatch", "channel closed, dispatcher stopped");
	}

	fn dispatch(self: &Arc<Self>, message: InboundMessage) {
		match message {
			InboundMessage::Summarize(inbound) => self.start(inbound),
			InboundMessage::Prompt(inbound) => self.start(inbound),
			InboundMessage::Translate(inbound) => self.start(inbound),
			InboundMessage::Rewrite(inbound) => self.start(inbound),
			InboundMessage::Write(inbound) => self.start(inbound),
			InboundMessage::Abort(header) => self.abort(header),
		}
	}

	fn abort(&self, header: EnvelopeHeader) {
		let key = (header.kind.capability, header.request_id);
		match self.in_flight.lock().cancel(&key) {
			0 => trace!(target = "pagebridge.dispatch", request_id = %header.request_id, "abort for unknown request"),
			cancelled => {
				debug!(target = "pagebridge.dispatch", kind = %header.kind, request_id = %header.request_id, cancelled, "aborting request");
			}
		}
	}

	fn start<R: CapabilityRequest>(self: &Arc<Self>, inbound: Inbound<R>) {
		let key = (R::CAPABILITY, inbound.request_id);
		let signal = CancellationToken::new();
		let serial = self.in_flight.lock().insert(key, signal.clone());
		debug!(
			target = "pagebridge.dispatch",
			capability = %R::CAPABILITY,
			request_id = %inbound.request_id,
			streaming = inbound.streaming,
			"request accepted"
		);

		let dispatcher = Arc::clone(self);
		let mut tasks = self.tasks.lock();
		while tasks.try_join_next().is_some() {}
		tasks.spawn(async move {
			if inbound.streaming {
				dispatcher.serve_streaming(&inbound, &signal).await;
			} else {
				dispatcher.serve(&inbound, &signal).await;
			}
			dispatcher.in_flight.lock().remove(key, serial);
		});
	}

	async fn serve<R: CapabilityRequest>(&self, inbound: &Inbound<R>, signal: &CancellationToken) {
		let kind = MessageKind::new(R::CAPABILITY, Phase::Result);
		let result = match self.executors.get(&R::CAPABILITY) {
			Some(executor) => executor.execute(&inbound.request, signal).await,
			None => OperationResult::NotSupported,
		};
		self.reply(kind, inbound.request_id, &result);
	}

	async fn serve_streaming<R: CapabilityRequest>(&self, inbound: &Inbound<R>, signal: &CancellationToken) {
		let setup_kind = MessageKind::new(R::CAPABILITY, Phase::StreamingSetupResult);
		let request_id = inbound.request_id;
		let setup = match self.executors.get(&R::CAPABILITY) {
			Some(executor) => executor.execute_streaming(&inbound.request, signal).await,
			None => OperationResult::NotSupported,
		};

		let stream = match setup {
			OperationResult::Success(stream) => {
				self.reply(setup_kind, request_id, &OperationResult::Success(StreamReady {}));
				stream
			}
			other => {
				self.reply(setup_kind, request_id, &other.map(|_| StreamReady {}));
				return;
			}
		};

		let mut terminal = TerminalChunk {
			channel: &self.channel,
			kind: setup_kind.with_phase(Phase::StreamingResult),
			request_id,
			error: None,
		};
		relay_chunks(stream, &mut terminal, signal).await;
	}

	fn reply<T: Serialize>(&self, kind: MessageKind, request_id: RequestId, result: &T) {
		let envelope = Envelope::new(kind, request_id, Reply { result });
		if let Err(err) = self.channel.post_envelope(&envelope) {
			error!(target = "pagebridge.dispatch", %kind, %request_id, error = %err, "failed to post result");
		}
	}
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher")
			.field("channel", &self.channel)
			.field("in_flight", &self.in_flight())
			.finish_non_exhaustive()
	}
}

async fn relay_chunks(mut stream: TextStream, terminal: &mut TerminalChunk<'_>, signal: &CancellationToken) {
	let request_id = terminal.request_id;
	loop {
		let item = tokio::select! {
			biased;
			_ = signal.cancelled() => {
				debug!(target = "pagebridge.dispatch", %request_id, "stream aborted");
				return;
			}
			item = stream.next() => item,
		};
		match item {
			Some(Ok(text)) => terminal.post(StreamChunk::text(text)),
			Some(Err(_)) if signal.is_cancelled() => return,
			Some(Err(err)) => {
				error!(target = "pagebridge.dispatch", %request_id, error = %err, "stream failed");
				terminal.error = Some(err.message);
				return;
			}
			None => return,
		}
	}
}

/// Posts the terminal chunk when dropped, whichever way the stream ended.
struct TerminalChunk<'a> {
	channel: &'a Channel,
	kind: MessageKind,
	request_id: RequestId,
	error: Option<String>,
}

impl TerminalChunk<'_> {
	fn post(&self, chunk: StreamChunk) {
		let envelope = Envelope::new(self.kind, self.request_id, Reply { result: chunk });
		if let Err(err) = self.channel.post_envelope(&envelope) {
			error!(target = "pagebridge.dispatch", request_id = %self.request_id, error = %err, "failed to post chunk");
		}
	}
}

impl Drop for TerminalChunk<'_> {
	fn drop(&mut self) {
		let chunk = match self.error.take() {
			Some(message) => StreamChunk::failed(message),
			None => StreamChunk::done(),
		};
		self.post(chunk);
	}
}

/// A running dispatcher.
pub struct DispatcherHandle {
	dispatcher: Arc<Dispatcher>,
	task: JoinHandle<()>,
}

impl DispatcherHandle {
	pub fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Returns `true` once the loop has exited, e.g. after the channel closed.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	/// Stops the loop, cancels every in-flight request, waits for the request
	/// tasks to finish and then destroys every cached session.
	///
	/// Waiting relies on host collaborators returning once their token fires.
	pub async fn shutdown(self) {
		self.task.abort();
		match self.task.await {
			Err(err) if !err.is_cancelled() => {
				error!(target = "pagebridge.dispatch", error = %err, "dispatcher task failed");
			}
			_ => {}
		}

		let in_flight = self.dispatcher.in_flight.lock().drain();
		for signal in in_flight {
			signal.cancel();
		}
		let mut tasks = std::mem::take(&mut *self.dispatcher.tasks.lock());
		while let Some(joined) = tasks.join_next().await {
			match joined {
				Err(err) if err.is_panic() => {
					error!(target = "pagebridge.dispatch", error = %err, "request task panicked");
				}
				_ => {}
			}
		}
		for executor in self.dispatcher.executors.values() {
			executor.destroy().await;
		}
		debug!(target = "pagebridge.dispatch", "dispatcher shut down");
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use async_trait::async_trait;
	use pagebridge_protocol::{ModelAvailability, RunOptions};
	use serde_json::{Value, json};
	use tokio::sync::Notify;

	use super::*;
	use crate::host::{AvailabilityOptions, CapabilityRegistry, CreateOptions, HostError, ModelFactory, ModelSession};
	use crate::scripted::{CapabilityScript, Script, ScriptEvent, ScriptedProvider};

	/// Probes slowly and counts the sessions it creates and destroys.
	#[derive(Default)]
	struct SlowProbe {
		probing: Notify,
		created: AtomicUsize,
		destroyed: Arc<AtomicUsize>,
	}

	struct CountedSession {
		destroyed: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl ModelFactory for SlowProbe {
		async fn availability(&self, _: &AvailabilityOptions) -> Result<ModelAvailability, HostError> {
			self.probing.notify_one();
			tokio::time::sleep(Duration::from_millis(100)).await;
			Ok(ModelAvailability::Available)
		}

		async fn create(&self, _: CreateOptions) -> Result<Arc<dyn ModelSession>, HostError> {
			self.created.fetch_add(1, Ordering::SeqCst);
			Ok(Arc::new(CountedSession {
				destroyed: Arc::clone(&self.destroyed),
			}))
		}
	}

	#[async_trait]
	impl ModelSession for CountedSession {
		async fn run(&self, input: &str, _: &RunOptions, _: &CancellationToken) -> Result<String, HostError> {
			Ok(input.to_string())
		}

		async fn run_streaming(&self, _: &str, _: &RunOptions, _: &CancellationToken) -> Result<TextStream, HostError> {
			Err(HostError::new("not streaming"))
		}

		async fn destroy(&self) -> Result<(), HostError> {
			self.destroyed.fetch_add(1, Ordering::SeqCst);
			Ok(())
		}
	}

	async fn next_of_kind(subscription: &mut Subscription, kind: &str) -> Value {
		loop {
			let message = subscription.recv().await.unwrap();
			if message["kind"] == kind {
				return message;
			}
		}
	}

	#[tokio::test]
	async fn answers_with_same_request_id() {
		let channel = Channel::new(32);
		let mut client = channel.subscribe();
		let handle = Dispatcher::new(channel.clone(), Arc::new(ScriptedProvider::echo())).spawn();

		channel.post(json!({"kind": "PROMPT", "requestId": 9, "text": "hi"}));

		let reply = next_of_kind(&mut client, "PROMPT_RESULT").await;
		assert_eq!(reply["requestId"], 9);
		assert_eq!(reply["result"], json!({"kind": "success", "text": "hi"}));
		handle.shutdown().await;
	}

	#[tokio::test]
	async fn invalid_payloads_get_no_reply() {
		let channel = Channel::new(32);
		let mut client = channel.subscribe();
		let handle = Dispatcher::new(channel.clone(), Arc::new(ScriptedProvider::echo())).spawn();

		channel.post(json!({"kind": "TRANSLATE", "requestId": 1, "text": "no config"}));
		channel.post(json!({"kind": "PROMPT", "requestId": 2, "text": "valid"}));

		let reply = next_of_kind(&mut client, "PROMPT_RESULT").await;
		assert_eq!(reply["requestId"], 2);
		handle.shutdown().await;

		channel.close();
		while let Some(message) = client.recv().await {
			assert_ne!(message["kind"], "TRANSLATE_RESULT");
		}
	}

	#[tokio::test]
	async fn streaming_sends_setup_chunks_and_terminal() {
		let channel = Channel::new(32);
		let mut client = channel.subscribe();
		let handle = Dispatcher::new(channel.clone(), Arc::new(ScriptedProvider::echo())).spawn();

		channel.post(json!({"kind": "WRITE_STREAMING", "requestId": 3, "text": "a b"}));

		let setup = next_of_kind(&mut client, "WRITE_STREAMING_SETUP_RESULT").await;
		assert_eq!(setup["result"], json!({"kind": "success"}));
		let mut chunks = Vec::new();
		loop {
			let chunk = next_of_kind(&mut client, "WRITE_STREAMING_RESULT").await;
			chunks.push(chunk["result"].clone());
			if chunk["result"]["done"] == true {
				break;
			}
		}
		assert_eq!(
			chunks,
			[
				json!({"text": "a ", "done": false}),
				json!({"text": "b", "done": false}),
				json!({"text": "", "done": true}),
			]
		);
		handle.shutdown().await;
	}

	#[tokio::test]
	async fn abort_cancels_in_flight_request() {
		let channel = Channel::new(32);
		let mut client = channel.subscribe();
		let provider = ScriptedProvider::from_script(Script {
			capabilities: HashMap::from([(
				Capability::Summarizer,
				CapabilityScript {
					delay_ms: Some(60_000),
					..Default::default()
				},
			)]),
		});
		let handle = Dispatcher::new(channel.clone(), Arc::new(provider.clone())).spawn();

		channel.post(json!({"kind": "SUMMARIZE", "requestId": 5, "text": "long"}));
		while provider.count(|event| matches!(event, ScriptEvent::Ran(..))) == 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		channel.post(json!({"kind": "SUMMARIZE_ABORT", "requestId": 5}));

		let reply = next_of_kind(&mut client, "SUMMARIZE_RESULT").await;
		assert_eq!(reply["result"], json!({"kind": "aborted"}));
		handle.shutdown().await;
	}

	#[tokio::test]
	async fn shutdown_destroys_sessions() {
		let channel = Channel::new(32);
		let mut client = channel.subscribe();
		let provider = ScriptedProvider::echo();
		let handle = Dispatcher::new(channel.clone(), Arc::new(provider.clone())).spawn();

		channel.post(json!({"kind": "REWRITE", "requestId": 1, "text": "draft"}));
		next_of_kind(&mut client, "REWRITE_RESULT").await;

		handle.shutdown().await;
		assert_eq!(provider.count(|event| *event == ScriptEvent::Destroyed(Capability::Rewriter)), 1);
	}

	#[tokio::test]
	async fn loop_ends_when_channel_closes() {
		let channel = Channel::new(4);
		let handle = Dispatcher::new(channel.clone(), Arc::new(ScriptedProvider::echo())).spawn();
		channel.close();
		while !handle.is_finished() {
			tokio::task::yield_now().await;
		}
		handle.shutdown().await;
	}

	#[tokio::test]
	async fn shutdown_during_probe_leaves_no_session_behind() {
		let channel = Channel::new(32);
		let factory = Arc::new(SlowProbe::default());
		let registry = CapabilityRegistry::new().with(Capability::Writer, Arc::clone(&factory) as Arc<dyn ModelFactory>);
		let handle = Dispatcher::new(channel.clone(), Arc::new(registry)).spawn();
		let executor = Arc::clone(handle.dispatcher().executor(Capability::Writer).unwrap());

		channel.post(json!({"kind": "WRITE", "requestId": 1, "text": "poem"}));
		factory.probing.notified().await;
		handle.shutdown().await;
		tokio::time::sleep(Duration::from_millis(200)).await;

		assert_eq!(factory.created.load(Ordering::SeqCst), factory.destroyed.load(Ordering::SeqCst));
		assert!(executor.sessions().fingerprint().await.is_none());
	}

	#[test]
	fn finished_request_keeps_tokens_of_same_id() {
		let key = (Capability::Summarizer, RequestId::after(0));
		let first = CancellationToken::new();
		let second = CancellationToken::new();
		let mut in_flight = InFlight::default();

		let first_serial = in_flight.insert(key, first.clone());
		in_flight.insert(key, second.clone());
		in_flight.remove(key, first_serial);

		assert_eq!(in_flight.len(), 1);
		assert_eq!(in_flight.cancel(&key), 1);
		assert!(second.is_cancelled());
		assert!(!first.is_cancelled());
	}
}

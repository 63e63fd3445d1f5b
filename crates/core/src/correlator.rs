//! Request/response correlation over the shared channel.
//!
//! Every call allocates the next id from a per-correlator counter, subscribes
//! to the channel, posts the request and waits for the first envelope whose
//! kind and `requestId` match. Other broadcasts on the bus, including replies
//! to concurrent calls, are skipped by that waiter and seen by their own.
//!
//! # Message Flow
//!
//! 1. `call` allocates an id and subscribes before posting, so a reply can
//!    never arrive before its waiter exists
//! 2. The request envelope is posted exactly once
//! 3. The waiter resolves on the matching `<OP>_RESULT`
//! 4. The subscription is dropped, unregistering the waiter
//!
//! If the caller's token fires or the configured timeout elapses first, an
//! `<OP>_ABORT` envelope is posted so the page realm can stop its work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pagebridge_protocol::{
	CapabilityRequest, Envelope, EnvelopeHeader, MessageKind, OperationResult, Phase, PromptRequest, Reply, RequestId,
	RewriteRequest, StreamReady, SummarizeRequest, TranslateRequest, WriteRequest,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::channel::{Channel, Subscription};
use crate::client::CapabilityClient;
use crate::error::{Error, Result};
use crate::stream::StreamRelay;

/// Client-side correlation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatorConfig {
	/// Upper bound on the wait for one reply. `None` waits until the reply,
	/// the caller's token, or channel teardown.
	pub request_timeout: Option<Duration>,
}

/// The content realm's end of the bridge.
///
/// Cloning shares the id counter, so ids stay unique across clones.
#[derive(Clone)]
pub struct Correlator {
	inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
	channel: Channel,
	last_id: AtomicU64,
	config: CorrelatorConfig,
}

impl Correlator {
	pub fn new(channel: Channel) -> Self {
		Self::with_config(channel, CorrelatorConfig::default())
	}

	pub fn with_config(channel: Channel, config: CorrelatorConfig) -> Self {
		Self {
			inner: Arc::new(CorrelatorInner {
				channel,
				last_id: AtomicU64::new(0),
				config,
			}),
		}
	}

	pub fn channel(&self) -> &Channel {
		&self.inner.channel
	}

	pub fn config(&self) -> &CorrelatorConfig {
		&self.inner.config
	}

	fn next_id(&self) -> RequestId {
		RequestId::after(self.inner.last_id.fetch_add(1, Ordering::Relaxed))
	}

	/// Posts `body` under `kind` and waits for the `reply` phase envelope with
	/// the same id whose `result` deserializes as `T`.
	///
	/// Returns the allocated id with the result. Fails only if the channel
	/// closes, the timeout elapses, or `signal` fires; none of these are
	/// capability failures.
	pub async fn send<B, T>(
		&self,
		kind: MessageKind,
		body: &B,
		reply: Phase,
		signal: &CancellationToken,
	) -> Result<(RequestId, T)>
	where
		B: Serialize,
		T: DeserializeOwned,
	{
		let request_id = self.next_id();
		if signal.is_cancelled() {
			return Err(Error::Aborted { request_id });
		}

		let subscription = self.channel().subscribe();
		self.channel().post_envelope(&Envelope::new(kind, request_id, body))?;
		debug!(target = "pagebridge.correlator", %kind, %request_id, "request posted");

		let result = self.settle(subscription, kind, reply, request_id, signal).await?;
		Ok((request_id, result))
	}

	/// Runs one request/response operation.
	pub async fn call<R: CapabilityRequest>(
		&self,
		request: &R,
		signal: &CancellationToken,
	) -> Result<(RequestId, OperationResult<R::Output>)> {
		self.send(MessageKind::new(R::CAPABILITY, Phase::Request), request, Phase::Result, signal)
			.await
	}

	/// Starts a streaming operation.
	///
	/// Waits for the setup result and, on success, hands back a relay over the
	/// chunks. The chunk subscription exists before the request is posted, so
	/// chunks sent right after setup are never missed.
	pub async fn call_streaming<R: CapabilityRequest>(
		&self,
		request: &R,
		signal: &CancellationToken,
	) -> Result<(RequestId, OperationResult<StreamRelay>)> {
		let kind = MessageKind::new(R::CAPABILITY, Phase::StreamingRequest);
		let request_id = self.next_id();
		if signal.is_cancelled() {
			return Err(Error::Aborted { request_id });
		}

		let chunks = self.channel().subscribe();
		let setup = self.channel().subscribe();
		self.channel().post_envelope(&Envelope::new(kind, request_id, request))?;
		debug!(target = "pagebridge.correlator", %kind, %request_id, "streaming request posted");

		let ready: OperationResult<StreamReady> = self
			.settle(setup, kind, Phase::StreamingSetupResult, request_id, signal)
			.await?;
		let relay = ready.map(|StreamReady {}| StreamRelay::new(self.channel().clone(), kind, request_id, chunks, signal));
		Ok((request_id, relay))
	}

	/// Tells the page realm to stop working on `request_id`.
	pub fn abort(&self, kind: MessageKind, request_id: RequestId) {
		post_abort(self.channel(), kind, request_id);
	}

	pub fn client<R: CapabilityRequest>(&self) -> CapabilityClient<R> {
		CapabilityClient::new(self.clone())
	}

	pub fn summarizer(&self) -> CapabilityClient<SummarizeRequest> {
		self.client()
	}

	pub fn language_model(&self) -> CapabilityClient<PromptRequest> {
		self.client()
	}

	pub fn translator(&self) -> CapabilityClient<TranslateRequest> {
		self.client()
	}

	pub fn rewriter(&self) -> CapabilityClient<RewriteRequest> {
		self.client()
	}

	pub fn writer(&self) -> CapabilityClient<WriteRequest> {
		self.client()
	}

	async fn settle<T: DeserializeOwned>(
		&self,
		mut subscription: Subscription,
		kind: MessageKind,
		reply: Phase,
		request_id: RequestId,
		signal: &CancellationToken,
	) -> Result<T> {
		let reply_kind = kind.with_phase(reply);
		let response = async {
			while let Some(message) = subscription.recv().await {
				if let Some(result) = Reply::<T>::matching(&message, reply_kind, request_id) {
					return Ok(result);
				}
				trace!(target = "pagebridge.correlator", %request_id, "ignoring unrelated envelope");
			}
			Err(Error::ChannelClosed)
		};
		let timeout = self.inner.config.request_timeout;
		let deadline = async {
			match timeout {
				Some(duration) => tokio::time::sleep(duration).await,
				None => std::future::pending().await,
			}
		};

		tokio::select! {
			biased;
			result = response => result,
			_ = signal.cancelled() => {
				debug!(target = "pagebridge.correlator", %kind, %request_id, "request cancelled by caller");
				self.abort(kind, request_id);
				Err(Error::Aborted { request_id })
			}
			_ = deadline => {
				debug!(target = "pagebridge.correlator", %kind, %request_id, "request timed out");
				self.abort(kind, request_id);
				Err(Error::Timeout {
					request_id,
					timeout: timeout.unwrap_or_default(),
				})
			}
		}
	}
}

impl std::fmt::Debug for Correlator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Correlator")
			.field("last_id", &self.inner.last_id.load(Ordering::Relaxed))
			.field("config", &self.inner.config)
			.finish()
	}
}

pub(crate) fn post_abort(channel: &Channel, kind: MessageKind, request_id: RequestId) {
	let header = EnvelopeHeader {
		kind: kind.with_phase(Phase::Abort),
		request_id,
	};
	if let Err(err) = channel.post_envelope(&header) {
		debug!(target = "pagebridge.correlator", %request_id, error = %err, "failed to post abort");
	}
}

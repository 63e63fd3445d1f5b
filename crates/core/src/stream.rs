//! Client-side relay for `<OP>_STREAMING_RESULT` chunks.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::{Stream, StreamExt};
use pagebridge_protocol::{MessageKind, Phase, Reply, RequestId, StreamChunk};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, Subscription};
use crate::correlator::post_abort;
use crate::error::{Error, Result};

/// Chunks of one streaming operation, in arrival order.
///
/// The relay ends when the page realm sends the terminal chunk. It is not
/// restartable: once it has ended, every further poll yields `None`.
///
/// Errors are always the last item:
/// * [`Error::Stream`] when the terminal chunk reports a failure
/// * [`Error::Aborted`] when the caller's token fires mid-stream
/// * [`Error::Lagged`] when the subscription fell behind the channel. The
///   lost envelopes cannot be inspected, so lag caused by unrelated traffic
///   ends the relay too
/// * [`Error::ChannelClosed`] when the channel is torn down first
///
/// Dropping an unfinished relay asks the page realm to stop producing.
pub struct StreamRelay {
	channel: Channel,
	kind: MessageKind,
	request_id: RequestId,
	subscription: Option<Subscription>,
	cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl StreamRelay {
	pub(crate) fn new(
		channel: Channel,
		kind: MessageKind,
		request_id: RequestId,
		subscription: Subscription,
		signal: &CancellationToken,
	) -> Self {
		Self {
			channel,
			kind,
			request_id,
			subscription: Some(subscription),
			cancelled: Box::pin(signal.clone().cancelled_owned()),
		}
	}

	pub fn request_id(&self) -> RequestId {
		self.request_id
	}

	/// Returns `true` once the relay has yielded its last item.
	pub fn is_finished(&self) -> bool {
		self.subscription.is_none()
	}

	/// Stops the stream and asks the page realm to stop producing.
	pub fn abort(&mut self) {
		if self.subscription.take().is_some() {
			post_abort(&self.channel, self.kind, self.request_id);
		}
	}

	/// Drains the remaining chunks into one string.
	pub async fn collect_text(mut self) -> Result<String> {
		let mut text = String::new();
		while let Some(chunk) = self.next().await {
			text.push_str(&chunk?);
		}
		Ok(text)
	}
}

impl Stream for StreamRelay {
	type Item = Result<String>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let this = &mut *self;
		let request_id = this.request_id;
		if this.subscription.is_none() {
			return Poll::Ready(None);
		}

		if this.cancelled.as_mut().poll(cx).is_ready() {
			debug!(target = "pagebridge.stream", %request_id, "stream cancelled by caller");
			this.abort();
			return Poll::Ready(Some(Err(Error::Aborted { request_id })));
		}

		let chunk_kind = this.kind.with_phase(Phase::StreamingResult);
		loop {
			let Some(subscription) = this.subscription.as_mut() else {
				return Poll::Ready(None);
			};
			let message = ready!(subscription.poll_next_unpin(cx));
			let skipped = subscription.skipped();

			let Some(message) = message else {
				this.subscription = None;
				return Poll::Ready(Some(Err(Error::ChannelClosed)));
			};
			if skipped > 0 {
				warn!(target = "pagebridge.stream", %request_id, skipped, "stream lost chunks");
				this.abort();
				return Poll::Ready(Some(Err(Error::Lagged { request_id, skipped })));
			}

			let Some(chunk) = Reply::<StreamChunk>::matching(&message, chunk_kind, request_id) else {
				trace!(target = "pagebridge.stream", %request_id, "ignoring unrelated envelope");
				continue;
			};
			if !chunk.done {
				return Poll::Ready(Some(Ok(chunk.text)));
			}

			this.subscription = None;
			debug!(target = "pagebridge.stream", %request_id, "stream finished");
			return Poll::Ready(chunk.error.map(|message| Err(Error::Stream { request_id, message })));
		}
	}
}

impl Drop for StreamRelay {
	fn drop(&mut self) {
		self.abort();
	}
}

impl std::fmt::Debug for StreamRelay {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("StreamRelay")
			.field("kind", &self.kind)
			.field("request_id", &self.request_id)
			.field("finished", &self.is_finished())
			.finish()
	}
}

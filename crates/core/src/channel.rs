//! Shared broadcast channel between the content realm and the page realm.
//!
//! The channel has no addressing: every posted envelope reaches every live
//! subscription, including the poster's own. Listeners filter by kind and
//! request id themselves.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::{Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{trace, warn};

use crate::error::Result;

/// Default number of envelopes a slow subscription may fall behind by.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Handle to the broadcast bus. Cheap to clone; clones share the bus.
#[derive(Clone)]
pub struct Channel {
	sender: Arc<RwLock<Option<broadcast::Sender<Value>>>>,
}

impl Channel {
	/// Creates a channel buffering up to `capacity` envelopes per subscription.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self {
			sender: Arc::new(RwLock::new(Some(sender))),
		}
	}

	/// Broadcasts `message` to every live subscription. Never blocks.
	pub fn post(&self, message: Value) {
		let guard = self.sender.read();
		let Some(sender) = guard.as_ref() else {
			trace!(target = "pagebridge.channel", "post on closed channel dropped");
			return;
		};
		if sender.send(message).is_err() {
			trace!(target = "pagebridge.channel", "post with no subscribers dropped");
		}
	}

	/// Serializes and broadcasts an envelope.
	pub fn post_envelope<T: Serialize>(&self, envelope: &T) -> Result<()> {
		self.post(serde_json::to_value(envelope)?);
		Ok(())
	}

	/// Starts receiving every envelope posted from now on.
	///
	/// Subscribing to a closed channel yields an already-ended subscription.
	pub fn subscribe(&self) -> Subscription {
		let inner = self.sender.read().as_ref().map(|sender| BroadcastStream::new(sender.subscribe()));
		Subscription { inner, skipped: 0 }
	}

	/// Tears the channel down. Live subscriptions end after draining what was
	/// already posted; later posts are dropped.
	pub fn close(&self) {
		self.sender.write().take();
	}

	pub fn is_closed(&self) -> bool {
		self.sender.read().is_none()
	}
}

impl Default for Channel {
	fn default() -> Self {
		Self::new(DEFAULT_CHANNEL_CAPACITY)
	}
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel").field("closed", &self.is_closed()).finish()
	}
}

/// One listener on the channel. Dropping it unregisters the listener.
pub struct Subscription {
	inner: Option<BroadcastStream<Value>>,
	skipped: u64,
}

impl Subscription {
	/// Waits for the next envelope; `None` once the channel is closed.
	pub async fn recv(&mut self) -> Option<Value> {
		self.next().await
	}

	/// Total number of envelopes this subscription missed by lagging.
	pub fn skipped(&self) -> u64 {
		self.skipped
	}
}

impl Stream for Subscription {
	type Item = Value;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
		loop {
			let Some(inner) = self.inner.as_mut() else {
				return Poll::Ready(None);
			};
			match ready!(inner.poll_next_unpin(cx)) {
				Some(Ok(message)) => return Poll::Ready(Some(message)),
				Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
					warn!(target = "pagebridge.channel", skipped, "subscription lagged behind channel");
					self.skipped += skipped;
				}
				None => {
					self.inner = None;
					return Poll::Ready(None);
				}
			}
		}
	}
}

//! Error types for the content-realm side of the bridge.
//!
//! Capability failures never appear here: the page realm folds them into
//! [`OperationResult`](pagebridge_protocol::OperationResult). These errors
//! describe misuse or loss of the channel itself.

use std::time::Duration;

use pagebridge_protocol::RequestId;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The channel was torn down while a call or stream was waiting on it.
	#[error("message channel closed")]
	ChannelClosed,

	/// No matching reply arrived within the configured request timeout.
	#[error("request {request_id} timed out after {timeout:?}")]
	Timeout { request_id: RequestId, timeout: Duration },

	/// The caller's cancellation token fired before a reply arrived.
	#[error("request {request_id} aborted")]
	Aborted { request_id: RequestId },

	/// The page realm reported a failure in the middle of a stream.
	#[error("stream {request_id} failed: {message}")]
	Stream { request_id: RequestId, message: String },

	/// The stream's subscription fell behind the channel and lost chunks.
	#[error("stream {request_id} lost {skipped} envelopes")]
	Lagged { request_id: RequestId, skipped: u64 },

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl Error {
	/// Returns `true` when the call ended because the caller cancelled it.
	pub fn is_aborted(&self) -> bool {
		matches!(self, Error::Aborted { .. })
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}
}

//! Envelopes: the unit on the wire.
//!
//! ```json
//! { "kind": "PROMPT", "requestId": 1, "text": "hi" }
//! { "kind": "PROMPT_RESULT", "requestId": 1, "result": { "kind": "success", "text": "hello" } }
//! { "kind": "PROMPT_STREAMING_RESULT", "requestId": 2, "result": { "text": "hel", "done": false } }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	Capability, CapabilityRequest, MessageKind, Phase, PromptRequest, RequestId, RewriteRequest, SummarizeRequest,
	TranslateRequest, WriteRequest,
};

/// Fields every envelope carries. Also the complete `<OP>_ABORT` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
	pub kind: MessageKind,
	#[serde(rename = "requestId")]
	pub request_id: RequestId,
}

impl EnvelopeHeader {
	pub fn parse(message: &Value) -> Option<Self> {
		Self::deserialize(message).ok()
	}
}

/// An envelope with a capability-specific body inlined next to the header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<B> {
	pub kind: MessageKind,
	#[serde(rename = "requestId")]
	pub request_id: RequestId,
	#[serde(flatten)]
	pub body: B,
}

impl<B> Envelope<B> {
	pub fn new(kind: MessageKind, request_id: RequestId, body: B) -> Self {
		Self { kind, request_id, body }
	}
}

/// Body of every page → client envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
	pub result: T,
}

impl<T: DeserializeOwned> Reply<T> {
	/// Parses `message` as the `kind` reply to `request_id`.
	///
	/// Returns `None` for anything else: another kind, another request, or a
	/// body that does not match `T`.
	pub fn matching(message: &Value, kind: MessageKind, request_id: RequestId) -> Option<T> {
		let header = EnvelopeHeader::parse(message)?;
		if header.kind != kind || header.request_id != request_id {
			return None;
		}
		Reply::<T>::deserialize(message).ok().map(|reply| reply.result)
	}
}

/// One `<OP>_STREAMING_RESULT` chunk.
///
/// The final chunk has `done: true` and empty text. If the stream failed
/// partway, the final chunk also carries `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
	pub text: String,
	pub done: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl StreamChunk {
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			done: false,
			error: None,
		}
	}

	pub fn done() -> Self {
		Self {
			text: String::new(),
			done: true,
			error: None,
		}
	}

	pub fn failed(message: impl Into<String>) -> Self {
		Self {
			error: Some(message.into()),
			..Self::done()
		}
	}
}

/// A validated client → page request.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound<R> {
	pub request_id: RequestId,
	/// `true` for `<OP>_STREAMING`.
	pub streaming: bool,
	pub request: R,
}

impl<R: CapabilityRequest> Inbound<R> {
	fn parse(message: &Value, request_id: RequestId, streaming: bool) -> Option<Self> {
		let request = R::deserialize(message).ok()?;
		Some(Self {
			request_id,
			streaming,
			request,
		})
	}
}

/// Union of every envelope the page realm accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
	Summarize(Inbound<SummarizeRequest>),
	Prompt(Inbound<PromptRequest>),
	Translate(Inbound<TranslateRequest>),
	Rewrite(Inbound<RewriteRequest>),
	Write(Inbound<WriteRequest>),
	Abort(EnvelopeHeader),
}

impl InboundMessage {
	/// Validates an untyped broadcast against every registered request shape.
	///
	/// Returns `None` when the broadcast is not a request for this realm.
	pub fn parse(message: &Value) -> Option<Self> {
		let header = EnvelopeHeader::parse(message)?;
		let streaming = match header.kind.phase {
			Phase::Request => false,
			Phase::StreamingRequest => true,
			Phase::Abort => return Some(InboundMessage::Abort(header)),
			Phase::Result | Phase::StreamingSetupResult | Phase::StreamingResult => return None,
		};

		let id = header.request_id;
		let parsed = match header.kind.capability {
			Capability::Summarizer => InboundMessage::Summarize(Inbound::parse(message, id, streaming)?),
			Capability::LanguageModel => InboundMessage::Prompt(Inbound::parse(message, id, streaming)?),
			Capability::Translator => InboundMessage::Translate(Inbound::parse(message, id, streaming)?),
			Capability::Rewriter => InboundMessage::Rewrite(Inbound::parse(message, id, streaming)?),
			Capability::Writer => InboundMessage::Write(Inbound::parse(message, id, streaming)?),
		};
		Some(parsed)
	}

	pub fn header(&self) -> EnvelopeHeader {
		fn header_of<R: CapabilityRequest>(inbound: &Inbound<R>) -> EnvelopeHeader {
			let phase = if inbound.streaming {
				Phase::StreamingRequest
			} else {
				Phase::Request
			};
			EnvelopeHeader {
				kind: MessageKind::new(R::CAPABILITY, phase),
				request_id: inbound.request_id,
			}
		}

		match self {
			InboundMessage::Summarize(inbound) => header_of(inbound),
			InboundMessage::Prompt(inbound) => header_of(inbound),
			InboundMessage::Translate(inbound) => header_of(inbound),
			InboundMessage::Rewrite(inbound) => header_of(inbound),
			InboundMessage::Write(inbound) => header_of(inbound),
			InboundMessage::Abort(header) => *header,
		}
	}
}

//! Message kind tags and correlation ids.
//!
//! Every envelope carries a `kind` string of the form `<OP><SUFFIX>`, where
//! `<OP>` names the capability and the suffix names the direction:
//!
//! | suffix | direction |
//! |---|---|
//! | (none) | client → page request |
//! | `_STREAMING` | client → page streaming request |
//! | `_ABORT` | client → page cancellation |
//! | `_RESULT` | page → client result |
//! | `_STREAMING_SETUP_RESULT` | page → client streaming setup result |
//! | `_STREAMING_RESULT` | page → client stream chunk |

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An AI capability exposed by the page realm.
///
/// Serialized with the name of the capability's global entry point
/// (`"Summarizer"`, `"LanguageModel"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
	Summarizer,
	LanguageModel,
	Translator,
	Rewriter,
	Writer,
}

impl Capability {
	/// All registered capabilities, in dispatch order.
	pub const ALL: [Capability; 5] = [
		Capability::Summarizer,
		Capability::LanguageModel,
		Capability::Translator,
		Capability::Rewriter,
		Capability::Writer,
	];

	/// Name of the global entry point the page realm exposes.
	pub fn global_name(self) -> &'static str {
		match self {
			Capability::Summarizer => "Summarizer",
			Capability::LanguageModel => "LanguageModel",
			Capability::Translator => "Translator",
			Capability::Rewriter => "Rewriter",
			Capability::Writer => "Writer",
		}
	}

	/// `<OP>` prefix used by every message kind of this capability.
	pub fn operation(self) -> &'static str {
		match self {
			Capability::Summarizer => "SUMMARIZE",
			Capability::LanguageModel => "PROMPT",
			Capability::Translator => "TRANSLATE",
			Capability::Rewriter => "REWRITE",
			Capability::Writer => "WRITE",
		}
	}

	/// Shared context used when a request does not supply one.
	pub fn default_shared_context(self) -> Option<&'static str> {
		match self {
			Capability::Summarizer => Some("Web page summary"),
			Capability::Rewriter => Some("Rewrite webpage summaries for younger readers"),
			Capability::Writer => Some("Write webpage summaries for younger readers"),
			Capability::LanguageModel | Capability::Translator => None,
		}
	}
}

impl fmt::Display for Capability {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.global_name())
	}
}

/// Direction and role of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
	Request,
	StreamingRequest,
	Abort,
	Result,
	StreamingSetupResult,
	StreamingResult,
}

impl Phase {
	// Longest suffixes first so `_STREAMING_RESULT` never matches `_RESULT`.
	const SUFFIXES: [(Phase, &'static str); 6] = [
		(Phase::StreamingSetupResult, "_STREAMING_SETUP_RESULT"),
		(Phase::StreamingResult, "_STREAMING_RESULT"),
		(Phase::StreamingRequest, "_STREAMING"),
		(Phase::Result, "_RESULT"),
		(Phase::Abort, "_ABORT"),
		(Phase::Request, ""),
	];

	pub fn suffix(self) -> &'static str {
		match self {
			Phase::Request => "",
			Phase::StreamingRequest => "_STREAMING",
			Phase::Abort => "_ABORT",
			Phase::Result => "_RESULT",
			Phase::StreamingSetupResult => "_STREAMING_SETUP_RESULT",
			Phase::StreamingResult => "_STREAMING_RESULT",
		}
	}

	/// Returns `true` for kinds the page realm accepts.
	pub fn is_inbound(self) -> bool {
		matches!(self, Phase::Request | Phase::StreamingRequest | Phase::Abort)
	}
}

/// A parsed `kind` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKind {
	pub capability: Capability,
	pub phase: Phase,
}

impl MessageKind {
	pub const fn new(capability: Capability, phase: Phase) -> Self {
		Self { capability, phase }
	}

	/// Returns the same capability with a different phase.
	pub const fn with_phase(self, phase: Phase) -> Self {
		Self::new(self.capability, phase)
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", self.capability.operation(), self.phase.suffix())
	}
}

/// Error returned when a `kind` tag names no registered capability or phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(pub String);

impl fmt::Display for UnknownKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unknown message kind: {}", self.0)
	}
}

impl std::error::Error for UnknownKind {}

impl FromStr for MessageKind {
	type Err = UnknownKind;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		for capability in Capability::ALL {
			let Some(rest) = s.strip_prefix(capability.operation()) else {
				continue;
			};
			if let Some((phase, _)) = Phase::SUFFIXES.iter().find(|(_, suffix)| rest == *suffix) {
				return Ok(MessageKind::new(capability, *phase));
			}
		}
		Err(UnknownKind(s.to_string()))
	}
}

impl Serialize for MessageKind {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for MessageKind {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(serde::de::Error::custom)
	}
}

/// Correlation id of one logical call.
///
/// Positive by construction; a `requestId` of zero never parses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(NonZeroU64);

impl RequestId {
	pub fn new(id: u64) -> Option<Self> {
		NonZeroU64::new(id).map(Self)
	}

	/// Id allocated after `issued` earlier ids: the first call gets `1`.
	pub fn after(issued: u64) -> Self {
		Self(NonZeroU64::MIN.saturating_add(issued))
	}

	pub fn get(self) -> u64 {
		self.0.get()
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

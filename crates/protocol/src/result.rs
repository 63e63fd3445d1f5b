//! Operation outcomes shared by every capability.

use serde::{Deserialize, Serialize};

/// Outcome of one capability operation.
///
/// Exactly one case is populated. On the wire the case is the `kind` tag and
/// success data is inlined next to it:
///
/// ```json
/// { "kind": "success", "text": "hello" }
/// { "kind": "no-model-available" }
/// { "kind": "error", "message": "LanguageModel returned empty response" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OperationResult<T> {
	/// The operation completed with capability-specific data.
	Success(T),
	/// The capability does not exist in the page realm.
	NotSupported,
	/// The capability exists but its backing model is unavailable.
	NoModelAvailable,
	/// The caller's cancellation fired before or during completion.
	Aborted,
	/// Any other failure, including errors raised by the capability.
	Error { message: String },
}

impl<T> OperationResult<T> {
	pub fn error(message: impl Into<String>) -> Self {
		OperationResult::Error { message: message.into() }
	}

	pub fn is_success(&self) -> bool {
		matches!(self, OperationResult::Success(_))
	}

	/// Wire name of the populated case.
	pub fn kind(&self) -> &'static str {
		match self {
			OperationResult::Success(_) => "success",
			OperationResult::NotSupported => "not-supported",
			OperationResult::NoModelAvailable => "no-model-available",
			OperationResult::Aborted => "aborted",
			OperationResult::Error { .. } => "error",
		}
	}

	/// Maps success data, leaving every other case untouched.
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
		match self {
			OperationResult::Success(data) => OperationResult::Success(f(data)),
			OperationResult::NotSupported => OperationResult::NotSupported,
			OperationResult::NoModelAvailable => OperationResult::NoModelAvailable,
			OperationResult::Aborted => OperationResult::Aborted,
			OperationResult::Error { message } => OperationResult::Error { message },
		}
	}

	pub fn success(self) -> Option<T> {
		match self {
			OperationResult::Success(data) => Some(data),
			_ => None,
		}
	}
}

/// Success data of a streaming setup result. Carries no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamReady {}

/// Availability of a capability's backing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelAvailability {
	Available,
	Downloadable,
	Downloading,
	Unavailable,
	/// The probe itself failed; creation is attempted anyway.
	Maybe,
}

impl ModelAvailability {
	/// Returns `true` when creating a session will fetch the model first.
	pub fn requires_download(self) -> bool {
		matches!(self, ModelAvailability::Downloadable | ModelAvailability::Downloading)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::TextOutput;

	#[test]
	fn success_data_is_inlined_next_to_kind() {
		let result = OperationResult::Success(TextOutput { text: "hello".into() });
		assert_eq!(serde_json::to_value(&result).unwrap(), json!({"kind": "success", "text": "hello"}));
	}

	#[test]
	fn every_case_uses_its_kebab_case_tag() {
		let cases: [(OperationResult<TextOutput>, &str); 4] = [
			(OperationResult::NotSupported, "not-supported"),
			(OperationResult::NoModelAvailable, "no-model-available"),
			(OperationResult::Aborted, "aborted"),
			(OperationResult::error("boom"), "error"),
		];
		for (result, tag) in cases {
			assert_eq!(result.kind(), tag);
			let value = serde_json::to_value(&result).unwrap();
			assert_eq!(value["kind"], tag);
			assert_eq!(serde_json::from_value::<OperationResult<TextOutput>>(value).unwrap(), result);
		}
	}

	#[test]
	fn setup_success_carries_only_the_tag() {
		let result = OperationResult::Success(StreamReady {});
		assert_eq!(serde_json::to_value(&result).unwrap(), json!({"kind": "success"}));
		let parsed: OperationResult<StreamReady> = serde_json::from_value(json!({"kind": "success"})).unwrap();
		assert!(parsed.is_success());
	}

	#[test]
	fn success_without_data_is_rejected() {
		let parsed = serde_json::from_value::<OperationResult<TextOutput>>(json!({"kind": "success"}));
		assert!(parsed.is_err());
	}

	#[test]
	fn error_requires_message() {
		let parsed = serde_json::from_value::<OperationResult<TextOutput>>(json!({"kind": "error"}));
		assert!(parsed.is_err());
	}

	#[test]
	fn map_preserves_failures() {
		let result: OperationResult<u8> = OperationResult::NoModelAvailable;
		assert_eq!(result.map(|n| n + 1), OperationResult::NoModelAvailable);
		assert_eq!(OperationResult::Success(1u8).map(|n| n + 1), OperationResult::Success(2));
	}

	#[test]
	fn availability_uses_lowercase_names() {
		assert_eq!(serde_json::to_value(ModelAvailability::Downloadable).unwrap(), json!("downloadable"));
		assert!(ModelAvailability::Downloading.requires_download());
		assert!(!ModelAvailability::Maybe.requires_download());
	}
}

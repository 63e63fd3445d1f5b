//! Collaborator interfaces the page realm runs capabilities through.
//!
//! The bridge never talks to a model directly. Integration code registers a
//! [`ModelFactory`] per capability in a [`CapabilityProvider`]; a capability
//! with no factory is reported as not supported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use pagebridge_protocol::{Capability, ModelAvailability, ModelConfig, RunOptions};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Failure raised by a host collaborator. Only the message crosses the
/// channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HostError {
	pub message: String,
}

impl HostError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

impl From<String> for HostError {
	fn from(message: String) -> Self {
		Self { message }
	}
}

impl From<&str> for HostError {
	fn from(message: &str) -> Self {
		Self::new(message)
	}
}

/// Chunks produced by a streaming run.
pub type TextStream = BoxStream<'static, Result<String, HostError>>;

/// Options for an availability probe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvailabilityOptions {
	/// Effective configuration, defaults applied.
	pub config: ModelConfig,
	/// Capability-specific options such as summary type or sampling knobs.
	pub extras: Map<String, Value>,
}

/// Options for creating a session.
#[derive(Debug, Clone)]
pub struct CreateOptions {
	pub config: ModelConfig,
	pub extras: Map<String, Value>,
	pub signal: CancellationToken,
	/// Present when the model has to be fetched before the session is usable.
	pub monitor: Option<DownloadMonitor>,
}

/// Receives model download progress while a session is being created.
#[derive(Debug, Clone)]
pub struct DownloadMonitor {
	capability: Capability,
}

impl DownloadMonitor {
	pub fn new(capability: Capability) -> Self {
		Self { capability }
	}

	pub fn capability(&self) -> Capability {
		self.capability
	}

	/// Reports progress as a fraction in `0.0..=1.0`.
	pub fn progress(&self, loaded: f64) {
		let percent = (loaded.clamp(0.0, 1.0) * 100.0).round();
		debug!(target = "pagebridge.session", capability = %self.capability, percent, "model download progress");
	}
}

/// Creates sessions for one capability.
#[async_trait]
pub trait ModelFactory: Send + Sync {
	/// Probes whether a session with these options could be created.
	async fn availability(&self, options: &AvailabilityOptions) -> Result<ModelAvailability, HostError>;

	async fn create(&self, options: CreateOptions) -> Result<Arc<dyn ModelSession>, HostError>;
}

/// A live, reusable capability instance.
#[async_trait]
pub trait ModelSession: Send + Sync {
	/// Runs the operation to completion and returns its text.
	async fn run(&self, input: &str, options: &RunOptions, signal: &CancellationToken) -> Result<String, HostError>;

	/// Starts the operation and returns its chunks as they are produced.
	async fn run_streaming(
		&self,
		input: &str,
		options: &RunOptions,
		signal: &CancellationToken,
	) -> Result<TextStream, HostError>;

	/// Releases the session. Called before a replacement is created.
	async fn destroy(&self) -> Result<(), HostError> {
		Ok(())
	}
}

/// Presence check over the capabilities the page realm exposes.
pub trait CapabilityProvider: Send + Sync {
	fn factory(&self, capability: Capability) -> Option<Arc<dyn ModelFactory>>;

	fn is_available(&self, capability: Capability) -> bool {
		self.factory(capability).is_some()
	}
}

/// Map-backed provider filled by integration code.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
	factories: HashMap<Capability, Arc<dyn ModelFactory>>,
}

impl CapabilityRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, capability: Capability, factory: Arc<dyn ModelFactory>) -> &mut Self {
		self.factories.insert(capability, factory);
		self
	}

	pub fn with(mut self, capability: Capability, factory: Arc<dyn ModelFactory>) -> Self {
		self.register(capability, factory);
		self
	}

	pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
		self.factories.keys().copied()
	}
}

impl CapabilityProvider for CapabilityRegistry {
	fn factory(&self, capability: Capability) -> Option<Arc<dyn ModelFactory>> {
		self.factories.get(&capability).cloned()
	}
}

impl std::fmt::Debug for CapabilityRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut capabilities: Vec<_> = self.capabilities().collect();
		capabilities.sort();
		f.debug_struct("CapabilityRegistry")
			.field("capabilities", &capabilities)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Unavailable;

	#[async_trait]
	impl ModelFactory for Unavailable {
		async fn availability(&self, _: &AvailabilityOptions) -> Result<ModelAvailability, HostError> {
			Ok(ModelAvailability::Unavailable)
		}

		async fn create(&self, _: CreateOptions) -> Result<Arc<dyn ModelSession>, HostError> {
			Err(HostError::new("no model"))
		}
	}

	#[test]
	fn registry_reports_only_registered_capabilities() {
		let registry = CapabilityRegistry::new().with(Capability::Writer, Arc::new(Unavailable));
		assert!(registry.is_available(Capability::Writer));
		assert!(!registry.is_available(Capability::Rewriter));
		assert!(registry.factory(Capability::Summarizer).is_none());
	}

	#[tokio::test]
	async fn registered_factory_is_reachable() {
		let registry = CapabilityRegistry::new().with(Capability::Writer, Arc::new(Unavailable));
		let factory = registry.factory(Capability::Writer).unwrap();
		let availability = factory.availability(&AvailabilityOptions::default()).await.unwrap();
		assert_eq!(availability, ModelAvailability::Unavailable);
	}

	#[test]
	fn host_error_displays_its_message() {
		assert_eq!(HostError::from("quota exceeded").to_string(), "quota exceeded");
	}
}

//! Availability, session and invocation template shared by every capability.
//!
//! The executor is the boundary where host failures become
//! [`OperationResult`] cases. Nothing it returns is an `Err`.

use std::sync::Arc;

use pagebridge_protocol::{Capability, CapabilityRequest, ModelAvailability, ModelConfig, OperationResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::host::{AvailabilityOptions, CapabilityProvider, CreateOptions, DownloadMonitor, ModelSession, TextStream};
use crate::session::{SessionManager, SessionOutcome};

/// Why an operation never reached the session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Rejection {
	NotSupported,
	NoModelAvailable,
	Aborted,
	Error(String),
}

impl Rejection {
	fn into_result<T>(self) -> OperationResult<T> {
		match self {
			Rejection::NotSupported => OperationResult::NotSupported,
			Rejection::NoModelAvailable => OperationResult::NoModelAvailable,
			Rejection::Aborted => OperationResult::Aborted,
			Rejection::Error(message) => OperationResult::Error { message },
		}
	}
}

/// Runs operations for one capability and owns its session cache.
pub struct OperationExecutor {
	capability: Capability,
	provider: Arc<dyn CapabilityProvider>,
	sessions: SessionManager,
}

impl OperationExecutor {
	pub fn new(capability: Capability, provider: Arc<dyn CapabilityProvider>) -> Self {
		Self {
			capability,
			provider,
			sessions: SessionManager::new(capability),
		}
	}

	pub fn capability(&self) -> Capability {
		self.capability
	}

	pub fn sessions(&self) -> &SessionManager {
		&self.sessions
	}

	/// Runs a request/response operation.
	///
	/// A token that fires at any point before this returns yields
	/// [`OperationResult::Aborted`], even if the capability already answered.
	pub async fn execute<R: CapabilityRequest>(
		&self,
		request: &R,
		signal: &CancellationToken,
	) -> OperationResult<R::Output> {
		let capability = self.capability;
		let session = match self.prepare(request, signal).await {
			Ok(session) => session,
			Err(rejection) => return rejection.into_result(),
		};

		let outcome = session.run(request.input(), &request.run_options(), signal).await;
		if signal.is_cancelled() {
			debug!(target = "pagebridge.executor", %capability, "operation aborted");
			return OperationResult::Aborted;
		}

		match outcome {
			Ok(text) if text.is_empty() => OperationResult::error(format!("{capability} returned empty response")),
			Ok(text) => OperationResult::Success(R::output(text)),
			Err(err) => {
				error!(target = "pagebridge.executor", %capability, error = %err, "operation failed");
				OperationResult::Error { message: err.message }
			}
		}
	}

	/// Starts a streaming operation. Success carries the host's chunk stream;
	/// the caller drains it.
	pub async fn execute_streaming<R: CapabilityRequest>(
		&self,
		request: &R,
		signal: &CancellationToken,
	) -> OperationResult<TextStream> {
		let capability = self.capability;
		let session = match self.prepare(request, signal).await {
			Ok(session) => session,
			Err(rejection) => return rejection.into_result(),
		};

		let outcome = session.run_streaming(request.input(), &request.run_options(), signal).await;
		if signal.is_cancelled() {
			debug!(target = "pagebridge.executor", %capability, "streaming operation aborted");
			return OperationResult::Aborted;
		}

		match outcome {
			Ok(stream) => OperationResult::Success(stream),
			Err(err) => {
				error!(target = "pagebridge.executor", %capability, error = %err, "failed to start stream");
				OperationResult::Error { message: err.message }
			}
		}
	}

	/// Destroys the cached session.
	pub async fn destroy(&self) {
		self.sessions.destroy().await;
	}

	async fn prepare<R: CapabilityRequest>(
		&self,
		request: &R,
		signal: &CancellationToken,
	) -> Result<Arc<dyn ModelSession>, Rejection> {
		let capability = self.capability;
		debug_assert_eq!(R::CAPABILITY, capability);
		let Some(factory) = self.provider.factory(capability) else {
			debug!(target = "pagebridge.executor", %capability, "capability not exposed");
			return Err(Rejection::NotSupported);
		};

		let config = request.model_config().with_defaults(capability);
		let extras = request.extras();
		let probe = AvailabilityOptions {
			config: config.clone(),
			extras: extras.clone(),
		};
		let availability = match factory.availability(&probe).await {
			Ok(availability) => availability,
			Err(err) => {
				warn!(target = "pagebridge.executor", %capability, error = %err, "availability probe failed");
				ModelAvailability::Maybe
			}
		};
		debug!(target = "pagebridge.executor", %capability, ?availability, "availability probed");
		if availability == ModelAvailability::Unavailable {
			return Err(Rejection::NoModelAvailable);
		}
		if signal.is_cancelled() {
			debug!(target = "pagebridge.executor", %capability, "cancelled before session");
			return Err(Rejection::Aborted);
		}

		let build_options = |config: &ModelConfig, availability: ModelAvailability| CreateOptions {
			config: config.clone(),
			extras,
			signal: signal.clone(),
			monitor: availability
				.requires_download()
				.then(|| DownloadMonitor::new(capability)),
		};
		match self
			.sessions
			.get_or_create(factory.as_ref(), &config, availability, build_options, signal)
			.await
		{
			SessionOutcome::Ready(session) => Ok(session),
			SessionOutcome::Aborted => Err(Rejection::Aborted),
			SessionOutcome::Failed(message) => Err(Rejection::Error(message)),
		}
	}
}

impl std::fmt::Debug for OperationExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OperationExecutor")
			.field("capability", &self.capability)
			.finish_non_exhaustive()
	}
}

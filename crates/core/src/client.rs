//! Typed per-capability clients, the surface the UI layer consumes.

use std::marker::PhantomData;

use pagebridge_protocol::{Capability, CapabilityRequest, OperationResult};
use tokio_util::sync::CancellationToken;

use crate::correlator::Correlator;
use crate::error::{Error, Result};
use crate::stream::StreamRelay;

/// `call`/`stream` pair for one capability.
///
/// A call the caller cancelled resolves to [`OperationResult::Aborted`]; the
/// returned `Err` is reserved for channel loss, timeouts and serialization.
pub struct CapabilityClient<R> {
	correlator: Correlator,
	_request: PhantomData<fn(R)>,
}

impl<R: CapabilityRequest> CapabilityClient<R> {
	pub(crate) fn new(correlator: Correlator) -> Self {
		Self {
			correlator,
			_request: PhantomData,
		}
	}

	pub fn capability(&self) -> Capability {
		R::CAPABILITY
	}

	pub async fn call(&self, request: &R, signal: &CancellationToken) -> Result<OperationResult<R::Output>> {
		aborted_as_result(self.correlator.call(request, signal).await.map(|(_, result)| result))
	}

	/// Starts a stream. On setup success the relay yields the chunks.
	pub async fn stream(&self, request: &R, signal: &CancellationToken) -> Result<OperationResult<StreamRelay>> {
		aborted_as_result(self.correlator.call_streaming(request, signal).await.map(|(_, result)| result))
	}
}

impl<R> Clone for CapabilityClient<R> {
	fn clone(&self) -> Self {
		Self {
			correlator: self.correlator.clone(),
			_request: PhantomData,
		}
	}
}

fn aborted_as_result<T>(result: Result<OperationResult<T>>) -> Result<OperationResult<T>> {
	match result {
		Err(Error::Aborted { .. }) => Ok(OperationResult::Aborted),
		other => other,
	}
}

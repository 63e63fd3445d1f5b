//! Per-capability session cache keyed by configuration fingerprint.

use std::sync::Arc;

use pagebridge_protocol::{Capability, ModelAvailability, ModelConfig};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::fingerprint::Fingerprint;
use crate::host::{CreateOptions, ModelFactory, ModelSession};

/// What to do with the cached session for a desired fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
	Keep,
	Replace,
}

/// Compares the cached fingerprint with the desired one.
pub fn reconcile(current: Option<&Fingerprint>, desired: &Fingerprint) -> Reconcile {
	match current {
		Some(current) if current == desired => Reconcile::Keep,
		_ => Reconcile::Replace,
	}
}

/// Result of [`SessionManager::get_or_create`].
pub enum SessionOutcome {
	Ready(Arc<dyn ModelSession>),
	Aborted,
	Failed(String),
}

impl std::fmt::Debug for SessionOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SessionOutcome::Ready(_) => f.write_str("Ready"),
			SessionOutcome::Aborted => f.write_str("Aborted"),
			SessionOutcome::Failed(message) => f.debug_tuple("Failed").field(message).finish(),
		}
	}
}

struct CachedSession {
	session: Arc<dyn ModelSession>,
	fingerprint: Fingerprint,
}

/// Holds at most one live session for one capability.
///
/// The compare, destroy, create and record sequence runs under one async
/// lock, so concurrent callers never observe a half-replaced cache.
pub struct SessionManager {
	capability: Capability,
	slot: Mutex<Option<CachedSession>>,
}

impl SessionManager {
	pub fn new(capability: Capability) -> Self {
		Self {
			capability,
			slot: Mutex::new(None),
		}
	}

	pub fn capability(&self) -> Capability {
		self.capability
	}

	/// Returns the cached session when `config` fingerprints the same as the
	/// cached one, otherwise replaces it.
	///
	/// The previous session is removed from the cache and destroyed before the
	/// replacement is created. A failing destroy is logged and ignored. If
	/// creation fails the cache stays empty. A caller whose token has fired
	/// by the time it holds the cache gets [`SessionOutcome::Aborted`] and
	/// leaves the cache untouched.
	pub async fn get_or_create<F>(
		&self,
		factory: &dyn ModelFactory,
		config: &ModelConfig,
		availability: ModelAvailability,
		build_options: F,
		signal: &CancellationToken,
	) -> SessionOutcome
	where
		F: FnOnce(&ModelConfig, ModelAvailability) -> CreateOptions,
	{
		let capability = self.capability;
		let desired = match Fingerprint::of(config) {
			Ok(fingerprint) => fingerprint,
			Err(err) => return SessionOutcome::Failed(err.to_string()),
		};

		let mut slot = self.slot.lock().await;
		if signal.is_cancelled() {
			return SessionOutcome::Aborted;
		}
		match slot.as_ref() {
			Some(cached) if reconcile(Some(&cached.fingerprint), &desired) == Reconcile::Keep => {
				return SessionOutcome::Ready(Arc::clone(&cached.session));
			}
			_ => {}
		}

		if let Some(stale) = slot.take() {
			debug!(target = "pagebridge.session", %capability, "configuration changed, replacing session");
			destroy_quietly(capability, stale.session).await;
		}

		match factory.create(build_options(config, availability)).await {
			Ok(session) => {
				debug!(target = "pagebridge.session", %capability, fingerprint = %desired, "session created");
				*slot = Some(CachedSession {
					session: Arc::clone(&session),
					fingerprint: desired,
				});
				SessionOutcome::Ready(session)
			}
			Err(_) if signal.is_cancelled() => SessionOutcome::Aborted,
			Err(err) => {
				error!(target = "pagebridge.session", %capability, error = %err, "failed to create session");
				SessionOutcome::Failed(err.message)
			}
		}
	}

	/// Destroys the cached session, if any. Safe to call repeatedly.
	pub async fn destroy(&self) {
		let stale = self.slot.lock().await.take();
		if let Some(stale) = stale {
			destroy_quietly(self.capability, stale.session).await;
		}
	}

	/// Fingerprint of the cached session.
	pub async fn fingerprint(&self) -> Option<Fingerprint> {
		self.slot.lock().await.as_ref().map(|cached| cached.fingerprint.clone())
	}
}

async fn destroy_quietly(capability: Capability, session: Arc<dyn ModelSession>) {
	if let Err(err) = session.destroy().await {
		warn!(target = "pagebridge.session", %capability, error = %err, "failed to destroy session");
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;
	use pagebridge_protocol::RunOptions;
	use tokio::sync::Semaphore;

	use super::*;
	use crate::host::{AvailabilityOptions, HostError, TextStream};

	#[derive(Default)]
	struct Counting {
		created: AtomicUsize,
		destroyed: Arc<AtomicUsize>,
		fail_create: bool,
	}

	struct Session {
		destroyed: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl ModelSession for Session {
		async fn run(&self, input: &str, _: &RunOptions, _: &CancellationToken) -> Result<String, HostError> {
			Ok(input.to_string())
		}

		async fn run_streaming(&self, _: &str, _: &RunOptions, _: &CancellationToken) -> Result<TextStream, HostError> {
			Err(HostError::new("unused"))
		}

		async fn destroy(&self) -> Result<(), HostError> {
			self.destroyed.fetch_add(1, Ordering::SeqCst);
			Err(HostError::new("already gone"))
		}
	}

	#[async_trait]
	impl ModelFactory for Counting {
		async fn availability(&self, _: &AvailabilityOptions) -> Result<ModelAvailability, HostError> {
			Ok(ModelAvailability::Available)
		}

		async fn create(&self, _: CreateOptions) -> Result<Arc<dyn ModelSession>, HostError> {
			self.created.fetch_add(1, Ordering::SeqCst);
			if self.fail_create {
				return Err(HostError::new("out of memory"));
			}
			Ok(Arc::new(Session {
				destroyed: Arc::clone(&self.destroyed),
			}))
		}
	}

	fn options(config: &ModelConfig, _: ModelAvailability) -> CreateOptions {
		CreateOptions {
			config: config.clone(),
			extras: Default::default(),
			signal: CancellationToken::new(),
			monitor: None,
		}
	}

	fn tone(tone: &str) -> ModelConfig {
		ModelConfig {
			tone: Some(tone.to_string()),
			..Default::default()
		}
	}

	async fn acquire(manager: &SessionManager, factory: &Counting, config: &ModelConfig) -> SessionOutcome {
		manager
			.get_or_create(factory, config, ModelAvailability::Available, options, &CancellationToken::new())
			.await
	}

	#[test]
	fn reconcile_keeps_only_identical_fingerprints() {
		let a = Fingerprint::of(&tone("formal")).unwrap();
		let b = Fingerprint::of(&tone("casual")).unwrap();
		assert_eq!(reconcile(Some(&a), &a), Reconcile::Keep);
		assert_eq!(reconcile(Some(&a), &b), Reconcile::Replace);
		assert_eq!(reconcile(None, &a), Reconcile::Replace);
	}

	#[tokio::test]
	async fn same_fingerprint_reuses_session() {
		let manager = SessionManager::new(Capability::Rewriter);
		let factory = Counting::default();

		let first = acquire(&manager, &factory, &tone("formal")).await;
		let second = acquire(&manager, &factory, &tone("formal")).await;

		let (SessionOutcome::Ready(first), SessionOutcome::Ready(second)) = (first, second) else {
			panic!("expected sessions");
		};
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(factory.created.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn new_fingerprint_destroys_before_creating() {
		let manager = SessionManager::new(Capability::Rewriter);
		let factory = Counting::default();

		acquire(&manager, &factory, &tone("formal")).await;
		let outcome = acquire(&manager, &factory, &tone("casual")).await;

		assert!(matches!(outcome, SessionOutcome::Ready(_)));
		assert_eq!(factory.created.load(Ordering::SeqCst), 2);
		assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
		assert_eq!(manager.fingerprint().await, Some(Fingerprint::of(&tone("casual")).unwrap()));
	}

	#[tokio::test]
	async fn failed_creation_leaves_cache_empty() {
		let manager = SessionManager::new(Capability::Writer);
		let factory = Counting {
			fail_create: true,
			..Default::default()
		};

		let outcome = acquire(&manager, &factory, &ModelConfig::default()).await;
		assert!(matches!(outcome, SessionOutcome::Failed(message) if message == "out of memory"));
		assert!(manager.fingerprint().await.is_none());
	}

	#[tokio::test]
	async fn failed_creation_after_cancel_is_aborted() {
		let manager = SessionManager::new(Capability::Writer);
		let factory = Counting {
			fail_create: true,
			..Default::default()
		};
		let signal = CancellationToken::new();
		signal.cancel();

		let outcome = manager
			.get_or_create(
				&factory,
				&ModelConfig::default(),
				ModelAvailability::Available,
				|config, availability| {
					signal.cancel();
					options(config, availability)
				},
				&signal,
			)
			.await;
		assert!(matches!(outcome, SessionOutcome::Aborted));
		assert_eq!(factory.created.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn cancelled_caller_keeps_cached_session() {
		let manager = SessionManager::new(Capability::Writer);
		let factory = Counting::default();
		acquire(&manager, &factory, &tone("formal")).await;
		let signal = CancellationToken::new();
		signal.cancel();

		let outcome = manager
			.get_or_create(&factory, &tone("casual"), ModelAvailability::Available, options, &signal)
			.await;
		assert!(matches!(outcome, SessionOutcome::Aborted));
		assert_eq!(factory.created.load(Ordering::SeqCst), 1);
		assert_eq!(factory.destroyed.load(Ordering::SeqCst), 0);
		assert_eq!(manager.fingerprint().await, Some(Fingerprint::of(&tone("formal")).unwrap()));
	}

	#[tokio::test]
	async fn destroy_is_idempotent() {
		let manager = SessionManager::new(Capability::Summarizer);
		let factory = Counting::default();
		acquire(&manager, &factory, &ModelConfig::default()).await;

		manager.destroy().await;
		manager.destroy().await;

		assert_eq!(factory.destroyed.load(Ordering::SeqCst), 1);
		assert!(manager.fingerprint().await.is_none());
	}

	/// Creation waits for a permit, so a test decides when each create ends.
	struct Gated {
		permits: Semaphore,
		log: Arc<parking_lot::Mutex<Vec<String>>>,
		live: Arc<AtomicUsize>,
		peak: Arc<AtomicUsize>,
	}

	impl Gated {
		fn new() -> Self {
			Self {
				permits: Semaphore::new(0),
				log: Arc::default(),
				live: Arc::default(),
				peak: Arc::default(),
			}
		}

		fn log(&self) -> Vec<String> {
			self.log.lock().clone()
		}
	}

	struct Labelled {
		label: String,
		log: Arc<parking_lot::Mutex<Vec<String>>>,
		live: Arc<AtomicUsize>,
	}

	#[async_trait]
	impl ModelFactory for Gated {
		async fn availability(&self, _: &AvailabilityOptions) -> Result<ModelAvailability, HostError> {
			Ok(ModelAvailability::Available)
		}

		async fn create(&self, options: CreateOptions) -> Result<Arc<dyn ModelSession>, HostError> {
			let label = options.config.tone.unwrap_or_default();
			self.log.lock().push(format!("created {label}"));
			let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(live, Ordering::SeqCst);
			self.permits
				.acquire()
				.await
				.map_err(|err| HostError::new(err.to_string()))?
				.forget();
			Ok(Arc::new(Labelled {
				label,
				log: Arc::clone(&self.log),
				live: Arc::clone(&self.live),
			}))
		}
	}

	#[async_trait]
	impl ModelSession for Labelled {
		async fn run(&self, input: &str, _: &RunOptions, _: &CancellationToken) -> Result<String, HostError> {
			Ok(input.to_string())
		}

		async fn run_streaming(&self, _: &str, _: &RunOptions, _: &CancellationToken) -> Result<TextStream, HostError> {
			Err(HostError::new("unused"))
		}

		async fn destroy(&self) -> Result<(), HostError> {
			self.live.fetch_sub(1, Ordering::SeqCst);
			self.log.lock().push(format!("destroyed {}", self.label));
			Ok(())
		}
	}

	async fn gated(manager: &SessionManager, factory: &Gated, config: &ModelConfig) -> SessionOutcome {
		manager
			.get_or_create(factory, config, ModelAvailability::Available, options, &CancellationToken::new())
			.await
	}

	/// Waits until the first caller is inside `create`, holding the cache.
	async fn first_create_started(factory: &Gated) {
		while factory.log().is_empty() {
			tokio::task::yield_now().await;
		}
	}

	/// Like [`gated`], but only starts once another caller holds the cache.
	async fn gated_second(manager: &SessionManager, factory: &Gated, config: &ModelConfig) -> SessionOutcome {
		first_create_started(factory).await;
		gated(manager, factory, config).await
	}

	#[tokio::test]
	async fn concurrent_replacement_is_not_interleaved() {
		let manager = SessionManager::new(Capability::Rewriter);
		let factory = Gated::new();

		let release = async {
			first_create_started(&factory).await;
			for _ in 0..10 {
				tokio::task::yield_now().await;
			}
			assert_eq!(factory.log(), ["created formal"]);
			factory.permits.add_permits(2);
		};
		let (first_opts, second_opts) = (tone("formal"), tone("casual"));
		let (first, second, ()) = tokio::join!(
			gated(&manager, &factory, &first_opts),
			gated_second(&manager, &factory, &second_opts),
			release,
		);

		assert!(matches!(first, SessionOutcome::Ready(_)));
		assert!(matches!(second, SessionOutcome::Ready(_)));
		assert_eq!(factory.log(), ["created formal", "destroyed formal", "created casual"]);
		assert_eq!(factory.peak.load(Ordering::SeqCst), 1);
		assert_eq!(manager.fingerprint().await, Some(Fingerprint::of(&tone("casual")).unwrap()));
	}

	#[tokio::test]
	async fn concurrent_same_fingerprint_shares_one_session() {
		let manager = SessionManager::new(Capability::Rewriter);
		let factory = Gated::new();

		let release = async {
			first_create_started(&factory).await;
			for _ in 0..10 {
				tokio::task::yield_now().await;
			}
			factory.permits.add_permits(1);
		};
		let (first_opts, second_opts) = (tone("formal"), tone("formal"));
		let (first, second, ()) = tokio::join!(
			gated(&manager, &factory, &first_opts),
			gated_second(&manager, &factory, &second_opts),
			release,
		);

		let (SessionOutcome::Ready(first), SessionOutcome::Ready(second)) = (first, second) else {
			panic!("expected sessions");
		};
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(factory.log(), ["created formal"]);
	}
}

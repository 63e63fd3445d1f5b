//! Shared fixtures for the bridge integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pagebridge::{Channel, Correlator, CorrelatorConfig, Dispatcher, DispatcherHandle, ScriptEvent, ScriptedProvider};
use serde_json::Value;

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_max_level(tracing::Level::DEBUG)
		.with_test_writer()
		.try_init();
}

/// Both realms wired to one channel.
pub struct Loopback {
	pub channel: Channel,
	pub correlator: Correlator,
	pub provider: ScriptedProvider,
	pub handle: DispatcherHandle,
}

pub fn loopback(provider: ScriptedProvider) -> Loopback {
	loopback_with(provider, CorrelatorConfig::default())
}

pub fn loopback_with(provider: ScriptedProvider, config: CorrelatorConfig) -> Loopback {
	init_tracing();
	let channel = Channel::new(64);
	let handle = Dispatcher::new(channel.clone(), Arc::new(provider.clone())).spawn();
	Loopback {
		correlator: Correlator::with_config(channel.clone(), config),
		channel,
		provider,
		handle,
	}
}

pub fn script(script: Value) -> ScriptedProvider {
	ScriptedProvider::from_json(&script.to_string()).unwrap()
}

/// Waits until the provider has recorded at least one event matching `predicate`.
pub async fn wait_for(provider: &ScriptedProvider, predicate: impl Fn(&ScriptEvent) -> bool) {
	tokio::time::timeout(Duration::from_secs(5), async {
		while provider.count(&predicate) == 0 {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("event never recorded");
}

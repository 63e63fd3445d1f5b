//! Bridge configuration shared by both realms.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, DEFAULT_CHANNEL_CAPACITY};
use crate::correlator::{Correlator, CorrelatorConfig};

/// Settings for one channel and the correlators on it.
///
/// ```json
/// { "channelCapacity": 512, "requestTimeoutMs": 30000 }
/// ```
///
/// Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
	/// Envelopes a subscription may fall behind by before it loses some.
	pub channel_capacity: usize,
	/// Upper bound on one request/response wait. Unbounded when unset.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub request_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self {
			channel_capacity: DEFAULT_CHANNEL_CAPACITY,
			request_timeout_ms: None,
		}
	}
}

impl BridgeConfig {
	pub fn request_timeout(&self) -> Option<Duration> {
		self.request_timeout_ms.map(Duration::from_millis)
	}

	pub fn correlator_config(&self) -> CorrelatorConfig {
		CorrelatorConfig {
			request_timeout: self.request_timeout(),
		}
	}

	pub fn channel(&self) -> Channel {
		Channel::new(self.channel_capacity)
	}

	pub fn correlator(&self, channel: Channel) -> Correlator {
		Correlator::with_config(channel, self.correlator_config())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn empty_object_uses_defaults() {
		let config: BridgeConfig = serde_json::from_value(json!({})).unwrap();
		assert_eq!(config, BridgeConfig::default());
		assert_eq!(config.channel_capacity, 256);
		assert!(config.request_timeout().is_none());
	}

	#[test]
	fn timeout_is_read_in_milliseconds() {
		let config: BridgeConfig = serde_json::from_value(json!({"requestTimeoutMs": 1500})).unwrap();
		assert_eq!(config.correlator_config().request_timeout, Some(Duration::from_millis(1500)));
	}
}

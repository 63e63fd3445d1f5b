// pagebridge: request/response and streaming bridge between a privileged
// realm and a page realm that share nothing but a broadcast channel.
//
// The content realm talks through a `Correlator` and its typed clients; the
// page realm runs a `Dispatcher` over a `CapabilityProvider`. Both ends may
// live in one process on one `Channel`.

pub mod channel;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod fingerprint;
pub mod host;
pub mod scripted;
pub mod session;
pub mod stream;

pub use channel::{Channel, DEFAULT_CHANNEL_CAPACITY, Subscription};
pub use client::CapabilityClient;
pub use config::BridgeConfig;
pub use correlator::{Correlator, CorrelatorConfig};
pub use dispatcher::{Dispatcher, DispatcherHandle};
pub use error::{Error, Result};
pub use executor::OperationExecutor;
pub use fingerprint::Fingerprint;
pub use host::{
	AvailabilityOptions, CapabilityProvider, CapabilityRegistry, CreateOptions, DownloadMonitor, HostError,
	ModelFactory, ModelSession, TextStream,
};
pub use pagebridge_protocol as protocol;
pub use scripted::{CapabilityScript, Script, ScriptEvent, ScriptedProvider, ScriptedReply};
pub use session::{Reconcile, SessionManager, SessionOutcome, reconcile};
pub use stream::StreamRelay;

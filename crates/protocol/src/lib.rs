//! Wire types for the pagebridge protocol.
//!
//! This crate contains the serde-serializable envelopes exchanged between the
//! privileged content realm and the page realm over a single untyped broadcast
//! channel. These types represent the "protocol layer" - the shapes of data as
//! they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and the
//!   mapping of capability payloads onto host options
//! * Validated on receipt: every inbound broadcast is parsed into one of these
//!   types before any field is trusted; a failed parse means "not for me"
//! * Stable: Changes only when the wire protocol changes
//!
//! Correlation, streaming, and session handling are built on top of these
//! types in `pagebridge`.

pub mod config;
pub mod envelope;
pub mod kind;
pub mod language_model;
pub mod result;
pub mod summarizer;
pub mod translator;
pub mod writing;

pub use config::*;
pub use envelope::*;
pub use kind::*;
pub use language_model::*;
pub use result::*;
pub use summarizer::*;
pub use translator::*;
pub use writing::*;

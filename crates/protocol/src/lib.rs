//! Wire types for the driver channel protocol.
//!
//! This crate contains the serde-serializable envelopes exchanged with the
//! automation driver over a single duplex channel. These types represent the
//! "protocol layer" - the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **Reference-free**: Object references appear as `{"guid": ...}` values;
//!   resolving them to live proxies is the runtime's job
//! - **Stable**: Changes only when the wire protocol changes

pub mod control;
pub mod message;
pub mod metadata;

pub use control::*;
pub use message::*;
pub use metadata::*;

//! Transport contract between the connection and the driver.
//!
//! A transport is split in two halves plus a channel:
//! - [`Transport`] writes outbound envelopes, driven by the connection's writer task
//! - [`TransportReceiver`] pumps inbound envelopes into `message_rx` until the
//!   peer goes away
//!
//! The connection only sees [`TransportParts`], so any duplex message channel
//! can back a session.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

mod memory;
mod pipe;


pub use memory::{MemoryPeer, MemoryPeerSender, MemoryTransport};
pub use pipe::{PipeTransport, PipeTransportReceiver, PipeTransportSender};

/// Outbound half of a transport.
pub trait Transport: Send {
	/// Delivers one envelope to the driver.
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;
}

/// Inbound half of a transport.
pub trait TransportReceiver: Send {
	/// Reads envelopes until the peer closes or an unrecoverable error occurs.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Everything a [`Connection`](crate::Connection) needs from a transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

impl std::fmt::Debug for TransportParts {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TransportParts").finish_non_exhaustive()
	}
}

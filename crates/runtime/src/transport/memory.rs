//! In-process transport.
//!
//! [`MemoryTransport::pair`] returns the connection side as [`TransportParts`]
//! and the driver side as a [`MemoryPeer`]. Envelopes are passed as values, so
//! no framing is involved. Dropping the peer (or its sender) closes the
//! connection's inbound stream, which ends the dispatch loop.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{Transport, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Constructor for in-process transport pairs.
#[derive(Debug, Clone, Copy)]
pub struct MemoryTransport;

impl MemoryTransport {
	pub fn pair() -> (TransportParts, MemoryPeer) {
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

		let parts = TransportParts {
			sender: Box::new(MemorySender { tx: outbound_tx }),
			receiver: Box::new(MemoryReceiver),
			message_rx: inbound_rx,
		};
		let peer = MemoryPeer {
			incoming: outbound_rx,
			sender: MemoryPeerSender { tx: inbound_tx },
		};
		(parts, peer)
	}
}

struct MemorySender {
	tx: mpsc::UnboundedSender<Value>,
}

impl Transport for MemorySender {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		let result = self
			.tx
			.send(message)
			.map_err(|_| Error::TransportError("peer disconnected".into()));
		async move { result }.boxed()
	}
}

/// Inbound envelopes are pushed straight into `message_rx` by the peer.
struct MemoryReceiver;

impl TransportReceiver for MemoryReceiver {
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		async { Ok(()) }.boxed()
	}
}

/// Driver side of an in-process transport.
#[derive(Debug)]
pub struct MemoryPeer {
	incoming: mpsc::UnboundedReceiver<Value>,
	sender: MemoryPeerSender,
}

impl MemoryPeer {
	/// Next envelope sent by the connection, or `None` once it is gone.
	pub async fn recv(&mut self) -> Option<Value> {
		self.incoming.recv().await
	}

	/// Delivers an envelope to the connection.
	pub fn send(&self, message: Value) -> Result<()> {
		self.sender.send(message)
	}

	/// Returns a cloneable handle for delivering envelopes.
	pub fn sender(&self) -> MemoryPeerSender {
		self.sender.clone()
	}

	pub fn split(self) -> (MemoryPeerSender, mpsc::UnboundedReceiver<Value>) {
		(self.sender, self.incoming)
	}
}

/// Cloneable handle delivering envelopes to the connection.
#[derive(Debug, Clone)]
pub struct MemoryPeerSender {
	tx: mpsc::UnboundedSender<Value>,
}

impl MemoryPeerSender {
	pub fn send(&self, message: Value) -> Result<()> {
		self.tx
			.send(message)
			.map_err(|_| Error::TransportError("connection is no longer reading".into()))
	}
}

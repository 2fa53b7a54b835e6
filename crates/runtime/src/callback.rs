//! Pending-call slots and the caller-side handle awaiting them.
//!
//! Every outbound call registers a [`PendingCall`] in the connection's
//! [`CallbackTable`] before its envelope is queued. The dispatcher removes the
//! entry when the matching response arrives, so each slot is resolved at most
//! once. [`ProtocolCallback::get_result`] races the slot against the
//! connection's abort token.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::value::LocalValue;

/// Outcome delivered to an awaiting caller.
pub(crate) type CallResult = Result<Option<LocalValue>>;

/// Table entry for one in-flight call id.
pub(crate) enum PendingCall {
	/// Fire-and-forget; a response (if any) is discarded.
	NoReply,
	/// A caller is waiting on the receiving half.
	Awaiting(oneshot::Sender<CallResult>),
	/// The caller gave up; a late response is discarded.
	Abandoned,
}

impl std::fmt::Debug for PendingCall {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			PendingCall::NoReply => "NoReply",
			PendingCall::Awaiting(_) => "Awaiting",
			PendingCall::Abandoned => "Abandoned",
		})
	}
}

/// Pending calls keyed by request id, shared by callers and the dispatcher.
pub(crate) type CallbackTable = Arc<DashMap<u32, PendingCall>>;

/// Marks the table entry abandoned if the caller drops before completion.
struct CancelGuard {
	id: u32,
	callbacks: CallbackTable,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackTable) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}
		if let Some(mut entry) = self.callbacks.get_mut(&self.id) {
			if matches!(*entry, PendingCall::Awaiting(_)) {
				*entry = PendingCall::Abandoned;
				tracing::debug!(id = self.id, "caller dropped pending call");
			}
		}
	}
}

enum CallbackState {
	NoReply,
	Pending {
		rx: oneshot::Receiver<CallResult>,
		abort: CancellationToken,
		guard: CancelGuard,
	},
}

/// Handle to the result of one outbound call.
#[must_use = "a callback does nothing unless its result is awaited"]
pub struct ProtocolCallback {
	id: u32,
	state: CallbackState,
}

impl ProtocolCallback {
	pub(crate) fn no_reply(id: u32) -> Self {
		Self {
			id,
			state: CallbackState::NoReply,
		}
	}

	pub(crate) fn pending(
		id: u32,
		rx: oneshot::Receiver<CallResult>,
		abort: CancellationToken,
		callbacks: CallbackTable,
	) -> Self {
		Self {
			id,
			state: CallbackState::Pending {
				rx,
				abort,
				guard: CancelGuard::new(id, callbacks),
			},
		}
	}

	/// Request id this callback is correlated by.
	pub fn id(&self) -> u32 {
		self.id
	}

	pub fn is_no_reply(&self) -> bool {
		matches!(self.state, CallbackState::NoReply)
	}

	/// Waits for the response, or for the connection to abort.
	///
	/// A no-reply callback resolves to `Ok(None)` immediately.
	pub async fn get_result(self) -> Result<Option<LocalValue>> {
		let CallbackState::Pending { rx, abort, mut guard } = self.state else {
			return Ok(None);
		};

		let outcome = tokio::select! {
			biased;
			result = rx => result.unwrap_or(Err(Error::ConnectionClosed)),
			_ = abort.cancelled() => Err(Error::ConnectionClosed),
		};
		guard.complete();
		outcome
	}
}

impl std::fmt::Debug for ProtocolCallback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ProtocolCallback")
			.field("id", &self.id)
			.field("no_reply", &self.is_no_reply())
			.finish()
	}
}

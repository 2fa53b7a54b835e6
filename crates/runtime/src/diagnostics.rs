//! Diagnostic sink for captured call stacks.
//!
//! While a tracing session is active the connection forwards the caller frames
//! of every outbound call to a [`DiagnosticSink`], keyed by request id, so the
//! trace viewer can show where each call came from.

use tether_protocol::StackFrame;

use crate::channel::Channel;
use crate::channel_owner::ChannelOwner;
use crate::value::{LocalValue, Mapping};

/// Method used to deliver a call stack to the driver's utilities object.
pub const ADD_STACK_METHOD: &str = "addStackToTracingNoReply";

/// Receiver for call stacks captured while tracing.
pub trait DiagnosticSink: Send + Sync {
	/// Guid of the remote object backing this sink; calls to it are never
	/// forwarded, which would recurse.
	fn guid(&self) -> &str;

	/// Records the caller frames of request `id`.
	fn add_stack(&self, id: u32, frames: Vec<StackFrame>);
}

/// Sink that forwards stacks to a remote utilities object.
#[derive(Debug, Clone)]
pub struct ChannelDiagnosticSink {
	channel: Channel,
}

impl ChannelDiagnosticSink {
	pub fn new(owner: &ChannelOwner) -> Self {
		Self {
			channel: owner.channel().clone(),
		}
	}
}

impl DiagnosticSink for ChannelDiagnosticSink {
	fn guid(&self) -> &str {
		self.channel.guid()
	}

	fn add_stack(&self, id: u32, frames: Vec<StackFrame>) {
		let stack = match LocalValue::from_serialize(&frames) {
			Ok(stack) => stack,
			Err(err) => {
				tracing::warn!(id, error = %err, "failed to encode call stack");
				return;
			}
		};

		let mut call_data = Mapping::new();
		call_data.insert("stack".into(), stack);
		call_data.insert("id".into(), LocalValue::from(id));

		let mut params = Mapping::new();
		params.insert("callData".into(), LocalValue::Object(call_data));

		self.channel.send_no_reply_internal(ADD_STACK_METHOD, LocalValue::Object(params));
	}
}

//! Error types for the driver channel runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the driver channel runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// The connection was aborted; every outstanding call fails with this.
	#[error("Connection closed")]
	ConnectionClosed,

	/// Failed to establish the session (root initialization failed).
	#[error("Failed to connect to driver: {0}")]
	ConnectionFailed(String),

	/// Transport-level error while writing or reading envelopes.
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level inconsistency (malformed control message, unknown call id).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Remote driver error with full context.
	#[error("{name}: {message}")]
	Remote {
		/// Error type name (e.g., "TimeoutError", "Error", "TargetClosedError")
		name: String,
		/// Human-readable error message
		message: String,
		/// Stack trace reported by the driver (if available)
		stack: Option<String>,
	},

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Object not found in the connection directory.
	#[error("Object not found: {guid}")]
	ObjectNotFound { guid: String },

	/// Factory has no constructor for the announced type.
	#[error("Unknown protocol object type: {0}")]
	UnknownObjectType(String),

	/// Event payload did not match the typed event it was routed to.
	#[error("Invalid payload for event '{event}': {reason}")]
	InvalidEventPayload { event: String, reason: String },

	/// Invalid argument provided to method.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	/// Invalid configuration value.
	#[error("Invalid configuration: {0}")]
	Config(String),
}

impl Error {
	/// Returns the error name if this is a Remote error.
	pub fn error_name(&self) -> Option<&str> {
		match self {
			Error::Remote { name, .. } => Some(name),
			_ => None,
		}
	}

	/// Returns the stack trace if this is a Remote error with a stack.
	pub fn stack_trace(&self) -> Option<&str> {
		match self {
			Error::Remote { stack, .. } => stack.as_deref(),
			_ => None,
		}
	}

	/// Returns true if the driver reported a timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Remote { name, .. } if name == "TimeoutError")
	}

	/// Returns true if the driver reported that the target was closed.
	pub fn is_target_closed(&self) -> bool {
		matches!(self, Error::Remote { name, .. } if name == "TargetClosedError")
	}

	/// Returns true if this is the canonical closed-connection error.
	pub fn is_connection_closed(&self) -> bool {
		matches!(self, Error::ConnectionClosed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_remote_error_displays_name_and_message() {
		let err = Error::Remote {
			name: "TimeoutError".into(),
			message: "Timeout 30000ms exceeded".into(),
			stack: Some("at page.goto".into()),
		};
		assert_eq!(err.to_string(), "TimeoutError: Timeout 30000ms exceeded");
		assert!(err.is_timeout());
		assert!(!err.is_target_closed());
		assert_eq!(err.stack_trace(), Some("at page.goto"));
	}

	#[test]
	fn test_object_not_found_names_guid() {
		let err = Error::ObjectNotFound { guid: "page@1".into() };
		assert_eq!(err.to_string(), "Object not found: page@1");
	}

	#[test]
	fn test_connection_closed_is_canonical() {
		assert_eq!(Error::ConnectionClosed.to_string(), "Connection closed");
		assert!(Error::ConnectionClosed.is_connection_closed());
	}
}

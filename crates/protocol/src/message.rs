//! Request, response and event envelopes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metadata::Metadata;

/// Outbound call sent to the driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Call id used to correlate the response.
	pub id: u32,
	/// Identifier of the target object (format: "type@hash", `""` for the root).
	#[serde(
		serialize_with = "serialize_arc_str",
		deserialize_with = "deserialize_arc_str"
	)]
	pub guid: Arc<str>,
	/// Method name to invoke.
	pub method: String,
	/// Encoded parameters; object references are already `{"guid": ...}`.
	pub params: Value,
	/// Per-call diagnostic metadata.
	pub metadata: Metadata,
}

/// Serde helpers for `Arc<str>` serialization
pub fn serialize_arc_str<S>(arc: &Arc<str>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: serde::Serializer,
{
	serializer.serialize_str(arc)
}

pub fn deserialize_arc_str<'de, D>(deserializer: D) -> std::result::Result<Arc<str>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s: String = serde::Deserialize::deserialize(deserializer)?;
	Ok(Arc::from(s))
}

/// Response to an earlier [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Id of the request this response answers.
	pub id: u32,
	/// Success result (mutually exclusive with error).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	/// Error result (mutually exclusive with result).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorWrapper>,
}

/// Wrapper for the remote error payload.
///
/// Thrown errors arrive as `{"error": {...}}`; any other thrown value arrives
/// serialized as `{"value": ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorWrapper {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub value: Option<Value>,
}

/// Remote error details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Error message; empty when the driver sent none.
	#[serde(default)]
	pub message: String,
	/// Error type name (e.g., "TimeoutError", "TargetClosedError").
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Stack trace from the driver.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

/// Notification addressed to an object by guid.
///
/// Carries either one of the control verbs from [`crate::control`] or a
/// domain event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	/// Guid of the addressed object.
	#[serde(
		serialize_with = "serialize_arc_str",
		deserialize_with = "deserialize_arc_str"
	)]
	pub guid: Arc<str>,
	/// Control verb or event name.
	pub method: String,
	/// Event parameters (`null` when absent, e.g. for `__dispose__`).
	#[serde(default)]
	pub params: Value,
}

/// Discriminated union of inbound messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (has `guid` and `method`)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_response_with_result_parses_as_response() {
		let json = r#"{"id": 42, "result": {"status": "ok"}}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		match message {
			Message::Response(response) => {
				assert_eq!(response.id, 42);
				assert!(response.result.is_some());
				assert!(response.error.is_none());
			}
			other => panic!("Expected Response, got {other:?}"),
		}
	}

	#[test]
	fn test_response_with_error_keeps_name_and_stack() {
		let json = r#"{"id": 3, "error": {"error": {"name": "TimeoutError", "message": "slow", "stack": "at x"}}}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		let Message::Response(response) = message else {
			panic!("Expected Response");
		};
		let payload = response.error.unwrap().error.unwrap();
		assert_eq!(payload.name.as_deref(), Some("TimeoutError"));
		assert_eq!(payload.message, "slow");
		assert_eq!(payload.stack.as_deref(), Some("at x"));
	}

	#[test]
	fn test_response_with_thrown_value_parses_as_response() {
		let json = r#"{"id": 4, "error": {"value": {"s": "boom"}}}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		let Message::Response(response) = message else {
			panic!("Expected Response");
		};
		let wrapper = response.error.unwrap();
		assert!(wrapper.error.is_none());
		assert_eq!(wrapper.value, Some(serde_json::json!({"s": "boom"})));
	}

	#[test]
	fn test_error_without_message_parses_as_response() {
		let json = r#"{"id": 5, "error": {"error": {"name": "Error", "stack": "at y"}}}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		let Message::Response(response) = message else {
			panic!("Expected Response");
		};
		let payload = response.error.unwrap().error.unwrap();
		assert_eq!(payload.message, "");
		assert_eq!(payload.stack.as_deref(), Some("at y"));
	}

	#[test]
	fn test_notification_parses_as_event() {
		let json = r#"{"guid": "page@abc", "method": "console", "params": {"text": "hello"}}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		match message {
			Message::Event(event) => {
				assert_eq!(event.guid.as_ref(), "page@abc");
				assert_eq!(event.method, "console");
				assert_eq!(event.params["text"], "hello");
			}
			other => panic!("Expected Event, got {other:?}"),
		}
	}

	#[test]
	fn test_dispose_without_params_defaults_to_null() {
		let json = r#"{"guid": "page@abc", "method": "__dispose__"}"#;
		let message: Message = serde_json::from_str(json).unwrap();

		let Message::Event(event) = message else {
			panic!("Expected Event");
		};
		assert!(event.params.is_null());
	}

	#[test]
	fn test_unrecognised_shape_falls_back_to_unknown() {
		let message: Message = serde_json::from_str(r#"{"hello": "world"}"#).unwrap();
		assert!(matches!(message, Message::Unknown(_)));
	}

	#[test]
	fn test_request_serializes_guid_as_plain_string() {
		let request = Request {
			id: 7,
			guid: Arc::from("browser@1"),
			method: "newContext".into(),
			params: serde_json::json!({}),
			metadata: Metadata::at(1_700_000_000_000),
		};

		let value = serde_json::to_value(&request).unwrap();
		assert_eq!(value["id"], 7);
		assert_eq!(value["guid"], "browser@1");
		assert_eq!(value["metadata"]["wallTime"], 1_700_000_000_000i64);
		assert!(value["metadata"].get("apiName").is_none());
	}
}

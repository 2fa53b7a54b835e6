//! Diagnostic metadata attached to every outbound call.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Metadata attached to every protocol request
///
/// Contains timing information and, when a call stack was captured, the
/// derived API name and caller location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
	/// Unix timestamp in milliseconds
	#[serde(rename = "wallTime")]
	pub wall_time: i64,
	/// Human-readable operation name (e.g. "Browser.new_context")
	#[serde(rename = "apiName", skip_serializing_if = "Option::is_none")]
	pub api_name: Option<String>,
	/// Whether this is an internal call (not user-facing API)
	#[serde(rename = "isInternal", skip_serializing_if = "Option::is_none")]
	pub is_internal: Option<bool>,
	/// Source location where the API was called
	#[serde(skip_serializing_if = "Option::is_none")]
	pub location: Option<Location>,
}

impl Metadata {
	/// Minimal metadata carrying only the current wall time.
	pub fn now() -> Self {
		Self::at(wall_time_millis())
	}

	/// Minimal metadata stamped with the given wall time.
	pub fn at(wall_time: i64) -> Self {
		Self {
			wall_time,
			..Self::default()
		}
	}
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn wall_time_millis() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as i64)
		.unwrap_or_default()
}

/// Source code location for a protocol call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
	/// Source file path
	pub file: String,
	/// Line number (1-indexed)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub line: Option<u32>,
	/// Column number (1-indexed)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub column: Option<u32>,
}

/// One caller frame forwarded to the tracing sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
	pub file: String,
	pub line: u32,
	pub column: u32,
	pub function: String,
}

impl StackFrame {
	pub fn location(&self) -> Location {
		Location {
			file: self.file.clone(),
			line: Some(self.line),
			column: (self.column > 0).then_some(self.column),
		}
	}
}

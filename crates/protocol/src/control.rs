//! Control verbs that maintain the remote-object tree.
//!
//! The driver announces object lifecycle changes with three reserved method
//! names. Any other method on a guid-addressed message is a domain event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A new object was created as a child of the addressed object.
pub const CREATE: &str = "__create__";
/// An existing object moved under the addressed object.
pub const ADOPT: &str = "__adopt__";
/// The addressed object and all its descendants are gone.
pub const DISPOSE: &str = "__dispose__";

/// Params of a `__create__` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateParams {
	/// Declared protocol type (e.g. "Browser").
	#[serde(rename = "type")]
	pub type_name: String,
	/// Guid of the new object.
	pub guid: String,
	/// Construction snapshot; may contain `{"guid"}` references.
	#[serde(default)]
	pub initializer: Value,
}

/// Params of an `__adopt__` notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdoptParams {
	/// Guid of the child being moved.
	pub guid: String,
}

/// Params of a `__dispose__` notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisposeParams {
	/// `"gc"` when the driver collected the object.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl DisposeParams {
	pub fn is_gc(&self) -> bool {
		self.reason.as_deref() == Some("gc")
	}
}

//! Value codec between wire values and [`LocalValue`].
//!
//! Outbound, every [`LocalValue::Remote`] becomes `{"guid": "<id>"}`. Inbound,
//! every mapping whose `"guid"` names an object in the directory becomes a
//! [`LocalValue::Remote`] holding that very object; mappings with an unknown
//! or non-string `"guid"` are decoded as ordinary mappings.

use serde_json::{Map, Value};

use crate::connection::ObjectStore;
use crate::value::LocalValue;

/// Encodes a local value for the wire, replacing references with guids.
pub fn encode(value: &LocalValue) -> Value {
	match value {
		LocalValue::Null => Value::Null,
		LocalValue::Bool(b) => Value::Bool(*b),
		LocalValue::Number(n) => Value::Number(n.clone()),
		LocalValue::String(s) => Value::String(s.clone()),
		LocalValue::Array(items) => Value::Array(items.iter().map(encode).collect()),
		LocalValue::Object(map) => Value::Object(
			map.iter()
				.map(|(k, v)| (k.clone(), encode(v)))
				.collect::<Map<String, Value>>(),
		),
		LocalValue::Remote(owner) => guid_ref(owner.guid()),
	}
}

/// Decodes a wire value, resolving guid references against `objects`.
pub fn decode(value: Value, objects: &ObjectStore) -> LocalValue {
	match value {
		Value::Null => LocalValue::Null,
		Value::Bool(b) => LocalValue::Bool(b),
		Value::Number(n) => LocalValue::Number(n),
		Value::String(s) => LocalValue::String(s),
		Value::Array(items) => LocalValue::Array(items.into_iter().map(|v| decode(v, objects)).collect()),
		Value::Object(map) => {
			if let Some(owner) = map.get("guid").and_then(Value::as_str).and_then(|guid| objects.get(guid)) {
				return LocalValue::Remote(owner);
			}
			LocalValue::Object(map.into_iter().map(|(k, v)| (k, decode(v, objects))).collect())
		}
	}
}

/// Decodes without resolving references, for payloads outside the object graph.
pub fn decode_passthrough(value: Value) -> LocalValue {
	LocalValue::from(value)
}

/// The wire form of a reference to `guid`.
pub fn guid_ref(guid: &str) -> Value {
	let mut map = Map::with_capacity(1);
	map.insert("guid".to_string(), Value::String(guid.to_string()));
	Value::Object(map)
}

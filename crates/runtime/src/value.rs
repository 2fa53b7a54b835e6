//! Local values: wire values with object references materialized.
//!
//! [`LocalValue`] is the tagged variant every payload is converted into at the
//! marshal boundary. It mirrors JSON plus one extra case, [`LocalValue::Remote`],
//! holding a live [`ChannelOwner`] where the wire carries `{"guid": ...}`.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::{Number, Value};

use crate::channel_owner::{ChannelOwner, RemoteObject};
use crate::codec;
use crate::error::Result;

/// String-keyed mapping that keeps wire order.
pub type Mapping = IndexMap<String, LocalValue>;

/// A protocol value whose object references are live proxies.
#[derive(Clone, Default)]
pub enum LocalValue {
	#[default]
	Null,
	Bool(bool),
	Number(Number),
	String(String),
	Array(Vec<LocalValue>),
	Object(Mapping),
	/// Reference to a remote object, by identity.
	Remote(Arc<ChannelOwner>),
}

impl LocalValue {
	/// Converts any serializable value. The result never contains references.
	pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
		Ok(Self::from(serde_json::to_value(value)?))
	}

	/// Deserializes into `T`, with references appearing as `{"guid": ...}`.
	pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
		Ok(serde_json::from_value(codec::encode(self))?)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, LocalValue::Null)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			LocalValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			LocalValue::Number(n) => n.as_i64(),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			LocalValue::Number(n) => n.as_f64(),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			LocalValue::String(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_array(&self) -> Option<&[LocalValue]> {
		match self {
			LocalValue::Array(items) => Some(items),
			_ => None,
		}
	}

	pub fn as_object(&self) -> Option<&Mapping> {
		match self {
			LocalValue::Object(map) => Some(map),
			_ => None,
		}
	}

	pub fn as_remote(&self) -> Option<&Arc<ChannelOwner>> {
		match self {
			LocalValue::Remote(owner) => Some(owner),
			_ => None,
		}
	}

	/// Looks up `key` if this is a mapping.
	pub fn get(&self, key: &str) -> Option<&LocalValue> {
		self.as_object().and_then(|map| map.get(key))
	}

	/// Returns the domain wrapper of a referenced object, if it is a `T`.
	pub fn remote_object<T: RemoteObject>(&self) -> Option<Arc<T>> {
		self.as_remote().and_then(|owner| owner.object::<T>())
	}
}

impl PartialEq for LocalValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(LocalValue::Null, LocalValue::Null) => true,
			(LocalValue::Bool(a), LocalValue::Bool(b)) => a == b,
			(LocalValue::Number(a), LocalValue::Number(b)) => a == b,
			(LocalValue::String(a), LocalValue::String(b)) => a == b,
			(LocalValue::Array(a), LocalValue::Array(b)) => a == b,
			(LocalValue::Object(a), LocalValue::Object(b)) => a == b,
			(LocalValue::Remote(a), LocalValue::Remote(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl fmt::Debug for LocalValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LocalValue::Null => f.write_str("Null"),
			LocalValue::Bool(b) => write!(f, "Bool({b})"),
			LocalValue::Number(n) => write!(f, "Number({n})"),
			LocalValue::String(s) => write!(f, "String({s:?})"),
			LocalValue::Array(items) => f.debug_list().entries(items).finish(),
			LocalValue::Object(map) => f.debug_map().entries(map.iter()).finish(),
			LocalValue::Remote(owner) => write!(f, "Remote({}@{:?})", owner.type_name(), owner.guid()),
		}
	}
}

impl Serialize for LocalValue {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		codec::encode(self).serialize(serializer)
	}
}

/// Plain conversion: `{"guid"}` mappings stay mappings.
impl From<Value> for LocalValue {
	fn from(value: Value) -> Self {
		match value {
			Value::Null => LocalValue::Null,
			Value::Bool(b) => LocalValue::Bool(b),
			Value::Number(n) => LocalValue::Number(n),
			Value::String(s) => LocalValue::String(s),
			Value::Array(items) => LocalValue::Array(items.into_iter().map(LocalValue::from).collect()),
			Value::Object(map) => LocalValue::Object(
				map.into_iter()
					.map(|(k, v)| (k, LocalValue::from(v)))
					.collect(),
			),
		}
	}
}

impl From<bool> for LocalValue {
	fn from(b: bool) -> Self {
		LocalValue::Bool(b)
	}
}

impl From<i64> for LocalValue {
	fn from(n: i64) -> Self {
		LocalValue::Number(n.into())
	}
}

impl From<u32> for LocalValue {
	fn from(n: u32) -> Self {
		LocalValue::Number(n.into())
	}
}

/// Non-finite floats have no JSON form and become `Null`.
impl From<f64> for LocalValue {
	fn from(n: f64) -> Self {
		Number::from_f64(n).map_or(LocalValue::Null, LocalValue::Number)
	}
}

impl From<&str> for LocalValue {
	fn from(s: &str) -> Self {
		LocalValue::String(s.to_string())
	}
}

impl From<String> for LocalValue {
	fn from(s: String) -> Self {
		LocalValue::String(s)
	}
}

impl From<Vec<LocalValue>> for LocalValue {
	fn from(items: Vec<LocalValue>) -> Self {
		LocalValue::Array(items)
	}
}

impl From<Mapping> for LocalValue {
	fn from(map: Mapping) -> Self {
		LocalValue::Object(map)
	}
}

impl From<Arc<ChannelOwner>> for LocalValue {
	fn from(owner: Arc<ChannelOwner>) -> Self {
		LocalValue::Remote(owner)
	}
}

impl From<&Arc<ChannelOwner>> for LocalValue {
	fn from(owner: &Arc<ChannelOwner>) -> Self {
		LocalValue::Remote(Arc::clone(owner))
	}
}

impl<T: Into<LocalValue>> From<Option<T>> for LocalValue {
	fn from(value: Option<T>) -> Self {
		value.map_or(LocalValue::Null, Into::into)
	}
}

impl<K: Into<String>, V: Into<LocalValue>> FromIterator<(K, V)> for LocalValue {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		LocalValue::Object(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

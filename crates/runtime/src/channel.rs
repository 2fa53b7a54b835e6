//! Channel - RPC and event endpoint for one remote object.
//!
//! The Channel sends method calls to the driver on behalf of its
//! [`ChannelOwner`](crate::ChannelOwner) and fans inbound events out to
//! registered handlers. It only holds a weak link to the connection, so calls
//! made after the connection is gone fail with [`Error::ConnectionClosed`].

use std::panic::Location;
use std::sync::{Arc, OnceLock, Weak};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::channel_owner::RemoteObject;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::events::{EventRegistry, EventSet, Subscription};
use crate::stack::ParsedStackTrace;
use crate::value::LocalValue;
use crate::zone;

/// RPC and event endpoint bound to one guid.
#[derive(Clone)]
pub struct Channel {
	guid: Arc<str>,
	connection: Weak<Connection>,
	events: Arc<EventRegistry>,
	object: Arc<OnceLock<Arc<dyn RemoteObject>>>,
}

impl Channel {
	pub(crate) fn new(guid: Arc<str>, connection: Weak<Connection>) -> Self {
		Self {
			guid,
			connection,
			events: Arc::new(EventRegistry::new()),
			object: Arc::new(OnceLock::new()),
		}
	}

	/// Returns the GUID this channel represents.
	pub fn guid(&self) -> &str {
		&self.guid
	}

	/// Returns the owning connection, or `ConnectionClosed` once it is gone.
	pub fn connection(&self) -> Result<Arc<Connection>> {
		self.connection.upgrade().ok_or(Error::ConnectionClosed)
	}

	pub(crate) fn connection_ref(&self) -> Weak<Connection> {
		self.connection.clone()
	}

	/// Sends a method call and awaits the result.
	///
	/// A single-entry result mapping is unwrapped to its value; a null, absent
	/// or empty result is `None`. Other results are returned as they are.
	#[track_caller]
	pub fn send(&self, method: &str, params: impl Into<LocalValue>) -> BoxFuture<'static, Result<Option<LocalValue>>> {
		let call = self.call(method, params.into(), false, Location::caller());
		async move { Ok(call.await?.and_then(unwrap_single)) }.boxed()
	}

	/// Sends a method call and deserializes the unwrapped result into `R`.
	#[track_caller]
	pub fn send_as<R: DeserializeOwned>(
		&self,
		method: &str,
		params: impl Into<LocalValue>,
	) -> BoxFuture<'static, Result<R>> {
		let call = self.send(method, params);
		async move { call.await?.unwrap_or_default().deserialize() }.boxed()
	}

	/// Sends an internal method call and returns the full result mapping.
	#[track_caller]
	pub fn send_return_as_dict(
		&self,
		method: &str,
		params: impl Into<LocalValue>,
	) -> BoxFuture<'static, Result<LocalValue>> {
		let call = self.call(method, params.into(), true, Location::caller());
		async move { Ok(call.await?.unwrap_or_default()) }.boxed()
	}

	/// Queues a call without waiting for a response.
	///
	/// Failures are logged, never returned.
	#[track_caller]
	pub fn send_no_reply(&self, method: &str, params: impl Into<LocalValue>) {
		let caller = Location::caller();
		let Some(connection) = self.connection.upgrade() else {
			tracing::warn!(guid = %self.guid, method, "dropping no-reply call: connection closed");
			return;
		};
		let staged = connection.stage_call(caller, false).or_else(zone::take);
		if let Err(err) = connection.send_staged(&self.guid, method, &params.into(), true, staged) {
			tracing::warn!(guid = %self.guid, method, error = %err, "no-reply call failed");
		}
	}

	/// Fire-and-forget call that never consumes the caller's staged metadata.
	pub(crate) fn send_no_reply_internal(&self, method: &str, params: LocalValue) {
		let Some(connection) = self.connection.upgrade() else {
			return;
		};
		let staged = ParsedStackTrace {
			is_internal: true,
			..ParsedStackTrace::default()
		};
		if let Err(err) = connection.send_staged(&self.guid, method, &params, true, Some(staged)) {
			tracing::warn!(guid = %self.guid, method, error = %err, "internal no-reply call failed");
		}
	}

	fn call(
		&self,
		method: &str,
		params: LocalValue,
		is_internal: bool,
		caller: &'static Location<'static>,
	) -> BoxFuture<'static, Result<Option<LocalValue>>> {
		let connection = self.connection.upgrade();
		let staged = connection
			.as_ref()
			.and_then(|c| c.stage_call(caller, is_internal));
		let guid = Arc::clone(&self.guid);
		let method = method.to_string();

		async move {
			let connection = connection.ok_or(Error::ConnectionClosed)?;
			zone::with_zone(staged, async move {
				let callback = connection.send_message_to_server(&guid, &method, &params, false)?;
				callback.get_result().await
			})
			.await
		}
		.boxed()
	}

	/// Registers a handler for the event `name`.
	pub fn on<F>(&self, name: &str, handler: F) -> Subscription
	where
		F: Fn(&LocalValue) + Send + Sync + 'static,
	{
		self.events.add(name, Arc::new(move |_, params| handler(params)))
	}

	/// Registers a typed handler for every event in `E`.
	///
	/// Payloads that fail to decode are logged and skipped.
	pub fn on_event<E, F>(&self, handler: F) -> Subscription
	where
		E: EventSet,
		F: Fn(E) + Send + Sync + 'static,
	{
		let guid = Arc::clone(&self.guid);
		self.events.add_many(
			E::NAMES,
			Arc::new(move |name, params| match E::decode(name, params) {
				Ok(event) => handler(event),
				Err(err) => tracing::warn!(guid = %guid, event = name, error = %err, "skipping undecodable event"),
			}),
		)
	}

	/// Delivers an event to every handler registered for `name`.
	///
	/// Returns the number of handlers that ran.
	pub fn emit(&self, name: &str, params: &LocalValue) -> usize {
		self.events.emit(name, params)
	}

	pub fn listener_count(&self, name: &str) -> usize {
		self.events.listener_count(name)
	}

	/// Attaches the domain wrapper. Only the first call succeeds.
	pub fn set_object(&self, object: Arc<dyn RemoteObject>) -> Result<()> {
		self.object
			.set(object)
			.map_err(|_| Error::InvalidArgument(format!("channel {} already has an object", self.guid)))
	}

	/// Returns the domain wrapper if it is a `T`.
	pub fn object<T: RemoteObject>(&self) -> Option<Arc<T>> {
		self.object
			.get()
			.and_then(|object| Arc::clone(object).downcast_arc::<T>().ok())
	}
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel")
			.field("guid", &self.guid)
			.field("events", &self.events)
			.field("has_object", &self.object.get().is_some())
			.finish()
	}
}

fn unwrap_single(value: LocalValue) -> Option<LocalValue> {
	match value {
		LocalValue::Null => None,
		LocalValue::Object(map) if map.len() <= 1 => map.into_iter().next().map(|(_, v)| v).filter(|v| !v.is_null()),
		other => Some(other),
	}
}

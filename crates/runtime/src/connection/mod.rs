//! Connection - request correlation and the remote-object directory.
//!
//! The connection sits on top of a transport and handles:
//! - Allocating strictly increasing request ids
//! - Correlating responses with pending calls
//! - Maintaining the object tree from `__create__`, `__adopt__` and `__dispose__`
//! - Routing every other notification to the addressed [`Channel`](crate::Channel)
//!
//! # Message Flow
//!
//! 1. A caller's channel stages call-site metadata and calls
//!    [`Connection::send_message_to_server`]
//! 2. The connection allocates an id, registers a pending slot and queues the
//!    envelope for the writer task
//! 3. The caller awaits its [`ProtocolCallback`]
//! 4. The dispatch loop receives the response and resolves the slot by id
//!
//! Only the dispatch loop mutates the directory and the tree; callers only
//! read them.

use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tether_protocol::{
	ADOPT, AdoptParams, CREATE, CreateParams, DISPOSE, DisposeParams, ErrorWrapper, Event, Message, Metadata,
	Request, wall_time_millis,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::callback::{CallbackTable, PendingCall, ProtocolCallback};
use crate::channel_owner::{ChannelOwner, DisposeReason, ROOT_GUID};
use crate::codec;
use crate::config::ConnectionConfig;
use crate::diagnostics::DiagnosticSink;
use crate::error::{Error, Result};
use crate::factory::ObjectFactory;
use crate::stack::{ParsedStackTrace, StackCapturer};
use crate::transport::{Transport, TransportParts, TransportReceiver};
use crate::value::LocalValue;
use crate::zone;

mod object_store;


pub use object_store::ObjectStore;

type ShutdownHook = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Transport halves held until [`Connection::run`] takes them.
struct ConnectionIo {
	sender: Box<dyn Transport>,
	receiver: Box<dyn TransportReceiver>,
	message_rx: mpsc::UnboundedReceiver<Value>,
	outbound_rx: mpsc::UnboundedReceiver<Request>,
}

/// One session with the driver.
pub struct Connection {
	/// Last issued request id; the first id is 1
	last_id: AtomicU32,
	/// Pending calls keyed by request id
	callbacks: CallbackTable,
	objects: ObjectStore,
	root: Arc<ChannelOwner>,
	factory: Arc<dyn ObjectFactory>,
	/// Queue drained by the writer task
	outbound_tx: mpsc::UnboundedSender<Request>,
	io: Mutex<Option<ConnectionIo>>,
	/// Broadcast once on stop or transport loss
	abort: CancellationToken,
	closed: AtomicBool,
	shutdown_hook: Mutex<Option<ShutdownHook>>,
	capturer: StackCapturer,
	config: ConnectionConfig,
	tracing_count: AtomicI32,
	diagnostic_sink: RwLock<Option<Arc<dyn DiagnosticSink>>>,
}

impl Connection {
	/// Creates a connection over `parts` with the root object registered.
	///
	/// Nothing is read or written until [`start`](Self::start) or
	/// [`run`](Self::run) is called.
	pub fn new(parts: TransportParts, factory: Arc<dyn ObjectFactory>, config: ConnectionConfig) -> Result<Arc<Self>> {
		let capturer = StackCapturer::from_config(&config)?;
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

		Ok(Arc::new_cyclic(|weak| {
			let root = ChannelOwner::root(weak.clone());
			let objects = ObjectStore::new();
			objects.insert(Arc::clone(&root));

			Self {
				last_id: AtomicU32::new(0),
				callbacks: CallbackTable::default(),
				objects,
				root,
				factory,
				outbound_tx,
				io: Mutex::new(Some(ConnectionIo {
					sender,
					receiver,
					message_rx,
					outbound_rx,
				})),
				abort: CancellationToken::new(),
				closed: AtomicBool::new(false),
				shutdown_hook: Mutex::new(None),
				capturer,
				config,
				tracing_count: AtomicI32::new(0),
				diagnostic_sink: RwLock::new(None),
			}
		}))
	}

	/// Starts the dispatch loop and initializes the session.
	///
	/// Sends `initialize` to the root and returns the object named by its
	/// single-entry result. Any failure is reported as
	/// [`Error::ConnectionFailed`].
	pub async fn start(self: &Arc<Self>) -> Result<Arc<ChannelOwner>> {
		if self.io.lock().is_some() {
			tokio::spawn(Arc::clone(self).run());
		}

		let params: LocalValue = [("sdkLanguage", self.config.sdk_language.as_str())]
			.into_iter()
			.collect();
		let result = self
			.root
			.channel()
			.send_return_as_dict("initialize", params)
			.await
			.map_err(|e| Error::ConnectionFailed(format!("initialize failed: {e}")))?;

		let remote = result
			.as_object()
			.filter(|map| map.len() == 1)
			.and_then(|map| map.values().next())
			.and_then(LocalValue::as_remote)
			.cloned();
		remote.ok_or_else(|| Error::ConnectionFailed(format!("initialize returned no remote object: {result:?}")))
	}

	/// Runs the shutdown hook, then aborts every outstanding call.
	///
	/// Idempotent. The abort happens even if the hook fails; the hook's error
	/// is returned.
	pub async fn stop(&self) -> Result<()> {
		let hook = self.shutdown_hook.lock().take();
		let outcome = match hook {
			Some(hook) => hook().await,
			None => Ok(()),
		};
		self.cleanup();
		outcome
	}

	/// Installs the hook [`stop`](Self::stop) runs before aborting, typically
	/// terminating the driver process.
	pub fn set_shutdown_hook<F, Fut>(&self, hook: F)
	where
		F: FnOnce() -> Fut + Send + 'static,
		Fut: Future<Output = Result<()>> + Send + 'static,
	{
		*self.shutdown_hook.lock() = Some(Box::new(move || hook().boxed()));
	}

	fn cleanup(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.abort.cancel();
		let pending = self.callbacks.len();
		self.callbacks.clear();
		tracing::debug!(pending, "connection closed");
	}

	/// Returns true once the connection has been aborted.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Sends one call using the metadata staged for the current task.
	///
	/// The pending slot is registered before the envelope is queued, so a
	/// response can never arrive for an unknown id.
	pub fn send_message_to_server(
		&self,
		guid: &str,
		method: &str,
		params: &LocalValue,
		no_reply: bool,
	) -> Result<ProtocolCallback> {
		self.send_staged(guid, method, params, no_reply, zone::take())
	}

	pub(crate) fn send_staged(
		&self,
		guid: &str,
		method: &str,
		params: &LocalValue,
		no_reply: bool,
		staged: Option<ParsedStackTrace>,
	) -> Result<ProtocolCallback> {
		if self.is_closed() {
			return Err(Error::ConnectionClosed);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let wall_time = wall_time_millis();
		let (metadata, frames) = match staged {
			Some(staged) => staged.into_metadata(wall_time),
			None => (Metadata::at(wall_time), Vec::new()),
		};

		let request = Request {
			id,
			guid: Arc::from(guid),
			method: method.to_string(),
			params: match codec::encode(params) {
				Value::Null => Value::Object(serde_json::Map::new()),
				encoded => encoded,
			},
			metadata,
		};

		let callback = if no_reply {
			self.callbacks.insert(id, PendingCall::NoReply);
			ProtocolCallback::no_reply(id)
		} else {
			let (tx, rx) = oneshot::channel();
			self.callbacks.insert(id, PendingCall::Awaiting(tx));
			ProtocolCallback::pending(id, rx, self.abort.clone(), Arc::clone(&self.callbacks))
		};

		tracing::debug!(id, guid, method, no_reply, "sending request");
		if self.outbound_tx.send(request).is_err() {
			self.callbacks.remove(&id);
			tracing::error!(id, guid, method, "failed to queue request: writer is gone");
			return Err(Error::ConnectionClosed);
		}

		if !frames.is_empty() && self.tracing_count.load(Ordering::SeqCst) > 0 {
			let sink = self.diagnostic_sink.read().clone();
			if let Some(sink) = sink.filter(|sink| sink.guid() != guid) {
				sink.add_stack(id, frames);
			}
		}

		Ok(callback)
	}

	/// Runs `fut` as one API call with the caller's call site staged.
	///
	/// Calls made inside `fut` share the staged metadata; the first of them
	/// consumes it. Nested wrappers keep the outermost call site.
	#[track_caller]
	pub fn wrap_api_call<F: Future>(&self, is_internal: bool, fut: F) -> impl Future<Output = F::Output> + use<F> {
		let staged = self.stage_call(Location::caller(), is_internal);
		zone::with_zone(staged, fut)
	}

	/// Captures the call site unless the current task already has one staged.
	pub(crate) fn stage_call(&self, caller: &'static Location<'static>, is_internal: bool) -> Option<ParsedStackTrace> {
		if zone::is_staged() {
			return None;
		}
		Some(self.capturer.capture(caller, is_internal))
	}

	/// Processes one inbound message.
	pub fn dispatch(&self, message: Message) -> Result<()> {
		match message {
			Message::Response(response) => {
				let Some((_, pending)) = self.callbacks.remove(&response.id) else {
					if self.is_closed() {
						tracing::debug!(id = response.id, "ignoring response after close");
						return Ok(());
					}
					return Err(Error::ProtocolError(format!(
						"Cannot find request to respond: id={}",
						response.id
					)));
				};

				match pending {
					PendingCall::Awaiting(tx) => {
						let outcome = match response.error {
							Some(wrapper) => Err(parse_protocol_error(wrapper)),
							None => Ok(response
								.result
								.map(|result| codec::decode(result, &self.objects))
								.filter(|result| !result.is_null())),
						};
						let _ = tx.send(outcome);
					}
					PendingCall::NoReply | PendingCall::Abandoned => {
						tracing::debug!(id = response.id, "discarding response with no waiter");
					}
				}
				Ok(())
			}
			Message::Event(event) => self.dispatch_event(event),
			Message::Unknown(value) => {
				if let Some(id) = value.get("id").and_then(Value::as_u64).and_then(|id| u32::try_from(id).ok()) {
					if self.fail_malformed_response(id, &value) {
						return Ok(());
					}
				}
				tracing::warn!(message = %value, "ignoring unrecognised message");
				Ok(())
			}
		}
	}

	/// Fails the call `id` when its response could not be parsed.
	///
	/// Returns false if no call with that id is pending.
	fn fail_malformed_response(&self, id: u32, value: &Value) -> bool {
		let Some((_, pending)) = self.callbacks.remove(&id) else {
			return false;
		};
		tracing::error!(id, message = %value, "malformed response");
		if let PendingCall::Awaiting(tx) = pending {
			let _ = tx.send(Err(Error::ProtocolError(format!("malformed response for id={id}: {value}"))));
		}
		true
	}

	fn dispatch_event(&self, event: Event) -> Result<()> {
		let Event { guid, method, params } = event;
		tracing::debug!(guid = %guid, method = %method, "dispatching event");

		if method == CREATE {
			return self.handle_create(&guid, params);
		}

		let Some(owner) = self.objects.get(&guid) else {
			tracing::debug!(guid = %guid, method = %method, "dropping message for unknown object");
			return Ok(());
		};

		match method.as_str() {
			ADOPT => self.handle_adopt(&owner, params),
			DISPOSE => {
				self.handle_dispose(&owner, params);
				Ok(())
			}
			_ => {
				let params = if self.config.is_passthrough(owner.type_name()) {
					codec::decode_passthrough(params)
				} else {
					codec::decode(params, &self.objects)
				};
				owner.channel().emit(&method, &params);
				Ok(())
			}
		}
	}

	fn handle_create(&self, parent_guid: &str, params: Value) -> Result<()> {
		let CreateParams {
			type_name,
			guid,
			initializer,
		} = serde_json::from_value(params)
			.map_err(|e| Error::ProtocolError(format!("malformed {CREATE} params: {e}")))?;

		let parent = self.objects.get(parent_guid).ok_or_else(|| Error::ObjectNotFound {
			guid: parent_guid.to_string(),
		})?;
		if self.objects.contains(&guid) {
			return Err(Error::ProtocolError(format!("guid announced twice: {guid}")));
		}

		let guid: Arc<str> = Arc::from(guid);
		let initializer = codec::decode(initializer, &self.objects);
		let owner = self
			.factory
			.create_object(&parent, &type_name, Arc::clone(&guid), initializer)?;
		if owner.guid() != &*guid {
			return Err(Error::ProtocolError(format!(
				"factory built {} for announced guid {guid}",
				owner.guid()
			)));
		}

		self.objects.insert(Arc::clone(&owner));
		parent.add_child(Arc::clone(&owner));
		owner.set_parent(&parent);
		tracing::debug!(guid = %guid, type_name = %type_name, parent = parent_guid, "created object");
		Ok(())
	}

	fn handle_adopt(&self, owner: &Arc<ChannelOwner>, params: Value) -> Result<()> {
		let AdoptParams { guid } = serde_json::from_value(params)
			.map_err(|e| Error::ProtocolError(format!("malformed {ADOPT} params: {e}")))?;

		match self.objects.get(&guid) {
			Some(child) => owner.adopt(&child),
			None => tracing::debug!(guid = %guid, parent = owner.guid(), "ignoring adoption of unknown object"),
		}
		Ok(())
	}

	fn handle_dispose(&self, owner: &Arc<ChannelOwner>, params: Value) {
		if owner.guid() == ROOT_GUID {
			tracing::warn!("ignoring dispose of the root object");
			return;
		}

		let params: DisposeParams = serde_json::from_value(params).unwrap_or_default();
		let reason = if params.is_gc() {
			DisposeReason::GarbageCollected
		} else {
			DisposeReason::Closed
		};
		owner.dispose(reason, &self.objects);
		tracing::debug!(guid = owner.guid(), ?reason, "disposed object");
	}

	/// Runs the writer task and the dispatch loop until abort or transport loss.
	///
	/// Only the first call does anything; later calls return immediately.
	pub async fn run(self: Arc<Self>) {
		let Some(io) = self.io.lock().take() else {
			tracing::debug!("dispatch loop already running");
			return;
		};
		let ConnectionIo {
			mut sender,
			receiver,
			mut message_rx,
			mut outbound_rx,
		} = io;

		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::error!(error = %e, "transport read error");
			}
		});

		let callbacks = Arc::clone(&self.callbacks);
		let abort = self.abort.clone();
		let writer = tokio::spawn(async move {
			loop {
				let request = tokio::select! {
					biased;
					_ = abort.cancelled() => break,
					request = outbound_rx.recv() => match request {
						Some(request) => request,
						None => break,
					},
				};
				let id = request.id;
				let written = match serde_json::to_value(&request) {
					Ok(value) => sender.send(value).await,
					Err(e) => Err(e.into()),
				};
				if let Err(err) = written {
					tracing::error!(id, error = %err, "transport write error");
					fail_call(&callbacks, id, &err);
				}
			}
		});

		loop {
			let value = tokio::select! {
				biased;
				_ = self.abort.cancelled() => break,
				value = message_rx.recv() => match value {
					Some(value) => value,
					None => {
						tracing::debug!("transport closed");
						break;
					}
				},
			};
			match serde_json::from_value::<Message>(value) {
				Ok(message) => {
					if let Err(e) = self.dispatch(message) {
						tracing::error!(error = %e, "failed to dispatch message");
					}
				}
				Err(e) => tracing::error!(error = %e, "failed to parse message"),
			}
		}

		self.cleanup();
		reader.abort();
		let _ = writer.await;
	}

	/// Returns the root object (guid `""`).
	pub fn root(&self) -> &Arc<ChannelOwner> {
		&self.root
	}

	/// Looks up a live object by guid.
	pub fn get_object(&self, guid: &str) -> Option<Arc<ChannelOwner>> {
		self.objects.get(guid)
	}

	/// The object directory.
	pub fn objects(&self) -> &ObjectStore {
		&self.objects
	}

	pub fn config(&self) -> &ConnectionConfig {
		&self.config
	}

	/// Installs the sink that receives call stacks while tracing.
	pub fn set_diagnostic_sink(&self, sink: Arc<dyn DiagnosticSink>) {
		*self.diagnostic_sink.write() = Some(sink);
	}

	/// Marks a tracing session as started (`true`) or stopped (`false`).
	pub fn set_in_tracing(&self, is_tracing: bool) {
		if is_tracing {
			self.tracing_count.fetch_add(1, Ordering::SeqCst);
		} else {
			self.tracing_count.fetch_sub(1, Ordering::SeqCst);
		}
	}

	/// Number of calls still waiting for a response.
	pub fn pending_call_count(&self) -> usize {
		self.callbacks.len()
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.abort.cancel();
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("last_id", &self.last_id.load(Ordering::SeqCst))
			.field("objects", &self.objects.len())
			.field("pending", &self.callbacks.len())
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Resolves the pending call `id` with a transport failure.
fn fail_call(callbacks: &CallbackTable, id: u32, err: &Error) {
	match callbacks.remove(&id) {
		Some((_, PendingCall::Awaiting(tx))) => {
			let _ = tx.send(Err(Error::TransportError(err.to_string())));
		}
		Some(_) => tracing::warn!(id, "no-reply request was not delivered"),
		None => {}
	}
}

/// Converts a driver error payload into [`Error::Remote`].
///
/// A thrown non-error value becomes the message; a string is used as is.
pub(crate) fn parse_protocol_error(wrapper: ErrorWrapper) -> Error {
	let ErrorWrapper { error, value } = wrapper;
	let payload = error.unwrap_or_default();
	let message = match value {
		Some(Value::String(text)) if payload.message.is_empty() => text,
		Some(value) if payload.message.is_empty() => value.to_string(),
		_ => payload.message,
	};
	Error::Remote {
		name: payload.name.unwrap_or_else(|| "Error".to_string()),
		message,
		stack: payload.stack,
	}
}

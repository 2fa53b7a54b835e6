//! Event handler infrastructure.
//!
//! Each [`Channel`](crate::Channel) owns an [`EventRegistry`]: handler lists
//! keyed by event name, each an [`IndexMap`] for O(1) removal with stable
//! registration order. Registration hands back a [`Subscription`] that removes
//! the handler when dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::Result;
use crate::value::LocalValue;

/// Unique identifier for event handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Handler function: `(event name, params)`.
pub type EventHandler = Arc<dyn Fn(&str, &LocalValue) + Send + Sync>;

/// A closed set of typed events for one kind of remote object.
///
/// ```ignore
/// enum PageEvent { Close, Console { text: String } }
///
/// impl EventSet for PageEvent {
///     const NAMES: &'static [&'static str] = &["close", "console"];
///
///     fn decode(name: &str, params: &LocalValue) -> Result<Self> { ... }
/// }
/// ```
pub trait EventSet: Sized + Send + 'static {
	/// Wire names this set listens to.
	const NAMES: &'static [&'static str];

	/// Builds the typed event from a raw emission.
	fn decode(name: &str, params: &LocalValue) -> Result<Self>;
}

/// Per-channel handler lists.
#[derive(Default)]
pub struct EventRegistry {
	handlers: Mutex<HashMap<String, IndexMap<HandlerId, EventHandler>>>,
}

impl EventRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `handler` for `name`.
	pub fn add(self: &Arc<Self>, name: &str, handler: EventHandler) -> Subscription {
		self.add_many(&[name], handler)
	}

	/// Registers one handler under several names, sharing a single id.
	pub fn add_many(self: &Arc<Self>, names: &[&str], handler: EventHandler) -> Subscription {
		let id = next_handler_id();
		{
			let mut handlers = self.handlers.lock();
			for name in names {
				handlers
					.entry((*name).to_string())
					.or_default()
					.insert(id, Arc::clone(&handler));
			}
		}
		Subscription::from_registry(id, self)
	}

	/// Removes the handler with `id` from every name it was registered under.
	pub fn remove(&self, id: HandlerId) {
		let mut handlers = self.handlers.lock();
		handlers.retain(|_, list| {
			list.shift_remove(&id);
			!list.is_empty()
		});
	}

	/// Calls every handler for `name` in registration order.
	///
	/// The list is snapshotted first so handlers may subscribe or unsubscribe
	/// while running.
	pub fn emit(&self, name: &str, params: &LocalValue) -> usize {
		let snapshot: Vec<EventHandler> = match self.handlers.lock().get(name) {
			Some(list) => list.values().cloned().collect(),
			None => return 0,
		};
		for handler in &snapshot {
			handler(name, params);
		}
		snapshot.len()
	}

	pub fn listener_count(&self, name: &str) -> usize {
		self.handlers.lock().get(name).map_or(0, IndexMap::len)
	}
}

impl std::fmt::Debug for EventRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let handlers = self.handlers.lock();
		f.debug_map()
			.entries(handlers.iter().map(|(name, list)| (name, list.len())))
			.finish()
	}
}

/// RAII handle that unregisters an event handler on drop.
///
/// Holds a weak reference to the registry, so dropping after the channel is
/// gone is a no-op.
pub struct Subscription {
	id: HandlerId,
	dropper: Option<Arc<dyn Fn(HandlerId) + Send + Sync>>,
}

impl Subscription {
	/// Creates a subscription with a custom dropper function.
	pub fn new(id: HandlerId, dropper: Arc<dyn Fn(HandlerId) + Send + Sync>) -> Self {
		Self {
			id,
			dropper: Some(dropper),
		}
	}

	fn from_registry(id: HandlerId, registry: &Arc<EventRegistry>) -> Self {
		let weak: Weak<EventRegistry> = Arc::downgrade(registry);
		let dropper = Arc::new(move |id: HandlerId| {
			if let Some(registry) = weak.upgrade() {
				registry.remove(id);
			}
		});
		Self::new(id, dropper)
	}

	/// Returns this subscription's handler ID.
	pub fn id(&self) -> HandlerId {
		self.id
	}

	/// Explicitly unsubscribes. Equivalent to dropping.
	pub fn unsubscribe(mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}

	/// Keeps the handler registered for the lifetime of the channel.
	pub fn detach(mut self) {
		self.dropper = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(dropper) = self.dropper.take() {
			(dropper)(self.id);
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("active", &self.dropper.is_some())
			.finish()
	}
}

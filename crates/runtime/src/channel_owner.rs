//! ChannelOwner - a node in the remote-object tree.
//!
//! Every object the driver announces is mirrored by one [`ChannelOwner`]:
//! - Represents the remote object via its guid
//! - Participates in parent-child lifecycle management (dispose, adopt)
//! - Keeps the initializer snapshot the driver sent on creation
//! - Communicates via its [`Channel`]
//!
//! Owners are only ever created by the connection's dispatcher (through the
//! [`ObjectFactory`](crate::ObjectFactory)) and the tree is only mutated there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use downcast_rs::{DowncastSync, impl_downcast};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::channel::Channel;
use crate::connection::{Connection, ObjectStore};
use crate::error::Result;
use crate::value::LocalValue;

/// Guid of the root owner.
pub const ROOT_GUID: &str = "";

/// Type tag of the root owner.
pub const ROOT_TYPE: &str = "Root";

/// Strongly-typed domain wrapper attached to a [`Channel`].
///
/// Implemented by binding crates for their protocol objects (Browser, Page…).
/// Wrappers should hold a [`Channel`] clone rather than their owner so the
/// tree stays free of reference cycles.
pub trait RemoteObject: DowncastSync {}

impl_downcast!(sync RemoteObject);

/// Reason why an object was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisposeReason {
	/// Object was closed by the driver.
	Closed,
	/// Object was garbage collected by the driver.
	GarbageCollected,
}

type ChildrenRegistry = IndexMap<Arc<str>, Arc<ChannelOwner>>;

/// Local proxy node for one remote object.
pub struct ChannelOwner {
	guid: Arc<str>,
	type_name: String,
	parent: RwLock<Option<Weak<ChannelOwner>>>,
	children: Mutex<ChildrenRegistry>,
	initializer: LocalValue,
	channel: Channel,
	was_collected: AtomicBool,
	disposed: AtomicBool,
}

impl ChannelOwner {
	/// Creates an owner as a child of `parent`, sharing its connection.
	///
	/// Called by [`ObjectFactory`](crate::ObjectFactory) implementations. The
	/// connection registers the returned owner in its directory and in the
	/// parent's children.
	pub fn new(
		parent: &Arc<ChannelOwner>,
		type_name: impl Into<String>,
		guid: Arc<str>,
		initializer: LocalValue,
	) -> Arc<Self> {
		let channel = Channel::new(Arc::clone(&guid), parent.channel.connection_ref());
		Arc::new(Self {
			guid,
			type_name: type_name.into(),
			parent: RwLock::new(Some(Arc::downgrade(parent))),
			children: Mutex::new(IndexMap::new()),
			initializer,
			channel,
			was_collected: AtomicBool::new(false),
			disposed: AtomicBool::new(false),
		})
	}

	pub(crate) fn root(connection: Weak<Connection>) -> Arc<Self> {
		Self::unparented(ROOT_TYPE, Arc::from(ROOT_GUID), connection)
	}

	pub(crate) fn unparented(type_name: &str, guid: Arc<str>, connection: Weak<Connection>) -> Arc<Self> {
		Arc::new(Self {
			channel: Channel::new(Arc::clone(&guid), connection),
			guid,
			type_name: type_name.to_string(),
			parent: RwLock::new(None),
			children: Mutex::new(IndexMap::new()),
			initializer: LocalValue::Null,
			was_collected: AtomicBool::new(false),
			disposed: AtomicBool::new(false),
		})
	}

	/// Returns the unique guid for this object.
	pub fn guid(&self) -> &str {
		&self.guid
	}

	pub(crate) fn guid_arc(&self) -> Arc<str> {
		Arc::clone(&self.guid)
	}

	/// Returns the protocol type name (e.g., "Browser", "Page").
	pub fn type_name(&self) -> &str {
		&self.type_name
	}

	/// Returns true for the connection's root owner.
	pub fn is_root(&self) -> bool {
		self.parent.read().is_none() && self.type_name == ROOT_TYPE
	}

	/// Returns the parent object; `None` for the root or a disposed object.
	pub fn parent(&self) -> Option<Arc<ChannelOwner>> {
		self.parent.read().as_ref().and_then(Weak::upgrade)
	}

	/// Returns the current children, in creation/adoption order.
	pub fn children(&self) -> Vec<Arc<ChannelOwner>> {
		self.children.lock().values().cloned().collect()
	}

	/// Returns the decoded initializer snapshot.
	pub fn initializer(&self) -> &LocalValue {
		&self.initializer
	}

	/// Returns the channel for RPC and events.
	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	/// Returns the connection this object belongs to.
	pub fn connection(&self) -> Result<Arc<Connection>> {
		self.channel.connection()
	}

	/// Returns the domain wrapper, if the factory attached a `T`.
	pub fn object<T: RemoteObject>(&self) -> Option<Arc<T>> {
		self.channel.object::<T>()
	}

	/// Returns true if this object was garbage collected by the driver.
	pub fn was_collected(&self) -> bool {
		self.was_collected.load(Ordering::SeqCst)
	}

	/// Returns true once the driver has disposed this object.
	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	pub(crate) fn add_child(&self, child: Arc<ChannelOwner>) {
		self.children.lock().insert(child.guid_arc(), child);
	}

	pub(crate) fn remove_child(&self, guid: &str) {
		self.children.lock().shift_remove(guid);
	}

	pub(crate) fn set_parent(&self, parent: &Arc<ChannelOwner>) {
		*self.parent.write() = Some(Arc::downgrade(parent));
	}

	/// Moves `child` from its current parent under this object.
	pub(crate) fn adopt(self: &Arc<Self>, child: &Arc<ChannelOwner>) {
		if let Some(old_parent) = child.parent() {
			old_parent.remove_child(child.guid());
		}
		self.add_child(Arc::clone(child));
		child.set_parent(self);
	}

	/// Detaches this object from its parent and removes it and every
	/// descendant from `objects`.
	pub(crate) fn dispose(&self, reason: DisposeReason, objects: &ObjectStore) {
		if let Some(parent) = self.parent() {
			parent.remove_child(&self.guid);
		}
		*self.parent.write() = None;
		self.dispose_subtree(reason, objects);
	}

	fn dispose_subtree(&self, reason: DisposeReason, objects: &ObjectStore) {
		objects.remove(&self.guid);
		if reason == DisposeReason::GarbageCollected {
			self.was_collected.store(true, Ordering::SeqCst);
		}
		self.disposed.store(true, Ordering::SeqCst);

		let children = std::mem::take(&mut *self.children.lock());
		for child in children.into_values() {
			child.dispose_subtree(reason, objects);
		}
	}
}

impl std::fmt::Debug for ChannelOwner {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ChannelOwner")
			.field("guid", &self.guid)
			.field("type_name", &self.type_name)
			.field("children", &self.children.lock().len())
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

//! Thread-safe object directory keyed by guid.
//!
//! Uses [`DashMap`] so lookups from caller tasks never contend with the
//! dispatcher. Only the dispatcher inserts and removes entries; everything
//! else reads.

use std::sync::Arc;

use dashmap::DashMap;

use crate::channel_owner::ChannelOwner;

/// Registry of live protocol objects by guid.
pub struct ObjectStore {
	objects: DashMap<Arc<str>, Arc<ChannelOwner>>,
}

impl Default for ObjectStore {
	fn default() -> Self {
		Self::new()
	}
}

impl ObjectStore {
	pub fn new() -> Self {
		Self {
			objects: DashMap::new(),
		}
	}

	/// Registers `owner` under its own guid, replacing any previous entry.
	pub(crate) fn insert(&self, owner: Arc<ChannelOwner>) {
		self.objects.insert(owner.guid_arc(), owner);
	}

	pub(crate) fn remove(&self, guid: &str) -> Option<Arc<ChannelOwner>> {
		self.objects.remove(guid).map(|(_, owner)| owner)
	}

	/// Synchronous lookup.
	pub fn get(&self, guid: &str) -> Option<Arc<ChannelOwner>> {
		self.objects.get(guid).map(|r| Arc::clone(r.value()))
	}

	pub fn contains(&self, guid: &str) -> bool {
		self.objects.contains_key(guid)
	}

	pub fn len(&self) -> usize {
		self.objects.len()
	}

	pub fn is_empty(&self) -> bool {
		self.objects.is_empty()
	}
}

impl std::fmt::Debug for ObjectStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObjectStore").field("len", &self.len()).finish()
	}
}

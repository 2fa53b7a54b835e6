//! Object factories - build owners for `__create__` announcements.
//!
//! The connection never knows concrete object types. When the driver announces
//! an object it hands the parent, type tag, guid and decoded initializer to an
//! [`ObjectFactory`], which returns the new [`ChannelOwner`]. Binding crates
//! usually reach for [`FactoryRegistry`] and register one constructor per
//! protocol type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel_owner::{ChannelOwner, RemoteObject};
use crate::error::{Error, Result};
use crate::value::LocalValue;

/// Creates protocol objects from `__create__` messages.
///
/// Called on the dispatch path, so implementations must not block.
pub trait ObjectFactory: Send + Sync {
	/// Creates the owner for a newly announced object.
	///
	/// The returned owner must carry `guid`; the connection registers it in
	/// the directory and under `parent`.
	fn create_object(
		&self,
		parent: &Arc<ChannelOwner>,
		type_name: &str,
		guid: Arc<str>,
		initializer: LocalValue,
	) -> Result<Arc<ChannelOwner>>;
}

/// Factory producing plain owners with no domain wrapper.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicObjectFactory;

impl ObjectFactory for BasicObjectFactory {
	fn create_object(
		&self,
		parent: &Arc<ChannelOwner>,
		type_name: &str,
		guid: Arc<str>,
		initializer: LocalValue,
	) -> Result<Arc<ChannelOwner>> {
		Ok(ChannelOwner::new(parent, type_name, guid, initializer))
	}
}

/// Builds the domain wrapper for a freshly created owner.
///
/// Constructors should keep a [`Channel`](crate::Channel) clone, not the
/// owner itself, so the tree does not form a cycle.
pub type Constructor = Arc<dyn Fn(&Arc<ChannelOwner>) -> Result<Arc<dyn RemoteObject>> + Send + Sync>;

/// Type-name keyed constructor table.
///
/// Unregistered types get a plain owner, or fail with
/// [`Error::UnknownObjectType`] in strict mode.
#[derive(Default, Clone)]
pub struct FactoryRegistry {
	constructors: HashMap<String, Constructor>,
	strict: bool,
}

impl FactoryRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Rejects types that have no registered constructor.
	pub fn strict(mut self) -> Self {
		self.strict = true;
		self
	}

	/// Registers the wrapper constructor for `type_name`.
	pub fn register<F>(mut self, type_name: impl Into<String>, constructor: F) -> Self
	where
		F: Fn(&Arc<ChannelOwner>) -> Result<Arc<dyn RemoteObject>> + Send + Sync + 'static,
	{
		self.constructors.insert(type_name.into(), Arc::new(constructor));
		self
	}

	pub fn is_registered(&self, type_name: &str) -> bool {
		self.constructors.contains_key(type_name)
	}
}

impl ObjectFactory for FactoryRegistry {
	fn create_object(
		&self,
		parent: &Arc<ChannelOwner>,
		type_name: &str,
		guid: Arc<str>,
		initializer: LocalValue,
	) -> Result<Arc<ChannelOwner>> {
		let constructor = match self.constructors.get(type_name) {
			Some(constructor) => Some(constructor),
			None if self.strict => return Err(Error::UnknownObjectType(type_name.to_string())),
			None => None,
		};

		let owner = ChannelOwner::new(parent, type_name, guid, initializer);
		if let Some(constructor) = constructor {
			owner.channel().set_object(constructor(&owner)?)?;
		}
		Ok(owner)
	}
}

impl std::fmt::Debug for FactoryRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut types: Vec<_> = self.constructors.keys().collect();
		types.sort();
		f.debug_struct("FactoryRegistry")
			.field("types", &types)
			.field("strict", &self.strict)
			.finish()
	}
}

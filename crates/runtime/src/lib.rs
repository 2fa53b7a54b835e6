//! Tether Runtime - driver channel connection and remote-object directory
//!
//! This crate is the client half of a session with a long-running automation
//! driver spoken to over one duplex message channel:
//!
//! - **Connection**: request/response correlation, abort, and event dispatch
//! - **Object directory**: the tree of [`ChannelOwner`] proxies mirroring the
//!   driver's objects, maintained from `__create__`/`__adopt__`/`__dispose__`
//! - **Value codec**: live references in [`LocalValue`] <-> `{"guid": ...}` on the wire
//! - **Call metadata**: call-site capture attached to each outbound call
//! - **Transport**: length-prefixed pipes and an in-process pair
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   bindings   │  Domain wrappers (Browser, Page, ...)
//! └──────┬───────┘
//!        │ implements ObjectFactory / RemoteObject
//! ┌──────▼───────┐
//! │ tether-rt    │  This crate
//! │  ┌────────┐  │
//! │  │ Conn   │  │  correlation, directory, dispatch
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Chan   │  │  per-object RPC and events
//! │  └────────┘  │
//! │  ┌────────┐  │
//! │  │ Trans  │  │  pipe / memory transport
//! │  └────────┘  │
//! └──────────────┘
//! ```
//!
//! # Decoupling via ObjectFactory
//!
//! The [`Connection`] creates owners through an [`ObjectFactory`] so it never
//! depends on concrete protocol types. Bindings attach their typed wrappers to
//! each owner's [`Channel`] and get them back with [`ChannelOwner::object`].

mod callback;
pub mod channel;
pub mod channel_owner;
pub mod codec;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod factory;
pub mod stack;
pub mod transport;
pub mod value;
mod zone;

// Re-export key types at crate root
pub use callback::ProtocolCallback;
pub use channel::Channel;
pub use channel_owner::{ChannelOwner, DisposeReason, ROOT_GUID, RemoteObject};
pub use config::{ConnectionConfig, StackCaptureMode};
pub use connection::{Connection, ObjectStore};
pub use diagnostics::{ChannelDiagnosticSink, DiagnosticSink};
pub use error::{Error, Result};
pub use events::{EventSet, HandlerId, Subscription};
pub use factory::{BasicObjectFactory, FactoryRegistry, ObjectFactory};
pub use stack::{ParsedStackTrace, StackCapturer};
pub use tether_protocol as protocol;
pub use transport::{
	MemoryPeer, MemoryPeerSender, MemoryTransport, PipeTransport, PipeTransportReceiver, PipeTransportSender,
	Transport, TransportParts, TransportReceiver,
};
pub use value::{LocalValue, Mapping};

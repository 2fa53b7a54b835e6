//! Shared fixtures for connection integration tests.
//!
//! [`FakeDriver`] plays the driver side of a [`MemoryTransport`] pair: it reads
//! the envelopes the connection writes and injects responses and
//! notifications.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tether_runtime::{BasicObjectFactory, ChannelOwner, Connection, ConnectionConfig, MemoryPeer, MemoryTransport};
use tracing_subscriber::EnvFilter;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a test-writer subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_test_writer()
		.try_init();
}

/// Config that skips backtraces so envelopes stay small.
pub fn caller_only() -> ConnectionConfig {
	ConnectionConfig {
		stack_capture: tether_runtime::StackCaptureMode::CallerOnly,
		..ConnectionConfig::default()
	}
}

pub fn connect(config: ConnectionConfig) -> (Arc<Connection>, FakeDriver) {
	init_tracing();
	let (parts, peer) = MemoryTransport::pair();
	let connection = Connection::new(parts, Arc::new(BasicObjectFactory), config).expect("valid config");
	(connection, FakeDriver { peer })
}

/// Connects and completes the `initialize` handshake.
///
/// Returns the connection, the `Playwright` object named by the handshake and
/// the driver.
pub async fn start_session(config: ConnectionConfig) -> (Arc<Connection>, Arc<ChannelOwner>, FakeDriver) {
	let (connection, mut driver) = connect(config);

	let starter = Arc::clone(&connection);
	let start = tokio::spawn(async move { starter.start().await });

	let init = driver.next_request().await;
	assert_eq!(init["method"], "initialize");
	assert_eq!(init["guid"], "");
	assert_eq!(init["params"]["sdkLanguage"], "rust");

	driver.create("", "Playwright", "playwright@1", json!({"chromium": null}));
	driver.respond(id_of(&init), json!({"playwright": {"guid": "playwright@1"}}));

	let playwright = start.await.expect("start task").expect("handshake");
	(connection, playwright, driver)
}

pub fn id_of(request: &Value) -> u64 {
	request["id"].as_u64().expect("request id")
}

/// Polls the directory until `guid` is registered.
pub async fn wait_for_object(connection: &Connection, guid: &str) -> Arc<ChannelOwner> {
	tokio::time::timeout(RECV_TIMEOUT, async {
		loop {
			if let Some(owner) = connection.get_object(guid) {
				return owner;
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("object {guid} was never created"))
}

/// Polls until `condition` holds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
	tokio::time::timeout(RECV_TIMEOUT, async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

/// Driver side of an in-memory session.
pub struct FakeDriver {
	peer: MemoryPeer,
}

impl FakeDriver {
	/// Next envelope written by the connection.
	pub async fn next_request(&mut self) -> Value {
		tokio::time::timeout(RECV_TIMEOUT, self.peer.recv())
			.await
			.expect("timed out waiting for a request")
			.expect("connection hung up")
	}

	pub fn create(&self, parent: &str, type_name: &str, guid: &str, initializer: Value) {
		self.send(json!({
			"guid": parent,
			"method": "__create__",
			"params": {"type": type_name, "guid": guid, "initializer": initializer},
		}));
	}

	pub fn respond(&self, id: u64, result: Value) {
		self.send(json!({"id": id, "result": result}));
	}

	pub fn respond_error(&self, id: u64, name: &str, message: &str) {
		self.send(json!({
			"id": id,
			"error": {"error": {"name": name, "message": message, "stack": format!("{name}: {message}\n    at driver")}},
		}));
	}

	pub fn event(&self, guid: &str, method: &str, params: Value) {
		self.send(json!({"guid": guid, "method": method, "params": params}));
	}

	pub fn adopt(&self, new_parent: &str, guid: &str) {
		self.event(new_parent, "__adopt__", json!({"guid": guid}));
	}

	pub fn dispose(&self, guid: &str, reason: Option<&str>) {
		let params = match reason {
			Some(reason) => json!({"reason": reason}),
			None => json!({}),
		};
		self.event(guid, "__dispose__", params);
	}

	pub fn send(&self, message: Value) {
		self.peer.send(message).expect("connection is reading");
	}
}

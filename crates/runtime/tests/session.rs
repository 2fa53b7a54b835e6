// Integration tests for the session handshake and call correlation.
//
// A FakeDriver stands in for the driver process on an in-memory transport.
//
// Tests cover:
// - initialize handshake and its failure modes
// - result unwrapping vs full result mappings
// - id allocation and out-of-order resolution under concurrency
// - remote errors, no-reply calls and stray response ids

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{caller_only, connect, id_of, start_session, wait_for_object};
use serde_json::json;
use tether_runtime::{Error, LocalValue};

#[tokio::test]
async fn test_start_returns_object_named_by_initialize() {
	let (connection, playwright, _driver) = start_session(caller_only()).await;

	assert_eq!(playwright.guid(), "playwright@1");
	assert_eq!(playwright.type_name(), "Playwright");
	assert!(playwright.parent().is_some_and(|p| p.is_root()));
	assert!(Arc::ptr_eq(&connection.get_object("playwright@1").unwrap(), &playwright));
	assert_eq!(playwright.initializer().get("chromium"), Some(&LocalValue::Null));
}

#[tokio::test]
async fn test_start_fails_when_initialize_is_rejected() {
	let (connection, mut driver) = connect(caller_only());
	let starter = Arc::clone(&connection);
	let start = tokio::spawn(async move { starter.start().await });

	let init = driver.next_request().await;
	driver.respond_error(id_of(&init), "Error", "unsupported sdk");

	let err = start.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ConnectionFailed(_)), "got {err:?}");
	assert!(err.to_string().contains("unsupported sdk"));
}

#[tokio::test]
async fn test_start_fails_when_result_names_no_object() {
	let (connection, mut driver) = connect(caller_only());
	let starter = Arc::clone(&connection);
	let start = tokio::spawn(async move { starter.start().await });

	let init = driver.next_request().await;
	driver.respond(id_of(&init), json!({"playwright": {"guid": "never-created"}}));

	let err = start.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ConnectionFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_start_fails_when_driver_is_gone() {
	let (connection, driver) = connect(caller_only());
	drop(driver);

	let err = connection.start().await.unwrap_err();
	assert!(matches!(err, Error::ConnectionFailed(_)), "got {err:?}");
}

#[tokio::test]
async fn test_call_result_creates_child_of_caller() {
	let (connection, playwright, mut driver) = start_session(caller_only()).await;
	driver.create("playwright@1", "Browser", "browser@1", json!({"name": "chromium"}));
	let browser = wait_for_object(&connection, "browser@1").await;

	let call = tokio::spawn(browser.channel().send("newContext", json!({"viewport": null})));
	let request = driver.next_request().await;
	assert_eq!(request["guid"], "browser@1");
	assert_eq!(request["method"], "newContext");
	assert!(request["metadata"]["wallTime"].as_i64().unwrap() > 0);

	driver.create("browser@1", "BrowserContext", "ctx@1", json!({}));
	driver.respond(id_of(&request), json!({"context": {"guid": "ctx@1"}}));

	let context = call.await.unwrap().unwrap().unwrap();
	let context = context.as_remote().expect("context reference");
	assert_eq!(context.guid(), "ctx@1");
	assert!(Arc::ptr_eq(&context.parent().unwrap(), &browser));
	assert_eq!(browser.children().len(), 1);
	assert_eq!(playwright.children().len(), 1);
}

#[tokio::test]
async fn test_single_entry_result_is_unwrapped() {
	let (_connection, playwright, mut driver) = start_session(caller_only()).await;

	let call = tokio::spawn(playwright.channel().send("evaluate", json!({"expression": "6 * 7"})));
	let request = driver.next_request().await;
	driver.respond(id_of(&request), json!({"value": 42}));
	assert_eq!(call.await.unwrap().unwrap(), Some(LocalValue::from(42i64)));

	let call = tokio::spawn(playwright.channel().send_return_as_dict("evaluate", json!({"expression": "6 * 7"})));
	let request = driver.next_request().await;
	assert_eq!(request["metadata"]["isInternal"], true);
	driver.respond(id_of(&request), json!({"value": 42}));
	assert_eq!(call.await.unwrap().unwrap(), LocalValue::from(json!({"value": 42})));
}

#[tokio::test]
async fn test_empty_and_multi_entry_results() {
	let (_connection, playwright, mut driver) = start_session(caller_only()).await;

	let call = tokio::spawn(playwright.channel().send("close", LocalValue::Null));
	let request = driver.next_request().await;
	assert_eq!(request["params"], json!({}));
	driver.respond(id_of(&request), json!({}));
	assert_eq!(call.await.unwrap().unwrap(), None);

	let call = tokio::spawn(playwright.channel().send("viewport", LocalValue::Null));
	let request = driver.next_request().await;
	driver.respond(id_of(&request), json!({"width": 800, "height": 600}));
	let size = call.await.unwrap().unwrap().unwrap();
	assert_eq!(size.get("width").and_then(LocalValue::as_i64), Some(800));
	assert_eq!(size.get("height").and_then(LocalValue::as_i64), Some(600));
}

#[tokio::test]
async fn test_send_as_deserializes_unwrapped_value() {
	let (_connection, playwright, mut driver) = start_session(caller_only()).await;

	let call = tokio::spawn(playwright.channel().send_as::<Vec<String>>("cookies", LocalValue::Null));
	let request = driver.next_request().await;
	driver.respond(id_of(&request), json!({"cookies": ["a=1", "b=2"]}));

	assert_eq!(call.await.unwrap().unwrap(), vec!["a=1".to_string(), "b=2".to_string()]);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
	let (_connection, playwright, mut driver) = start_session(caller_only()).await;

	let calls: Vec<_> = (0..20i64)
		.map(|n| {
			let channel = playwright.channel().clone();
			tokio::spawn(async move {
				let result = channel.send("echo", json!({"n": n})).await.unwrap();
				(n, result)
			})
		})
		.collect();

	let mut requests = Vec::new();
	for _ in 0..20 {
		requests.push(driver.next_request().await);
	}

	let ids: Vec<u64> = requests.iter().map(id_of).collect();
	assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not increasing: {ids:?}");
	assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 20);
	assert!(ids[0] > 1, "id 1 belongs to initialize");

	for request in requests.iter().rev() {
		driver.respond(id_of(request), json!({"value": request["params"]["n"]}));
	}

	for call in calls {
		let (n, result) = call.await.unwrap();
		assert_eq!(result, Some(LocalValue::from(n)));
	}
}

#[tokio::test]
async fn test_remote_error_is_returned_to_caller() {
	let (connection, playwright, mut driver) = start_session(caller_only()).await;

	let call = tokio::spawn(playwright.channel().send("waitForSelector", json!({"selector": "#late"})));
	let request = driver.next_request().await;
	driver.respond_error(id_of(&request), "TimeoutError", "Timeout 30000ms exceeded");

	let err = call.await.unwrap().unwrap_err();
	assert!(err.is_timeout());
	assert_eq!(err.error_name(), Some("TimeoutError"));
	assert!(err.stack_trace().is_some_and(|s| s.contains("at driver")));
	assert_eq!(connection.pending_call_count(), 0);
}

#[tokio::test]
async fn test_thrown_value_and_messageless_errors_reach_caller() {
	let (connection, playwright, mut driver) = start_session(caller_only()).await;

	let call = tokio::spawn(playwright.channel().send("evaluate", json!({"expression": "throw {s: 'boom'}"})));
	let request = driver.next_request().await;
	driver.send(json!({"id": id_of(&request), "error": {"value": {"s": "boom"}}}));
	let err = call.await.unwrap().unwrap_err();
	assert_eq!(err.error_name(), Some("Error"));
	assert!(err.to_string().contains("boom"), "got {err:?}");

	let call = tokio::spawn(playwright.channel().send("evaluate", json!({"expression": "throw new Error()"})));
	let request = driver.next_request().await;
	driver.send(json!({"id": id_of(&request), "error": {"error": {"name": "Error", "stack": "Error\n    at <anonymous>"}}}));
	let err = call.await.unwrap().unwrap_err();
	assert!(err.stack_trace().is_some_and(|s| s.contains("<anonymous>")));

	let call = tokio::spawn(playwright.channel().send("evaluate", LocalValue::Null));
	let request = driver.next_request().await;
	driver.send(json!({"id": id_of(&request), "error": 17}));
	let err = call.await.unwrap().unwrap_err();
	assert!(matches!(err, Error::ProtocolError(_)), "got {err:?}");

	assert_eq!(connection.pending_call_count(), 0);
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_no_reply_call_is_sent_and_late_response_ignored() {
	let (connection, playwright, mut driver) = start_session(caller_only()).await;

	playwright.channel().send_no_reply("setDefaultTimeout", json!({"timeout": 500}));
	let request = driver.next_request().await;
	assert_eq!(request["method"], "setDefaultTimeout");
	assert_eq!(request["params"]["timeout"], 500);

	driver.respond(id_of(&request), json!({}));

	let call = tokio::spawn(playwright.channel().send("version", LocalValue::Null));
	let next = driver.next_request().await;
	assert_eq!(id_of(&next), id_of(&request) + 1);
	driver.respond(id_of(&next), json!({"version": "1.50"}));
	assert_eq!(call.await.unwrap().unwrap(), Some(LocalValue::from("1.50")));
	assert_eq!(connection.pending_call_count(), 0);
}

#[tokio::test]
async fn test_unknown_response_id_does_not_break_session() {
	let (connection, playwright, mut driver) = start_session(caller_only()).await;

	driver.respond(999, json!({"value": 1}));

	let call = tokio::spawn(playwright.channel().send("version", LocalValue::Null));
	let request = driver.next_request().await;
	driver.respond(id_of(&request), json!({"version": "1.50"}));

	assert_eq!(call.await.unwrap().unwrap(), Some(LocalValue::from("1.50")));
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_dropped_caller_does_not_break_session() {
	let (connection, playwright, mut driver) = start_session(caller_only()).await;

	let handle = tokio::spawn(playwright.channel().send("slow", LocalValue::Null));
	let request = driver.next_request().await;
	handle.abort();
	let _ = handle.await;

	driver.respond(id_of(&request), json!({"value": "late"}));

	let call = tokio::spawn(playwright.channel().send("version", LocalValue::Null));
	let next = driver.next_request().await;
	driver.respond(id_of(&next), json!({"version": "1.50"}));
	assert_eq!(call.await.unwrap().unwrap(), Some(LocalValue::from("1.50")));
	assert_eq!(connection.pending_call_count(), 0);
}

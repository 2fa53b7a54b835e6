//! Pending-call metadata slot.
//!
//! The outermost API entry point stages the call-site it captured; the first
//! send made while the slot is full consumes it and clears it. The slot is a
//! tokio task-local so concurrent callers never see each other's metadata.

use std::cell::RefCell;
use std::future::Future;

use crate::stack::ParsedStackTrace;

tokio::task_local! {
	static API_ZONE: RefCell<Option<ParsedStackTrace>>;
}

/// Returns true if the current task already carries staged metadata.
pub(crate) fn is_staged() -> bool {
	API_ZONE
		.try_with(|zone| zone.borrow().is_some())
		.unwrap_or(false)
}

/// Consumes the staged metadata, leaving the slot empty.
pub(crate) fn take() -> Option<ParsedStackTrace> {
	API_ZONE
		.try_with(|zone| zone.borrow_mut().take())
		.ok()
		.flatten()
}

/// Runs `fut` with `staged` as the pending-call metadata.
///
/// Inside an existing scope the slot is only filled when empty, so metadata
/// staged by an outer call is never overwritten by an inner one.
pub(crate) async fn with_zone<F: Future>(staged: Option<ParsedStackTrace>, fut: F) -> F::Output {
	if API_ZONE.try_with(|_| ()).is_ok() {
		if let Some(staged) = staged {
			let _ = API_ZONE.try_with(|zone| {
				let mut slot = zone.borrow_mut();
				if slot.is_none() {
					*slot = Some(staged);
				}
			});
		}
		fut.await
	} else {
		API_ZONE.scope(RefCell::new(staged), fut).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn trace(name: &str) -> ParsedStackTrace {
		ParsedStackTrace {
			api_name: name.to_string(),
			..ParsedStackTrace::default()
		}
	}

	#[tokio::test]
	async fn test_take_consumes_exactly_once() {
		with_zone(Some(trace("Page.goto")), async {
			assert!(is_staged());
			assert_eq!(take().map(|t| t.api_name).as_deref(), Some("Page.goto"));
			assert!(take().is_none());
		})
		.await;
	}

	#[tokio::test]
	async fn test_inner_zone_does_not_replace_outer() {
		with_zone(Some(trace("Outer.call")), async {
			with_zone(Some(trace("Inner.call")), async {
				assert_eq!(take().map(|t| t.api_name).as_deref(), Some("Outer.call"));
			})
			.await;
		})
		.await;
	}

	#[tokio::test]
	async fn test_inner_zone_fills_a_consumed_slot() {
		with_zone(Some(trace("First.call")), async {
			take();
			with_zone(Some(trace("Second.call")), async {
				assert_eq!(take().map(|t| t.api_name).as_deref(), Some("Second.call"));
			})
			.await;
		})
		.await;
	}

	#[test]
	fn test_outside_any_zone_nothing_is_staged() {
		assert!(!is_staged());
		assert!(take().is_none());
	}
}

//! Call-site capture for outbound calls.
//!
//! For a public API call the capturer walks the current backtrace, finds the
//! outermost frame that belongs to the library (matched by source path) and
//! reports:
//! - `apiName`: derived from that frame's symbol, e.g. `Browser.new_context`
//! - `location`: the first caller frame outside the library
//! - `frames`: every caller frame, forwarded to the tracing sink when active
//!
//! Resolving symbols is not free, so [`StackCaptureMode`] can reduce capture
//! to the `#[track_caller]` location or switch it off.

use regex::Regex;
use tether_protocol::{Location, Metadata, StackFrame};

use crate::config::{ConnectionConfig, StackCaptureMode};
use crate::error::Result;

/// Staged call-site information for one API call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedStackTrace {
	pub api_name: String,
	pub is_internal: bool,
	pub location: Option<Location>,
	pub frames: Vec<StackFrame>,
}

impl ParsedStackTrace {
	/// Splits into the wire metadata and the frames kept for tracing.
	pub fn into_metadata(self, wall_time: i64) -> (Metadata, Vec<StackFrame>) {
		let metadata = Metadata {
			wall_time,
			api_name: Some(self.api_name),
			is_internal: Some(self.is_internal),
			location: self.location,
		};
		(metadata, self.frames)
	}
}

/// Captures call sites according to a [`StackCaptureMode`].
#[derive(Debug, Clone)]
pub struct StackCapturer {
	mode: StackCaptureMode,
	matcher: Regex,
}

impl StackCapturer {
	pub fn new(mode: StackCaptureMode, matcher: Regex) -> Self {
		Self { mode, matcher }
	}

	pub fn from_config(config: &ConnectionConfig) -> Result<Self> {
		Ok(Self::new(config.stack_capture, config.stack_matcher()?))
	}

	pub fn mode(&self) -> StackCaptureMode {
		self.mode
	}

	/// Captures the current call site.
	///
	/// `caller` is the `#[track_caller]` location of the API entry point. It
	/// is used as `location` in [`StackCaptureMode::CallerOnly`], and as the
	/// fallback when a full backtrace yields no caller frame.
	pub fn capture(&self, caller: &'static std::panic::Location<'static>, is_internal: bool) -> ParsedStackTrace {
		match self.mode {
			StackCaptureMode::Off => ParsedStackTrace {
				is_internal,
				..ParsedStackTrace::default()
			},
			StackCaptureMode::CallerOnly => ParsedStackTrace {
				is_internal,
				location: Some(caller_location(caller)),
				..ParsedStackTrace::default()
			},
			StackCaptureMode::Full => {
				let mut parsed = parse_frames(&resolve_frames(), &self.matcher, is_internal);
				if parsed.location.is_none() {
					parsed.location = Some(caller_location(caller));
				}
				parsed
			}
		}
	}
}

fn caller_location(caller: &std::panic::Location<'_>) -> Location {
	Location {
		file: caller.file().to_string(),
		line: Some(caller.line()),
		column: Some(caller.column()),
	}
}

/// Resolves the current backtrace, innermost frame first.
fn resolve_frames() -> Vec<StackFrame> {
	let backtrace = backtrace::Backtrace::new();
	let mut frames = Vec::new();
	for frame in backtrace.frames() {
		for symbol in frame.symbols() {
			frames.push(StackFrame {
				file: symbol
					.filename()
					.map(|path| path.display().to_string())
					.unwrap_or_default(),
				line: symbol.lineno().unwrap_or(0),
				column: symbol.colno().unwrap_or(0),
				function: symbol.name().map(|name| format!("{name:#}")).unwrap_or_default(),
			});
		}
	}
	frames
}

const RUNTIME_PATH_MARKERS: &[&str] = &["/rustc/", "/.cargo/registry/", "\\.cargo\\registry\\"];

const RUNTIME_CRATES: &[&str] = &[
	"std", "core", "alloc", "tokio", "backtrace", "futures_util", "futures_core", "test",
];

/// Frames from the toolchain, the async runtime or the capture machinery.
fn is_runtime_frame(frame: &StackFrame) -> bool {
	if frame.file.is_empty() || RUNTIME_PATH_MARKERS.iter().any(|m| frame.file.contains(m)) {
		return true;
	}
	let function = frame.function.trim_start_matches('<');
	RUNTIME_CRATES.iter().any(|krate| {
		function
			.strip_prefix(krate)
			.is_some_and(|rest| rest.starts_with("::"))
	})
}

/// Reduces a raw backtrace (innermost first) to the caller-facing trace.
///
/// Library frames are those whose file matches `internal`. The outermost
/// library frame names the API; frames outside it are the caller's. When no
/// frame matches, the innermost surviving frame is treated as the API frame.
pub fn parse_frames(frames: &[StackFrame], internal: &Regex, is_internal: bool) -> ParsedStackTrace {
	let frames: Vec<&StackFrame> = frames
		.iter()
		.filter(|f| internal.is_match(&f.file) || !is_runtime_frame(f))
		.collect();

	let Some(api_index) = frames
		.iter()
		.rposition(|f| internal.is_match(&f.file))
		.or_else(|| (!frames.is_empty()).then_some(0))
	else {
		return ParsedStackTrace {
			is_internal,
			..ParsedStackTrace::default()
		};
	};

	let external: Vec<StackFrame> = frames[api_index + 1..].iter().map(|f| (*f).clone()).collect();
	let api_name = if is_internal || external.is_empty() {
		String::new()
	} else {
		derive_api_name(&frames[api_index].function)
	};

	ParsedStackTrace {
		api_name,
		is_internal,
		location: external.first().map(StackFrame::location),
		frames: external,
	}
}

/// Turns a demangled symbol into `Type.method`.
///
/// `my_app::browser::BrowserImpl::new_context::{{closure}}` becomes
/// `Browser.new_context`; hash suffixes, closure segments, generics and
/// `<T as Trait>` qualification are discarded.
pub fn derive_api_name(symbol: &str) -> String {
	let segments: Vec<&str> = split_path(symbol)
		.into_iter()
		.filter(|s| !s.is_empty() && !s.starts_with('{') && !is_hash_segment(s))
		.map(simplify_segment)
		.filter(|s| !s.is_empty())
		.collect();

	let name = match segments.as_slice() {
		[] => return String::new(),
		[only] => (*only).to_string(),
		[.., ty, method] => {
			let ty = match ty.strip_suffix("Impl") {
				Some(stripped) if !stripped.is_empty() => stripped,
				_ => ty,
			};
			format!("{ty}.{method}")
		}
	};
	capitalize(&name)
}

fn capitalize(name: &str) -> String {
	let mut chars = name.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}

/// `h` followed by 16 hex digits, appended by the legacy mangling scheme.
fn is_hash_segment(segment: &str) -> bool {
	segment.len() == 17
		&& segment.starts_with('h')
		&& segment[1..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Splits on `::` outside angle brackets.
fn split_path(symbol: &str) -> Vec<&str> {
	let bytes = symbol.as_bytes();
	let mut parts = Vec::new();
	let mut depth = 0usize;
	let mut start = 0;
	let mut i = 0;
	while i < bytes.len() {
		match bytes[i] {
			b'<' => depth += 1,
			b'>' if i == 0 || bytes[i - 1] != b'-' => depth = depth.saturating_sub(1),
			b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
				parts.push(&symbol[start..i]);
				i += 2;
				start = i;
				continue;
			}
			_ => {}
		}
		i += 1;
	}
	parts.push(&symbol[start..]);
	parts
}

/// `<a::Page as b::Navigate>` and `Page<T>` both become `Page`.
fn simplify_segment(segment: &str) -> &str {
	let segment = segment.trim();
	let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) else {
		return strip_generics(segment);
	};
	let subject = before_top_level_as(inner)
		.trim_start_matches('&')
		.trim_start_matches("mut ")
		.trim_start_matches("dyn ");
	let last = split_path(subject).pop().unwrap_or(subject);
	strip_generics(last)
}

fn before_top_level_as(qualified: &str) -> &str {
	let bytes = qualified.as_bytes();
	let mut depth = 0usize;
	for (i, b) in bytes.iter().enumerate() {
		match b {
			b'<' => depth += 1,
			b'>' => depth = depth.saturating_sub(1),
			b' ' if depth == 0 && qualified[i..].starts_with(" as ") => return &qualified[..i],
			_ => {}
		}
	}
	qualified
}

fn strip_generics(segment: &str) -> &str {
	segment.split('<').next().unwrap_or(segment)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn frame(function: &str, file: &str, line: u32, column: u32) -> StackFrame {
		StackFrame {
			file: file.to_string(),
			line,
			column,
			function: function.to_string(),
		}
	}

	fn bindings_matcher() -> Regex {
		Regex::new(r"/bindings/src/").unwrap()
	}

	fn sample_trace() -> Vec<StackFrame> {
		vec![
			frame("backtrace::backtrace::trace", "/home/u/.cargo/registry/src/backtrace-0.3/src/lib.rs", 60, 5),
			frame("my_bindings::channel::Channel::send", "/w/bindings/src/channel.rs", 80, 9),
			frame("my_bindings::browser::BrowserImpl::new_context::{{closure}}", "/w/bindings/src/browser.rs", 41, 13),
			frame("app::main::{{closure}}", "/w/app/src/main.rs", 10, 5),
			frame("tokio::runtime::park::CachedParkThread::block_on", "/home/u/.cargo/registry/src/tokio-1/src/park.rs", 300, 1),
			frame("app::main", "/w/app/src/main.rs", 3, 1),
		]
	}

	#[test]
	fn test_derives_type_and_method() {
		assert_eq!(derive_api_name("tether_runtime::channel::Channel::send::h0123456789abcdef"), "Channel.send");
		assert_eq!(
			derive_api_name("my_app::browser::BrowserImpl::new_context::{{closure}}"),
			"Browser.new_context"
		);
		assert_eq!(derive_api_name("<my_app::page::Page as my_app::Navigate>::goto::{{closure}}"), "Page.goto");
		assert_eq!(derive_api_name("my_app::Locator<T>::click"), "Locator.click");
		assert_eq!(derive_api_name("main"), "Main");
		assert_eq!(derive_api_name(""), "");
	}

	#[test]
	fn test_impl_suffix_alone_is_kept() {
		assert_eq!(derive_api_name("crate::Impl::run"), "Impl.run");
	}

	#[test]
	fn test_outermost_library_frame_names_the_api() {
		let parsed = parse_frames(&sample_trace(), &bindings_matcher(), false);

		assert_eq!(parsed.api_name, "Browser.new_context");
		let location = parsed.location.unwrap();
		assert_eq!(location.file, "/w/app/src/main.rs");
		assert_eq!(location.line, Some(10));
		assert_eq!(location.column, Some(5));
		let functions: Vec<_> = parsed.frames.iter().map(|f| f.function.as_str()).collect();
		assert_eq!(functions, ["app::main::{{closure}}", "app::main"]);
	}

	#[test]
	fn test_internal_calls_have_no_api_name() {
		let parsed = parse_frames(&sample_trace(), &bindings_matcher(), true);
		assert_eq!(parsed.api_name, "");
		assert!(parsed.is_internal);
		assert!(parsed.location.is_some());
	}

	#[test]
	fn test_no_caller_frames_means_no_api_name() {
		let trace = vec![
			frame("my_bindings::channel::Channel::send", "/w/bindings/src/channel.rs", 80, 9),
			frame("std::rt::lang_start", "/rustc/abc/library/std/src/rt.rs", 1, 1),
		];
		let parsed = parse_frames(&trace, &bindings_matcher(), false);
		assert_eq!(parsed.api_name, "");
		assert!(parsed.location.is_none());
		assert!(parsed.frames.is_empty());
	}

	#[test]
	fn test_metadata_always_carries_name_and_internal_flag() {
		let (metadata, frames) = ParsedStackTrace {
			is_internal: true,
			..ParsedStackTrace::default()
		}
		.into_metadata(99);

		assert_eq!(metadata.wall_time, 99);
		assert_eq!(metadata.api_name.as_deref(), Some(""));
		assert_eq!(metadata.is_internal, Some(true));
		assert!(frames.is_empty());
	}

	#[test]
	fn test_caller_only_mode_uses_track_caller_location() {
		let capturer = StackCapturer::new(StackCaptureMode::CallerOnly, bindings_matcher());
		let parsed = capturer.capture(std::panic::Location::caller(), false);

		assert!(parsed.frames.is_empty());
		assert_eq!(parsed.api_name, "");
		assert!(parsed.location.unwrap().file.ends_with("stack.rs"));
	}

	#[test]
	fn test_off_mode_captures_nothing() {
		let capturer = StackCapturer::new(StackCaptureMode::Off, bindings_matcher());
		let parsed = capturer.capture(std::panic::Location::caller(), true);
		assert_eq!(parsed, ParsedStackTrace { is_internal: true, ..ParsedStackTrace::default() });
	}

	#[test]
	fn test_full_mode_always_has_a_location() {
		let capturer = StackCapturer::from_config(&ConnectionConfig::default()).unwrap();
		let parsed = capturer.capture(std::panic::Location::caller(), true);
		assert!(parsed.location.is_some());
		assert_eq!(parsed.api_name, "");
	}
}

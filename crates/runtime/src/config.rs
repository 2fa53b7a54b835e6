//! Connection configuration.
//!
//! [`ConnectionConfig`] is plain data with serde defaults so it can be embedded
//! in a host application's own config file. [`ConnectionConfig::from_env`]
//! layers `TETHER_*` environment overrides on top of the defaults.

use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Source paths that belong to this runtime; frames under them are "internal".
pub const DEFAULT_INTERNAL_PATH_PATTERN: &str =
	r"(?:^|[\\/])crates[\\/]runtime[\\/]src[\\/]|tether[-_]runtime[^\\/]*[\\/]src[\\/]";

/// Object types whose events are delivered without guid resolution.
pub const DEFAULT_PASSTHROUGH_TYPES: &[&str] = &["JsonPipe"];

const ENV_STACK_CAPTURE: &str = "TETHER_STACK_CAPTURE";
const ENV_INTERNAL_PATHS: &str = "TETHER_INTERNAL_PATHS";
const ENV_SDK_LANGUAGE: &str = "TETHER_SDK_LANGUAGE";

/// How much call-site information is captured for each outbound call.
///
/// All modes emit the same metadata shape; cheaper modes just leave fields
/// empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackCaptureMode {
	/// Resolve a full backtrace, derive `apiName` and forward frames to tracing.
	#[default]
	Full,
	/// Only the `#[track_caller]` location; no backtrace is taken.
	#[serde(alias = "caller")]
	CallerOnly,
	/// No call-site information; `apiName` stays empty.
	Off,
}

impl FromStr for StackCaptureMode {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.trim().to_ascii_lowercase().as_str() {
			"full" => Ok(Self::Full),
			"caller" | "caller_only" | "caller-only" => Ok(Self::CallerOnly),
			"off" | "none" => Ok(Self::Off),
			other => Err(Error::Config(format!(
				"unknown stack capture mode '{other}' (expected full, caller or off)"
			))),
		}
	}
}

/// Settings for a [`Connection`](crate::Connection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
	/// Value of `sdkLanguage` sent with `initialize`.
	pub sdk_language: String,
	/// Call-site capture mode.
	pub stack_capture: StackCaptureMode,
	/// Regex patterns matched against frame file paths to find library frames.
	pub internal_path_patterns: Vec<String>,
	/// Object types whose event params bypass reference decoding.
	pub passthrough_types: Vec<String>,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			sdk_language: "rust".to_string(),
			stack_capture: StackCaptureMode::default(),
			internal_path_patterns: vec![DEFAULT_INTERNAL_PATH_PATTERN.to_string()],
			passthrough_types: DEFAULT_PASSTHROUGH_TYPES.iter().map(|t| t.to_string()).collect(),
		}
	}
}

impl ConnectionConfig {
	/// Defaults with `TETHER_*` environment overrides applied.
	///
	/// - `TETHER_STACK_CAPTURE`: `full`, `caller` or `off`
	/// - `TETHER_INTERNAL_PATHS`: extra `:`-separated path patterns
	/// - `TETHER_SDK_LANGUAGE`: overrides `sdk_language`
	pub fn from_env() -> Result<Self> {
		Self::default().with_overrides(|key| std::env::var(key).ok())
	}

	/// Applies overrides read through `lookup` (an environment-like source).
	pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(mode) = lookup(ENV_STACK_CAPTURE) {
			self.stack_capture = mode.parse()?;
		}
		if let Some(paths) = lookup(ENV_INTERNAL_PATHS) {
			self.internal_path_patterns.extend(
				paths
					.split(':')
					.map(str::trim)
					.filter(|p| !p.is_empty())
					.map(str::to_string),
			);
		}
		if let Some(language) = lookup(ENV_SDK_LANGUAGE) {
			self.sdk_language = language;
		}
		Ok(self)
	}

	/// Compiles `internal_path_patterns` into one matcher.
	pub fn stack_matcher(&self) -> Result<Regex> {
		if self.internal_path_patterns.is_empty() {
			return Err(Error::Config("internal_path_patterns must not be empty".into()));
		}
		let joined = self
			.internal_path_patterns
			.iter()
			.map(|p| format!("(?:{p})"))
			.collect::<Vec<_>>()
			.join("|");
		Regex::new(&joined).map_err(|e| Error::Config(format!("invalid internal path pattern: {e}")))
	}

	/// Returns true if events for `type_name` skip reference decoding.
	pub fn is_passthrough(&self, type_name: &str) -> bool {
		self.passthrough_types.iter().any(|t| t == type_name)
	}
}

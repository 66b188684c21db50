//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Default cap on encoded request and response size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Settings shared by every call made over a channel.
///
/// Missing keys fall back to [`ClientConfig::default`].
///
/// ```toml
/// max_message_size = 1048576
/// default_timeout_ms = 2500
/// dispatcher_thread_name = "greeter-dispatch"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
	/// Largest encoded request accepted at prepare time, and largest reply a
	/// transport should deliver.
	pub max_message_size: usize,
	/// Deadline applied to calls whose context sets none.
	pub default_timeout_ms: Option<u64>,
	/// Name of the dispatcher's worker thread.
	pub dispatcher_thread_name: String,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
			default_timeout_ms: None,
			dispatcher_thread_name: "cqrpc-dispatch".into(),
		}
	}
}

impl ClientConfig {
	/// Parses a TOML document.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Config`] on malformed TOML or unknown keys.
	pub fn from_toml_str(input: &str) -> Result<Self> {
		Ok(toml::from_str(input)?)
	}

	/// Reads and parses a TOML file.
	///
	/// # Errors
	///
	/// Returns [`crate::Error::Io`] if the file cannot be read, and
	/// [`crate::Error::Config`] if it does not parse.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let input = std::fs::read_to_string(path.as_ref())?;
		tracing::debug!(path = %path.as_ref().display(), "config.load");
		Self::from_toml_str(&input)
	}

	/// [`ClientConfig::default_timeout_ms`] as a duration.
	pub fn default_timeout(&self) -> Option<Duration> {
		self.default_timeout_ms.map(Duration::from_millis)
	}
}

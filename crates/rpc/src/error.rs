//! Error types for call construction and resolution.

use std::fmt;
use std::io;

use crate::status::Status;

/// Recoverable failures surfaced to callers.
///
/// Broken correlation invariants are not represented here; they go through
/// [`violation`] and abort the offending operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The method path is not of the form `/package.Service/Method`.
	#[error("invalid method path: {0:?}")]
	InvalidMethod(String),
	/// The request could not be serialized.
	#[error("failed to encode request: {0}")]
	Encode(#[source] postcard::Error),
	/// The response payload could not be deserialized.
	#[error("failed to decode response: {0}")]
	Decode(#[source] postcard::Error),
	/// The encoded request exceeds the channel's message size limit.
	#[error("request of {size} bytes exceeds limit of {limit} bytes")]
	MessageTooLarge {
		/// Encoded request size.
		size: usize,
		/// Configured limit.
		limit: usize,
	},
	/// The completion queue no longer accepts new calls.
	#[error("completion queue is shut down")]
	QueueShutdown,
	/// The call completed with a not-ok status.
	#[error("rpc failed: {0}")]
	Status(#[from] Status),
	/// The transport reported `success=false` for the call.
	#[error("call failed before a status was received")]
	CallFailed,
	/// The completion queue shut down while the call was in flight.
	#[error("call cancelled by completion queue shutdown")]
	Cancelled,
	/// Configuration could not be parsed.
	#[error("invalid configuration: {0}")]
	Config(#[from] toml::de::Error),
	/// Configuration could not be read.
	#[error("{0}")]
	Io(#[from] io::Error),
}

impl Error {
	/// Returns true for cancellation by queue shutdown.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}

	/// Returns the RPC status, if the call completed with one.
	pub fn status(&self) -> Option<&Status> {
		match self {
			Self::Status(status) => Some(status),
			_ => None,
		}
	}
}

/// Result type for call operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Aborts on a broken correlation invariant.
///
/// Tag-not-found, double start and double resolve are bugs in the calling
/// code or the transport, never remote failures.
#[track_caller]
#[cold]
pub(crate) fn violation(detail: impl fmt::Display) -> ! {
	tracing::error!(%detail, "cq.protocol_violation");
	panic!("completion queue protocol violation: {detail}");
}

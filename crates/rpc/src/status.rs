//! RPC-level status carried by failed calls.

use std::fmt;

/// Canonical failure codes reported by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
	/// The call was cancelled before it completed.
	Cancelled,
	/// Failure with no better classification.
	Unknown,
	/// The server rejected the request payload.
	InvalidArgument,
	/// The call deadline expired before a reply was produced.
	DeadlineExceeded,
	/// A requested entity does not exist.
	NotFound,
	/// A size or quota limit was hit.
	ResourceExhausted,
	/// The server does not implement the method.
	Unimplemented,
	/// The server hit an internal invariant failure.
	Internal,
	/// The endpoint is unreachable.
	Unavailable,
}

impl Code {
	/// Stable lowercase name, used in logs and `Display`.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Cancelled => "cancelled",
			Self::Unknown => "unknown",
			Self::InvalidArgument => "invalid_argument",
			Self::DeadlineExceeded => "deadline_exceeded",
			Self::NotFound => "not_found",
			Self::ResourceExhausted => "resource_exhausted",
			Self::Unimplemented => "unimplemented",
			Self::Internal => "internal",
			Self::Unavailable => "unavailable",
		}
	}
}

impl fmt::Display for Code {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Not-ok outcome of an RPC, as reported by the remote side or the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Status {
	code: Code,
	message: String,
}

impl Status {
	/// Creates a status with an explicit code.
	pub fn new(code: Code, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}

	/// `InvalidArgument` status.
	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::new(Code::InvalidArgument, message)
	}

	/// `DeadlineExceeded` status.
	pub fn deadline_exceeded(message: impl Into<String>) -> Self {
		Self::new(Code::DeadlineExceeded, message)
	}

	/// `ResourceExhausted` status.
	pub fn resource_exhausted(message: impl Into<String>) -> Self {
		Self::new(Code::ResourceExhausted, message)
	}

	/// `Unimplemented` status.
	pub fn unimplemented(message: impl Into<String>) -> Self {
		Self::new(Code::Unimplemented, message)
	}

	/// `Internal` status.
	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(Code::Internal, message)
	}

	/// `Unavailable` status.
	pub fn unavailable(message: impl Into<String>) -> Self {
		Self::new(Code::Unavailable, message)
	}

	/// Failure code.
	pub const fn code(&self) -> Code {
		self.code
	}

	/// Human-readable detail.
	pub fn message(&self) -> &str {
		&self.message
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_code_and_message() {
		let status = Status::unimplemented("no handler for /a/b");
		assert_eq!(status.to_string(), "unimplemented: no handler for /a/b");
		assert_eq!(status.code(), Code::Unimplemented);
	}
}

//! Test helpers for driving completions by hand.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::call::{CallContext, Completer};
use crate::channel::{Channel, OutboundCall, Transport};
use crate::codec::{self, Message};
use crate::config::ClientConfig;
use crate::status::Status;
use crate::tag::Tag;

/// A call captured by [`ManualTransport`].
#[derive(Debug)]
pub struct StartedCall {
	/// Endpoint the call was addressed to.
	pub target: String,
	/// Method path.
	pub method: &'static str,
	/// Encoded request.
	pub payload: Bytes,
	/// Deadline and metadata.
	pub context: CallContext,
	/// Reply size limit of the issuing channel.
	pub max_reply_size: usize,
	/// Completion capability.
	pub completer: Completer,
}

impl StartedCall {
	/// Tag of the captured call.
	pub fn tag(&self) -> Tag {
		self.completer.tag()
	}

	/// Finishes the call with an encoded `message`.
	///
	/// # Panics
	///
	/// Panics if `message` does not encode.
	pub fn reply<M: Message>(self, message: &M) {
		let payload = codec::encode(message).expect("encode test reply");
		self.completer.finish(Ok(payload));
	}

	/// Finishes the call with a not-ok status.
	pub fn reply_status(self, status: Status) {
		self.completer.finish(Err(status));
	}
}

/// Transport that records calls and never completes them on its own.
///
/// Tests pick the completion order by taking calls and finishing them.
#[derive(Debug, Default)]
pub struct ManualTransport {
	started: Mutex<Vec<StartedCall>>,
}

impl ManualTransport {
	/// Creates an empty transport.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Channel to `target` backed by this transport.
	pub fn channel(self: &Arc<Self>, target: &str) -> Channel {
		self.channel_with_config(target, ClientConfig::default())
	}

	/// Channel to `target` with an explicit configuration.
	pub fn channel_with_config(self: &Arc<Self>, target: &str, config: ClientConfig) -> Channel {
		Channel::with_config(target, Arc::clone(self) as Arc<dyn Transport>, config)
	}

	/// Removes the captured call with `tag`.
	pub fn take(&self, tag: Tag) -> Option<StartedCall> {
		let mut started = self.started.lock();
		let index = started.iter().position(|call| call.tag() == tag)?;
		Some(started.remove(index))
	}

	/// Removes every captured call, oldest first.
	pub fn take_all(&self) -> Vec<StartedCall> {
		std::mem::take(&mut *self.started.lock())
	}

	/// Number of captured calls not yet taken.
	pub fn len(&self) -> usize {
		self.started.lock().len()
	}

	/// True when no captured call is waiting.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Transport for ManualTransport {
	fn start_call(&self, target: &str, call: OutboundCall) {
		let OutboundCall {
			method,
			payload,
			context,
			max_reply_size,
			completer,
		} = call;
		self.started.lock().push(StartedCall {
			target: target.to_owned(),
			method,
			payload,
			context,
			max_reply_size,
			completer,
		});
	}
}

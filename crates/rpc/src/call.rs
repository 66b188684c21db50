//! Call handles and their transport-side completers.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::channel::{Channel, OutboundCall};
use crate::codec::{self, Message};
use crate::error::{Error, Result, violation};
use crate::queue::{CompletionQueue, Event};
use crate::status::Status;
use crate::stub::validate_method_path;
use crate::tag::Tag;

/// Reply written by a transport before it posts a successful event.
pub type Reply = std::result::Result<Bytes, Status>;

/// Per-call options handed to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
	deadline: Option<Instant>,
	metadata: Vec<(String, String)>,
}

impl CallContext {
	/// Context with no deadline and no metadata.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets an absolute deadline.
	#[must_use]
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(deadline);
		self
	}

	/// Sets a deadline relative to now.
	#[must_use]
	pub fn with_timeout(self, timeout: Duration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Appends a metadata pair.
	#[must_use]
	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.push((key.into(), value.into()));
		self
	}

	/// Absolute deadline, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Metadata pairs in insertion order.
	pub fn metadata(&self) -> &[(String, String)] {
		&self.metadata
	}

	/// First value stored under `key`.
	pub fn metadata_value(&self, key: &str) -> Option<&str> {
		self.metadata
			.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v.as_str())
	}
}

/// Response buffer shared between a handle and its completer.
#[derive(Default)]
struct CallSlot {
	reply: Mutex<Option<Reply>>,
}

/// Transport-side capability to post a call's terminal event.
///
/// Consumed by [`Completer::finish`] or [`Completer::fail`]. A completer that is
/// dropped without either posts `success=false`, so a transport that loses a call
/// still terminates it.
pub struct Completer {
	tag: Tag,
	queue: CompletionQueue,
	slot: Arc<CallSlot>,
	posted: bool,
}

impl fmt::Debug for Completer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Completer")
			.field("tag", &self.tag)
			.field("posted", &self.posted)
			.finish_non_exhaustive()
	}
}

impl Completer {
	/// Tag of the call this completer terminates.
	pub fn tag(&self) -> Tag {
		self.tag
	}

	/// Stores the reply, then posts `success=true`.
	pub fn finish(mut self, reply: Reply) {
		*self.slot.reply.lock() = Some(reply);
		self.posted = true;
		self.queue.post(self.tag, true);
	}

	/// Posts `success=false` without a reply.
	pub fn fail(mut self) {
		self.posted = true;
		self.queue.post(self.tag, false);
	}
}

impl Drop for Completer {
	fn drop(&mut self) {
		if !self.posted {
			tracing::warn!(tag = %self.tag, "call.completer_dropped");
			self.queue.post(self.tag, false);
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallState {
	Prepared,
	Started,
	Resolved,
}

/// One unary call, from preparation to resolution.
///
/// Dropping a handle that was never resolved retires its tag; a completion that
/// arrives later is discarded.
pub struct CallHandle<Resp> {
	tag: Tag,
	method: &'static str,
	channel: Channel,
	queue: CompletionQueue,
	slot: Arc<CallSlot>,
	request: Option<(Bytes, CallContext)>,
	state: CallState,
	_response: PhantomData<fn() -> Resp>,
}

impl<Resp> fmt::Debug for CallHandle<Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallHandle")
			.field("tag", &self.tag)
			.field("method", &self.method)
			.field("state", &self.state)
			.finish_non_exhaustive()
	}
}

impl<Resp: Message> CallHandle<Resp> {
	/// Encodes and validates a request and issues its tag. No I/O happens here.
	pub(crate) fn prepare<Req: Message>(
		channel: &Channel,
		method: &'static str,
		request: &Req,
		mut context: CallContext,
		queue: &CompletionQueue,
	) -> Result<Self> {
		validate_method_path(method)?;
		let payload = codec::encode(request)?;
		let limit = channel.config().max_message_size;
		if payload.len() > limit {
			return Err(Error::MessageTooLarge {
				size: payload.len(),
				limit,
			});
		}
		if context.deadline.is_none()
			&& let Some(timeout) = channel.config().default_timeout()
		{
			context.deadline = Some(Instant::now() + timeout);
		}

		let tag = queue.allocate()?;
		Ok(Self {
			tag,
			method,
			channel: channel.clone(),
			queue: queue.clone(),
			slot: Arc::default(),
			request: Some((payload, context)),
			state: CallState::Prepared,
			_response: PhantomData,
		})
	}

	/// Decodes the outcome of the event that terminated this call.
	///
	/// `success=false` and queue cancellation never expose the response buffer.
	///
	/// # Errors
	///
	/// - [`Error::Cancelled`] if the queue shut down while the call was in flight.
	/// - [`Error::CallFailed`] if the transport reported `success=false`.
	/// - [`Error::Status`] if the call completed with a not-ok status, or with a
	///   reply larger than the channel's `max_message_size` (`ResourceExhausted`).
	/// - [`Error::Decode`] if the response payload does not decode.
	///
	/// # Panics
	///
	/// Panics if `event` belongs to another call or the call was never started.
	pub fn resolve(mut self, event: Event) -> Result<Resp> {
		if event.tag() != self.tag {
			violation(format_args!(
				"{} resolved with event for {}",
				self.tag,
				event.tag()
			));
		}
		if self.state != CallState::Started {
			violation(format_args!("{} resolved while {:?}", self.tag, self.state));
		}
		self.state = CallState::Resolved;
		self.queue.release(self.tag);

		let reply = self.slot.reply.lock().take();
		let outcome = if event.is_cancelled() {
			Err(Error::Cancelled)
		} else if !event.ok() {
			Err(Error::CallFailed)
		} else {
			let limit = self.channel.config().max_message_size;
			match reply {
				Some(Ok(payload)) if payload.len() > limit => {
					let detail = format!(
						"{}: reply of {} bytes exceeds limit of {limit} bytes",
						self.method,
						payload.len()
					);
					Err(Error::Status(Status::resource_exhausted(detail)))
				}
				Some(Ok(payload)) => codec::decode(&payload),
				Some(Err(status)) => Err(Error::Status(status)),
				None => violation(format_args!("{} completed without a reply", self.tag)),
			}
		};
		tracing::debug!(
			tag = %self.tag,
			method = self.method,
			ok = outcome.is_ok(),
			"call.resolve"
		);
		outcome
	}
}

impl<Resp> CallHandle<Resp> {
	/// Correlation tag; live from [`CallHandle::start`] until resolution.
	pub fn tag(&self) -> Tag {
		self.tag
	}

	/// Method path this call targets.
	pub fn method(&self) -> &'static str {
		self.method
	}

	/// True once [`CallHandle::start`] has run.
	pub fn is_started(&self) -> bool {
		self.state != CallState::Prepared
	}

	/// Hands the call to the channel's transport.
	///
	/// Exactly one event for this tag will reach the queue: the transport's
	/// completion, or a cancellation if the queue shuts down first.
	///
	/// # Errors
	///
	/// [`Error::Cancelled`] if the queue shut down after the call was prepared.
	/// The call is then resolved on the spot: the transport never sees it and
	/// no event is queued for it.
	///
	/// # Panics
	///
	/// Panics if the call was already started.
	pub fn start(&mut self) -> Result<()> {
		let Some((payload, context)) = self.request.take() else {
			violation(format_args!("{} started twice", self.tag));
		};
		if !self.queue.activate(self.tag) {
			self.state = CallState::Resolved;
			tracing::debug!(tag = %self.tag, method = self.method, "call.start.cancelled");
			return Err(Error::Cancelled);
		}
		self.state = CallState::Started;
		tracing::debug!(
			tag = %self.tag,
			method = self.method,
			target = self.channel.target(),
			len = payload.len(),
			"call.start"
		);
		self.channel.start_call(OutboundCall {
			method: self.method,
			payload,
			context,
			max_reply_size: self.channel.config().max_message_size,
			completer: Completer {
				tag: self.tag,
				queue: self.queue.clone(),
				slot: Arc::clone(&self.slot),
				posted: false,
			},
		});
		Ok(())
	}
}

impl<Resp> Drop for CallHandle<Resp> {
	fn drop(&mut self) {
		if self.state != CallState::Resolved {
			self.queue.abandon(self.tag);
		}
	}
}

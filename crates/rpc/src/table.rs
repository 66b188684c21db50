//! Correlation table: tag → in-flight call plus the slot its consumer awaits.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::call::CallHandle;
use crate::codec::Message;
use crate::error::{Error, Result, violation};
use crate::queue::Event;
use crate::tag::Tag;

/// Type-erased table entry.
trait Resolve: Send {
	fn resolve(self: Box<Self>, event: Event);
}

struct Pending<Resp> {
	call: CallHandle<Resp>,
	reply_tx: oneshot::Sender<Result<Resp>>,
}

impl<Resp: Message> Resolve for Pending<Resp> {
	fn resolve(self: Box<Self>, event: Event) {
		let Pending { call, reply_tx } = *self;
		let result = call.resolve(event);
		if reply_tx.send(result).is_err() {
			tracing::trace!(tag = %event.tag(), "table.reply_dropped");
		}
	}
}

/// Calls started against one queue, keyed by tag.
///
/// Entries are inserted before their call starts and removed when the
/// matching event is dispatched.
#[derive(Default)]
pub struct CorrelationTable {
	entries: Mutex<HashMap<Tag, Box<dyn Resolve>>>,
}

impl fmt::Debug for CorrelationTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CorrelationTable")
			.field("len", &self.len())
			.finish()
	}
}

impl CorrelationTable {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Starts a prepared call and tracks it until its event is dispatched.
	///
	/// The entry is in place before the transport sees the call, so a
	/// completion can never outrun its registration. A call whose queue shut
	/// down after it was prepared is not tracked; its reply is
	/// [`Error::Cancelled`] straight away.
	///
	/// # Panics
	///
	/// Panics if the call was already started or its tag is already tracked.
	pub fn start<Resp: Message>(&self, mut call: CallHandle<Resp>) -> PendingReply<Resp> {
		let tag = call.tag();
		let (reply_tx, reply_rx) = oneshot::channel();
		let mut entries = self.entries.lock();
		if entries.contains_key(&tag) {
			violation(format_args!("{tag} tracked while still live"));
		}
		match call.start() {
			Ok(()) => {
				entries.insert(tag, Box::new(Pending { call, reply_tx }));
				tracing::trace!(%tag, tracked = entries.len(), "table.start");
			}
			Err(error) => {
				// Resolved at start; no event will follow.
				let _ = reply_tx.send(Err(error));
			}
		}
		PendingReply { tag, reply_rx }
	}

	/// Resolves the call `event` terminates and hands the result to its consumer.
	///
	/// # Panics
	///
	/// Panics if no call is tracked under the event's tag.
	pub fn dispatch(&self, event: Event) {
		let entry = self.entries.lock().remove(&event.tag());
		let Some(entry) = entry else {
			violation(format_args!("no call tracked for {}", event.tag()));
		};
		tracing::trace!(tag = %event.tag(), ok = event.ok(), "table.dispatch");
		entry.resolve(event);
	}

	/// Drops every tracked call; their consumers observe [`Error::Cancelled`].
	pub(crate) fn cancel_all(&self) -> usize {
		let entries = std::mem::take(&mut *self.entries.lock());
		entries.len()
	}

	/// Number of calls awaiting dispatch.
	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	/// True when no call is awaiting dispatch.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Consumer side of a tracked call.
///
/// Either block on [`PendingReply::wait`] or `.await` it.
#[must_use = "a pending reply does nothing unless waited on"]
pub struct PendingReply<Resp> {
	tag: Tag,
	reply_rx: oneshot::Receiver<Result<Resp>>,
}

impl<Resp> fmt::Debug for PendingReply<Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PendingReply")
			.field("tag", &self.tag)
			.finish_non_exhaustive()
	}
}

impl<Resp> PendingReply<Resp> {
	/// Tag of the tracked call.
	pub fn tag(&self) -> Tag {
		self.tag
	}

	/// Blocks the current thread until the call resolves.
	///
	/// # Errors
	///
	/// The call's failure, or [`Error::Cancelled`] if it was dropped unresolved.
	///
	/// # Panics
	///
	/// Panics when called from within an async runtime; `.await` instead.
	pub fn wait(self) -> Result<Resp> {
		self.reply_rx.blocking_recv().unwrap_or(Err(Error::Cancelled))
	}

	/// Result of a call whose event has already been dispatched.
	pub(crate) fn into_ready(mut self) -> Result<Resp> {
		match self.reply_rx.try_recv() {
			Ok(result) => result,
			Err(oneshot::error::TryRecvError::Closed) => Err(Error::Cancelled),
			Err(oneshot::error::TryRecvError::Empty) => {
				violation(format_args!("{} dispatched without a result", self.tag))
			}
		}
	}
}

impl<Resp> Future for PendingReply<Resp> {
	type Output = Result<Resp>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.reply_rx)
			.poll(cx)
			.map(|received| received.unwrap_or(Err(Error::Cancelled)))
	}
}

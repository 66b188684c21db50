//! Completion queue: the single blocking point between transports and callers.
//!
//! Transports post one `(tag, ok)` event per started call. Consumers pull events
//! with [`CompletionQueue::next`] in completion order and resolve the call the tag
//! names. The queue also owns the tag arena, so it knows which tags are live and
//! can report every in-flight call as cancelled when it shuts down.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result, violation};
use crate::tag::{Tag, TagArena};

/// Terminal event for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
	tag: Tag,
	ok: bool,
	cancelled: bool,
}

impl Event {
	/// Tag of the call this event terminates.
	pub const fn tag(&self) -> Tag {
		self.tag
	}

	/// The transport's success flag. False means the call plumbing failed.
	pub const fn ok(&self) -> bool {
		self.ok
	}

	/// True when the event was synthesized by [`CompletionQueue::shutdown`].
	pub const fn is_cancelled(&self) -> bool {
		self.cancelled
	}
}

/// Outcome of a deadline-bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
	/// An event became available.
	Ready(Event),
	/// The queue is shut down and fully drained.
	Shutdown,
	/// The deadline passed with no event.
	Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	/// Tag issued, call not started.
	Prepared,
	/// Started, waiting for the transport.
	Live,
	/// Event queued or consumed, waiting for release.
	Posted,
	/// Cancelled by shutdown; a late transport completion is discarded.
	Cancelled {
		/// The transport already posted its own completion.
		completed: bool,
	},
	/// Handle dropped while live; the transport completion retires the tag.
	Abandoned,
}

#[derive(Default)]
struct QueueState {
	tags: TagArena<Phase>,
	ready: VecDeque<Event>,
	/// Tags released before their transport posted; the late post is discarded.
	retired: HashSet<Tag>,
	shutdown: bool,
}

impl QueueState {
	/// Shut down with nothing left to return.
	///
	/// Prepared tags never hold this back: a call started after shutdown is
	/// cancelled without an event.
	fn drained(&self) -> bool {
		self.shutdown && self.ready.is_empty()
	}

	/// Removes `tag`, remembering it if its transport still owes a post.
	fn retire(&mut self, tag: Tag, owes_post: bool) {
		self.tags.remove(tag);
		if owes_post {
			self.retired.insert(tag);
		}
	}
}

struct Inner {
	state: Mutex<QueueState>,
	available: Condvar,
}

/// Thread-safe sink for call completion events.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct CompletionQueue {
	inner: Arc<Inner>,
}

impl Default for CompletionQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for CompletionQueue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("CompletionQueue")
			.field("outstanding", &state.tags.len())
			.field("ready", &state.ready.len())
			.field("shutdown", &state.shutdown)
			.finish()
	}
}

impl CompletionQueue {
	/// Creates an empty, open queue.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				state: Mutex::new(QueueState::default()),
				available: Condvar::new(),
			}),
		}
	}

	/// Issues a tag for a call that is about to be prepared.
	pub(crate) fn allocate(&self) -> Result<Tag> {
		let mut state = self.inner.state.lock();
		if state.shutdown {
			return Err(Error::QueueShutdown);
		}
		let Some(tag) = state.tags.insert(Phase::Prepared) else {
			violation("tag arena exhausted");
		};
		tracing::trace!(%tag, "cq.allocate");
		Ok(tag)
	}

	/// Marks a prepared tag live.
	///
	/// Returns false when the queue shut down since the tag was issued. The tag
	/// is then retired on the spot: no event is queued and the call must not be
	/// sent.
	pub(crate) fn activate(&self, tag: Tag) -> bool {
		let mut state = self.inner.state.lock();
		let shutdown = state.shutdown;
		match state.tags.get_mut(tag) {
			Some(Phase::Prepared) if shutdown => {
				state.tags.remove(tag);
				tracing::debug!(%tag, "cq.activate.after_shutdown");
				false
			}
			Some(phase @ Phase::Prepared) => {
				*phase = Phase::Live;
				true
			}
			Some(phase) => violation(format_args!("{tag} started while {phase:?}")),
			None => violation(format_args!("{tag} started but never issued")),
		}
	}

	/// Posts the terminal event for a live call.
	///
	/// Called by transports, normally through [`crate::Completer`]. Posting for a
	/// tag that was cancelled by shutdown, or whose handle was dropped, is
	/// discarded. Any other post for a tag that is not live aborts.
	pub fn post(&self, tag: Tag, ok: bool) {
		let mut state = self.inner.state.lock();
		match state.tags.get_mut(tag) {
			Some(phase @ Phase::Live) => *phase = Phase::Posted,
			Some(Phase::Cancelled { completed: true }) => violation(format_args!("{tag} posted twice")),
			Some(Phase::Cancelled { completed }) => {
				*completed = true;
				tracing::debug!(%tag, ok, "cq.post.after_cancel");
				return;
			}
			Some(Phase::Abandoned) => {
				state.tags.remove(tag);
				tracing::debug!(%tag, ok, "cq.post.abandoned");
				return;
			}
			Some(Phase::Prepared) => violation(format_args!("{tag} posted before start")),
			Some(Phase::Posted) => violation(format_args!("{tag} posted twice")),
			None => {
				if state.retired.remove(&tag) {
					tracing::debug!(%tag, ok, "cq.post.retired");
					return;
				}
				violation(format_args!("{tag} posted but not outstanding"))
			}
		}
		state.ready.push_back(Event {
			tag,
			ok,
			cancelled: false,
		});
		tracing::trace!(%tag, ok, ready = state.ready.len(), "cq.post");
		drop(state);
		self.inner.available.notify_one();
	}

	/// Blocks until an event is available.
	///
	/// Returns `None` once the queue is shut down and every event, including
	/// cancellations for calls in flight at shutdown, has been returned.
	pub fn next(&self) -> Option<Event> {
		let mut state = self.inner.state.lock();
		loop {
			if let Some(event) = state.ready.pop_front() {
				tracing::trace!(tag = %event.tag, ok = event.ok, "cq.next");
				return Some(event);
			}
			if state.drained() {
				return None;
			}
			self.inner.available.wait(&mut state);
		}
	}

	/// Like [`CompletionQueue::next`], giving up at `deadline`.
	pub fn next_deadline(&self, deadline: Instant) -> Next {
		let mut state = self.inner.state.lock();
		loop {
			if let Some(event) = state.ready.pop_front() {
				tracing::trace!(tag = %event.tag, ok = event.ok, "cq.next");
				return Next::Ready(event);
			}
			if state.drained() {
				return Next::Shutdown;
			}
			if self.inner.available.wait_until(&mut state, deadline).timed_out() {
				return match state.ready.pop_front() {
					Some(event) => Next::Ready(event),
					None if state.drained() => Next::Shutdown,
					None => Next::Timeout,
				};
			}
		}
	}

	/// Closes the queue.
	///
	/// Every live call gets a cancellation event behind the events already
	/// posted. New calls are refused; calls prepared but not yet started are
	/// cancelled when they start, without an event.
	pub fn shutdown(&self) {
		let mut state = self.inner.state.lock();
		if state.shutdown {
			return;
		}
		state.shutdown = true;

		let QueueState {
			tags, ready, retired, ..
		} = &mut *state;
		let before = ready.len();
		for (tag, phase) in tags.iter_mut() {
			match *phase {
				Phase::Live => {
					*phase = Phase::Cancelled { completed: false };
					ready.push_back(Event {
						tag,
						ok: false,
						cancelled: true,
					});
				}
				Phase::Abandoned => {
					retired.insert(tag);
				}
				_ => {}
			}
		}
		tags.retain(|phase| *phase != Phase::Abandoned);
		let cancelled = ready.len() - before;
		tracing::debug!(cancelled, pending = before, "cq.shutdown");
		drop(state);
		self.inner.available.notify_all();
	}

	/// Returns true once [`CompletionQueue::shutdown`] has been called.
	pub fn is_shutdown(&self) -> bool {
		self.inner.state.lock().shutdown
	}

	/// Number of tags not yet released, in any phase.
	pub fn outstanding(&self) -> usize {
		self.inner.state.lock().tags.len()
	}

	/// Retires a tag whose event has been consumed and resolved.
	pub(crate) fn release(&self, tag: Tag) {
		let mut state = self.inner.state.lock();
		match state.tags.get(tag).copied() {
			Some(Phase::Posted) => state.retire(tag, false),
			Some(Phase::Cancelled { completed }) => state.retire(tag, !completed),
			Some(phase) => violation(format_args!("{tag} resolved while {phase:?}")),
			None => violation(format_args!("{tag} resolved twice")),
		}
	}

	/// Retires the tag of a handle dropped before resolution.
	pub(crate) fn abandon(&self, tag: Tag) {
		let mut state = self.inner.state.lock();
		let Some(phase) = state.tags.get(tag).copied() else {
			return;
		};
		match phase {
			Phase::Prepared | Phase::Posted => {
				state.ready.retain(|event| event.tag != tag);
				state.retire(tag, false);
			}
			Phase::Live => {
				if let Some(slot) = state.tags.get_mut(tag) {
					*slot = Phase::Abandoned;
				}
			}
			Phase::Cancelled { completed } => {
				state.ready.retain(|event| event.tag != tag);
				state.retire(tag, !completed);
			}
			Phase::Abandoned => violation(format_args!("{tag} abandoned twice")),
		}
		tracing::debug!(%tag, ?phase, "cq.abandon");
		let drained = state.drained();
		drop(state);
		if drained {
			self.inner.available.notify_all();
		}
	}
}

//! Background waiter that drains a queue into per-call reply slots.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::call::CallContext;
use crate::codec::Message;
use crate::error::Result;
use crate::queue::CompletionQueue;
use crate::stub::{Method, Stub};
use crate::table::{CorrelationTable, PendingReply};

/// Pulls events off `queue` and dispatches them through `table` until the
/// queue is shut down and drained. Returns the number of events dispatched.
///
/// Entries still tracked afterwards are dropped, which resolves their
/// consumers as cancelled. The same happens if dispatching panics.
pub fn run(queue: &CompletionQueue, table: &CorrelationTable) -> usize {
	let guard = CancelOnUnwind(table);
	let mut dispatched = 0;
	while let Some(event) = queue.next() {
		table.dispatch(event);
		dispatched += 1;
	}
	drop(guard);
	let orphaned = table.cancel_all();
	if orphaned > 0 {
		tracing::warn!(orphaned, "dispatch.exit_with_tracked_calls");
	}
	tracing::debug!(dispatched, "dispatch.exit");
	dispatched
}

/// Cancels every tracked call if the dispatch loop unwinds.
struct CancelOnUnwind<'a>(&'a CorrelationTable);

impl Drop for CancelOnUnwind<'_> {
	fn drop(&mut self) {
		if !thread::panicking() {
			return;
		}
		let orphaned = self.0.cancel_all();
		tracing::error!(orphaned, "dispatch.unwound");
	}
}

/// Owns a completion queue and the thread that waits on it.
///
/// Any number of threads may issue calls through [`Dispatcher::call`]; each
/// gets its own [`PendingReply`]. Shutting down (or dropping) the dispatcher
/// cancels calls still in flight.
pub struct Dispatcher {
	queue: CompletionQueue,
	table: Arc<CorrelationTable>,
	worker: Option<JoinHandle<usize>>,
}

impl fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Dispatcher")
			.field("queue", &self.queue)
			.field("tracked", &self.table.len())
			.finish_non_exhaustive()
	}
}

impl Dispatcher {
	/// Spawns a dispatcher on a fresh queue, using the default thread name.
	///
	/// # Errors
	///
	/// Returns an error if the worker thread cannot be spawned.
	pub fn spawn() -> io::Result<Self> {
		Self::spawn_named(crate::config::ClientConfig::default().dispatcher_thread_name)
	}

	/// Spawns a dispatcher whose worker thread is called `name`.
	///
	/// # Errors
	///
	/// Returns an error if the worker thread cannot be spawned.
	pub fn spawn_named(name: impl Into<String>) -> io::Result<Self> {
		let queue = CompletionQueue::new();
		let table = Arc::new(CorrelationTable::new());
		let worker = {
			let queue = queue.clone();
			let table = Arc::clone(&table);
			thread::Builder::new()
				.name(name.into())
				.spawn(move || run(&queue, &table))?
		};
		tracing::debug!("dispatch.spawn");
		Ok(Self {
			queue,
			table,
			worker: Some(worker),
		})
	}

	/// Queue the dispatcher waits on.
	pub fn queue(&self) -> &CompletionQueue {
		&self.queue
	}

	/// Number of calls awaiting their completion.
	pub fn in_flight(&self) -> usize {
		self.table.len()
	}

	/// Issues a call whose result is routed to the returned reply.
	///
	/// # Errors
	///
	/// Construction errors from [`Stub::prepare`], including
	/// [`crate::Error::QueueShutdown`] once the dispatcher is shutting down.
	pub fn call<Req: Message, Resp: Message>(
		&self,
		stub: &Stub,
		method: &Method<Req, Resp>,
		request: &Req,
	) -> Result<PendingReply<Resp>> {
		self.call_with(stub, method, request, CallContext::default())
	}

	/// [`Dispatcher::call`] with an explicit call context.
	///
	/// # Errors
	///
	/// See [`Dispatcher::call`].
	pub fn call_with<Req: Message, Resp: Message>(
		&self,
		stub: &Stub,
		method: &Method<Req, Resp>,
		request: &Req,
		context: CallContext,
	) -> Result<PendingReply<Resp>> {
		let call = stub.prepare_with(method, request, context, &self.queue)?;
		Ok(self.table.start(call))
	}

	/// Shuts the queue down and waits for the worker to drain it.
	///
	/// Returns the number of events the worker dispatched. A protocol violation
	/// on the worker is re-raised here.
	pub fn shutdown(mut self) -> usize {
		self.stop()
	}

	fn stop(&mut self) -> usize {
		self.queue.shutdown();
		let Some(worker) = self.worker.take() else {
			return 0;
		};
		match worker.join() {
			Ok(dispatched) => dispatched,
			Err(panic) if !thread::panicking() => std::panic::resume_unwind(panic),
			Err(_) => 0,
		}
	}
}

impl Drop for Dispatcher {
	fn drop(&mut self) {
		self.stop();
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde::{Deserialize, Serialize};

	use super::*;
	use crate::test_helpers::ManualTransport;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Word(String);

	const UPPER: Method<Word, Word> = Method::new("/test.Text/Upper");

	fn wait_for_started(transport: &ManualTransport, count: usize) {
		let deadline = std::time::Instant::now() + Duration::from_secs(5);
		while transport.len() < count {
			assert!(std::time::Instant::now() < deadline, "calls never started");
			thread::yield_now();
		}
	}

	#[test]
	fn later_call_resolves_first_when_completed_first() {
		let transport = ManualTransport::new();
		let stub = Stub::new(transport.channel("local"));
		let dispatcher = Dispatcher::spawn().unwrap();

		let a = dispatcher.call(&stub, &UPPER, &Word("a".into())).unwrap();
		let b = dispatcher.call(&stub, &UPPER, &Word("b".into())).unwrap();
		wait_for_started(&transport, 2);

		transport.take(b.tag()).unwrap().reply(&Word("B".into()));
		assert_eq!(b.wait().unwrap(), Word("B".into()));
		assert_eq!(dispatcher.in_flight(), 1);

		transport.take(a.tag()).unwrap().reply(&Word("A".into()));
		assert_eq!(a.wait().unwrap(), Word("A".into()));
		assert_eq!(dispatcher.shutdown(), 2);
	}

	#[test]
	fn shutdown_cancels_outstanding_calls() {
		let transport = ManualTransport::new();
		let stub = Stub::new(transport.channel("local"));
		let dispatcher = Dispatcher::spawn_named("dispatch-test").unwrap();

		let reply = dispatcher.call(&stub, &UPPER, &Word("never".into())).unwrap();
		let queue = dispatcher.queue().clone();
		assert_eq!(dispatcher.shutdown(), 1);

		assert!(reply.wait().unwrap_err().is_cancelled());
		assert!(matches!(
			Stub::new(transport.channel("local")).call_async(&UPPER, &Word("late".into()), &queue),
			Err(crate::Error::QueueShutdown)
		));
		// Completing after shutdown is discarded.
		transport.take_all().into_iter().for_each(|c| c.reply(&Word("x".into())));
	}

	#[test]
	fn failed_transport_reaches_only_its_consumer() {
		let transport = ManualTransport::new();
		let stub = Stub::new(transport.channel("local"));
		let dispatcher = Dispatcher::spawn().unwrap();

		let good = dispatcher.call(&stub, &UPPER, &Word("ok".into())).unwrap();
		let bad = dispatcher.call(&stub, &UPPER, &Word("bad".into())).unwrap();
		wait_for_started(&transport, 2);

		transport.take(bad.tag()).unwrap().completer.fail();
		transport.take(good.tag()).unwrap().reply(&Word("OK".into()));

		assert!(matches!(bad.wait(), Err(crate::Error::CallFailed)));
		assert_eq!(good.wait().unwrap(), Word("OK".into()));
	}

	#[test]
	fn shutdown_returns_while_a_prepared_call_is_alive() {
		let transport = ManualTransport::new();
		let stub = Stub::new(transport.channel("local"));
		let dispatcher = Dispatcher::spawn().unwrap();

		let mut prepared = stub.prepare(&UPPER, &Word("later".into()), dispatcher.queue()).unwrap();
		let queue = dispatcher.queue().clone();
		assert_eq!(dispatcher.shutdown(), 0);

		assert!(prepared.start().unwrap_err().is_cancelled());
		assert!(transport.is_empty());
		assert_eq!(queue.outstanding(), 0);
	}

	#[test]
	fn worker_panic_cancels_waiting_consumers() {
		let transport = ManualTransport::new();
		let stub = Stub::new(transport.channel("local"));
		let dispatcher = Dispatcher::spawn().unwrap();

		let tracked = dispatcher.call(&stub, &UPPER, &Word("tracked".into())).unwrap();
		// Started on the dispatcher's queue without a table entry.
		let untracked = stub.call_async(&UPPER, &Word("stray".into()), dispatcher.queue()).unwrap();
		transport.take(untracked.tag()).unwrap().reply(&Word("STRAY".into()));

		assert!(tracked.wait().unwrap_err().is_cancelled());
		let joined = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| dispatcher.shutdown()));
		assert!(joined.is_err());
		drop(untracked);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn replies_can_be_awaited_concurrently() {
		let transport = ManualTransport::new();
		let stub = Stub::new(transport.channel("local"));
		let dispatcher = Dispatcher::spawn().unwrap();

		let replies: Vec<_> = (0..16)
			.map(|i| dispatcher.call(&stub, &UPPER, &Word(format!("w{i}"))).unwrap())
			.collect();

		for call in transport.take_all().into_iter().rev() {
			let Word(text) = crate::codec::decode::<Word>(&call.payload).unwrap();
			call.reply(&Word(text.to_uppercase()));
		}

		for (i, reply) in replies.into_iter().enumerate() {
			let word = tokio::time::timeout(Duration::from_secs(5), reply)
				.await
				.expect("reply should arrive")
				.unwrap();
			assert_eq!(word, Word(format!("W{i}")));
		}
		assert_eq!(dispatcher.in_flight(), 0);
	}
}

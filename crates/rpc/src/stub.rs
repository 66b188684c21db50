//! Typed client facade over a channel.

use std::fmt;
use std::marker::PhantomData;

use crate::call::{CallContext, CallHandle};
use crate::channel::Channel;
use crate::codec::Message;
use crate::error::{Error, Result, violation};
use crate::queue::CompletionQueue;
use crate::table::CorrelationTable;

/// Descriptor of a unary method: its path plus request and response types.
pub struct Method<Req, Resp> {
	path: &'static str,
	_types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Method<Req, Resp> {
	/// Declares a method at `path`, e.g. `/helloworld.Greeter/SayHello`.
	///
	/// The path is checked when a call is prepared.
	pub const fn new(path: &'static str) -> Self {
		Self {
			path,
			_types: PhantomData,
		}
	}

	/// Full method path.
	pub const fn path(&self) -> &'static str {
		self.path
	}
}

impl<Req, Resp> Clone for Method<Req, Resp> {
	fn clone(&self) -> Self {
		*self
	}
}

impl<Req, Resp> Copy for Method<Req, Resp> {}

impl<Req, Resp> fmt::Debug for Method<Req, Resp> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("Method").field(&self.path).finish()
	}
}

/// Checks that `path` is `/service/method` with two non-empty segments and no
/// whitespace.
pub(crate) fn validate_method_path(path: &str) -> Result<()> {
	let valid = path
		.strip_prefix('/')
		.and_then(|rest| rest.split_once('/'))
		.is_some_and(|(service, method)| {
			!service.is_empty()
				&& !method.is_empty()
				&& !method.contains('/')
				&& !path.contains(char::is_whitespace)
		});
	if valid {
		Ok(())
	} else {
		Err(Error::InvalidMethod(path.to_owned()))
	}
}

/// Client entry point bound to one channel.
#[derive(Debug, Clone)]
pub struct Stub {
	channel: Channel,
}

impl Stub {
	/// Wraps a channel. No I/O.
	pub fn new(channel: Channel) -> Self {
		Self { channel }
	}

	/// Channel calls are issued on.
	pub fn channel(&self) -> &Channel {
		&self.channel
	}

	/// Builds a call without starting it.
	///
	/// # Errors
	///
	/// Rejects invalid method paths, unencodable or oversized requests, and
	/// queues that are shut down.
	pub fn prepare<Req: Message, Resp: Message>(
		&self,
		method: &Method<Req, Resp>,
		request: &Req,
		queue: &CompletionQueue,
	) -> Result<CallHandle<Resp>> {
		self.prepare_with(method, request, CallContext::default(), queue)
	}

	/// [`Stub::prepare`] with an explicit call context.
	///
	/// # Errors
	///
	/// See [`Stub::prepare`].
	pub fn prepare_with<Req: Message, Resp: Message>(
		&self,
		method: &Method<Req, Resp>,
		request: &Req,
		context: CallContext,
		queue: &CompletionQueue,
	) -> Result<CallHandle<Resp>> {
		CallHandle::prepare(&self.channel, method.path(), request, context, queue)
	}

	/// Prepares and starts a call; its completion will surface on `queue`.
	///
	/// # Errors
	///
	/// See [`Stub::prepare`].
	pub fn call_async<Req: Message, Resp: Message>(
		&self,
		method: &Method<Req, Resp>,
		request: &Req,
		queue: &CompletionQueue,
	) -> Result<CallHandle<Resp>> {
		self.call_async_with(method, request, CallContext::default(), queue)
	}

	/// [`Stub::call_async`] with an explicit call context.
	///
	/// # Errors
	///
	/// See [`Stub::prepare`], plus [`Error::Cancelled`] when `queue` shuts down
	/// between preparing and starting.
	pub fn call_async_with<Req: Message, Resp: Message>(
		&self,
		method: &Method<Req, Resp>,
		request: &Req,
		context: CallContext,
		queue: &CompletionQueue,
	) -> Result<CallHandle<Resp>> {
		let mut call = self.prepare_with(method, request, context, queue)?;
		call.start()?;
		Ok(call)
	}

	/// Issues a call and blocks until it resolves.
	///
	/// # Errors
	///
	/// Construction errors from [`Stub::prepare`], plus every failure
	/// [`CallHandle::resolve`] reports.
	pub fn call<Req: Message, Resp: Message>(&self, method: &Method<Req, Resp>, request: &Req) -> Result<Resp> {
		self.call_with(method, request, CallContext::default())
	}

	/// [`Stub::call`] with an explicit call context.
	///
	/// Runs on a private queue: one tracked call, one `next()`, one dispatch.
	/// The event must carry the call's tag; anything else aborts.
	///
	/// # Errors
	///
	/// See [`Stub::call`].
	pub fn call_with<Req: Message, Resp: Message>(
		&self,
		method: &Method<Req, Resp>,
		request: &Req,
		context: CallContext,
	) -> Result<Resp> {
		let queue = CompletionQueue::new();
		let table = CorrelationTable::new();
		let reply = table.start(self.prepare_with(method, request, context, &queue)?);

		let Some(event) = queue.next() else {
			violation("private completion queue shut down under a blocking call");
		};
		table.dispatch(event);
		queue.shutdown();
		reply.into_ready()
	}
}

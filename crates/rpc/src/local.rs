//! In-process transport: endpoints served by handler tables in the same process.
//!
//! Each call runs on its own named thread and finishes through its
//! [`Completer`](crate::Completer), so completions arrive from foreign threads
//! in whatever order the handlers finish.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock};

use crate::call::{CallContext, Reply};
use crate::channel::{Channel, OutboundCall, Transport};
use crate::codec::{self, Message};
use crate::config::{ClientConfig, DEFAULT_MAX_MESSAGE_SIZE};
use crate::status::Status;
use crate::stub::Method;

type Handler = Arc<dyn Fn(Bytes, &CallContext) -> Reply + Send + Sync>;

/// Method table for one endpoint.
#[derive(Default, Clone)]
pub struct LocalServer {
	handlers: HashMap<&'static str, Handler>,
}

impl fmt::Debug for LocalServer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut methods: Vec<_> = self.handlers.keys().collect();
		methods.sort();
		f.debug_struct("LocalServer")
			.field("methods", &methods)
			.finish()
	}
}

impl LocalServer {
	/// Server with no routes; every method is `Unimplemented`.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a typed handler for `method`.
	///
	/// Undecodable requests are answered with `InvalidArgument`.
	#[must_use]
	pub fn route<Req, Resp, F>(self, method: &Method<Req, Resp>, handler: F) -> Self
	where
		Req: Message,
		Resp: Message,
		F: Fn(Req, &CallContext) -> Result<Resp, Status> + Send + Sync + 'static,
	{
		let path = method.path();
		self.route_raw(path, move |payload, context| {
			let request = codec::decode::<Req>(&payload)
				.map_err(|e| Status::invalid_argument(format!("{path}: {e}")))?;
			let response = handler(request, context)?;
			codec::encode(&response).map_err(|e| Status::internal(format!("{path}: {e}")))
		})
	}

	/// Registers a handler over raw payloads.
	#[must_use]
	pub fn route_raw<F>(mut self, path: &'static str, handler: F) -> Self
	where
		F: Fn(Bytes, &CallContext) -> Reply + Send + Sync + 'static,
	{
		self.handlers.insert(path, Arc::new(handler));
		self
	}

	fn handle(&self, method: &str, payload: Bytes, context: &CallContext) -> Reply {
		match self.handlers.get(method) {
			Some(handler) => handler(payload, context),
			None => Err(Status::unimplemented(format!("method {method} not found"))),
		}
	}
}

/// Transport delivering calls to [`LocalServer`]s bound by endpoint name.
///
/// Replies larger than either this transport's limit or the calling channel's
/// `max_message_size` finish with `ResourceExhausted`. A call with a deadline
/// races its handler on a separate thread and finishes with `DeadlineExceeded`
/// when the deadline wins, even if the handler never returns.
pub struct LocalTransport {
	servers: RwLock<HashMap<String, Arc<LocalServer>>>,
	max_message_size: usize,
}

impl fmt::Debug for LocalTransport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut endpoints: Vec<_> = self.servers.read().keys().cloned().collect();
		endpoints.sort();
		f.debug_struct("LocalTransport")
			.field("endpoints", &endpoints)
			.field("max_message_size", &self.max_message_size)
			.finish()
	}
}

impl LocalTransport {
	/// Creates a transport with no bound endpoints.
	pub fn new() -> Arc<Self> {
		Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
	}

	/// Creates a transport that rejects replies larger than `limit` bytes.
	pub fn with_max_message_size(limit: usize) -> Arc<Self> {
		Arc::new(Self {
			servers: RwLock::new(HashMap::new()),
			max_message_size: limit,
		})
	}

	/// Serves `server` at `endpoint`, replacing any previous binding.
	pub fn bind(&self, endpoint: impl Into<String>, server: LocalServer) {
		let endpoint = endpoint.into();
		tracing::debug!(%endpoint, ?server, "local.bind");
		self.servers.write().insert(endpoint, Arc::new(server));
	}

	/// Removes the binding at `endpoint`. Calls already running finish normally.
	pub fn unbind(&self, endpoint: &str) -> bool {
		self.servers.write().remove(endpoint).is_some()
	}

	/// Opens a channel to `endpoint`.
	pub fn channel(self: &Arc<Self>, endpoint: impl Into<String>) -> Channel {
		self.channel_with_config(endpoint, ClientConfig::default())
	}

	/// Opens a channel to `endpoint` with an explicit client configuration.
	pub fn channel_with_config(self: &Arc<Self>, endpoint: impl Into<String>, config: ClientConfig) -> Channel {
		Channel::with_config(endpoint, Arc::clone(self) as Arc<dyn Transport>, config)
	}
}

impl Transport for LocalTransport {
	fn start_call(&self, target: &str, call: OutboundCall) {
		let server = self.servers.read().get(target).cloned();
		let OutboundCall {
			method,
			payload,
			context,
			max_reply_size,
			completer,
		} = call;
		let tag = completer.tag();

		let Some(server) = server else {
			tracing::debug!(%tag, target, "local.unavailable");
			completer.finish(Err(Status::unavailable(format!("no server bound at {target}"))));
			return;
		};

		let limit = self.max_message_size.min(max_reply_size);
		let spawned = thread::Builder::new()
			.name(format!("cqrpc-local-{}", tag.into_raw()))
			.spawn(move || {
				// A handler that panics yields no reply; dropping the completer fails the call.
				let Some(reply) = serve(server, method, payload, context, limit) else {
					return;
				};
				tracing::trace!(%tag, method, ok = reply.is_ok(), "local.complete");
				completer.finish(reply);
			});
		if let Err(error) = spawned {
			// The closure, and with it the completer, is dropped: the call fails.
			tracing::error!(%tag, %error, "local.spawn_failed");
		}
	}
}

/// Runs the handler for one call. `None` means the handler panicked.
fn serve(
	server: Arc<LocalServer>,
	method: &'static str,
	payload: Bytes,
	context: CallContext,
	limit: usize,
) -> Option<Reply> {
	let reply = match context.deadline() {
		None => server.handle(method, payload, &context),
		Some(deadline) if Instant::now() >= deadline => {
			Err(Status::deadline_exceeded(format!("{method}: deadline passed before dispatch")))
		}
		Some(deadline) => serve_until(server, method, payload, context, deadline)?,
	};
	Some(reply.and_then(|reply| {
		if reply.len() > limit {
			return Err(Status::resource_exhausted(format!(
				"{method}: reply of {} bytes exceeds limit of {limit} bytes",
				reply.len()
			)));
		}
		Ok(reply)
	}))
}

enum Outcome {
	Running,
	Replied(Reply),
	Panicked,
	Expired,
}

struct Race {
	outcome: Mutex<Outcome>,
	settled: Condvar,
}

/// Marks the race lost by the handler if its thread unwinds.
struct SettleOnDrop(Arc<Race>);

impl Drop for SettleOnDrop {
	fn drop(&mut self) {
		let mut outcome = self.0.outcome.lock();
		if matches!(*outcome, Outcome::Running) {
			*outcome = Outcome::Panicked;
		}
		drop(outcome);
		self.0.settled.notify_one();
	}
}

/// Runs the handler on its own thread and stops waiting at `deadline`.
///
/// A handler still running at the deadline is left to finish; its reply is
/// dropped.
fn serve_until(
	server: Arc<LocalServer>,
	method: &'static str,
	payload: Bytes,
	context: CallContext,
	deadline: Instant,
) -> Option<Reply> {
	let race = Arc::new(Race {
		outcome: Mutex::new(Outcome::Running),
		settled: Condvar::new(),
	});
	let handler = {
		let race = Arc::clone(&race);
		thread::Builder::new()
			.name(format!("{}-handler", thread::current().name().unwrap_or("cqrpc-local")))
			.spawn(move || {
				let guard = SettleOnDrop(race);
				let reply = server.handle(method, payload, &context);
				let mut outcome = guard.0.outcome.lock();
				if matches!(*outcome, Outcome::Running) {
					*outcome = Outcome::Replied(reply);
				}
			})
	};
	if let Err(error) = handler {
		tracing::error!(%error, method, "local.spawn_failed");
		return None;
	}

	let mut outcome = race.outcome.lock();
	while matches!(*outcome, Outcome::Running) {
		if race.settled.wait_until(&mut outcome, deadline).timed_out() {
			break;
		}
	}
	match std::mem::replace(&mut *outcome, Outcome::Expired) {
		Outcome::Replied(reply) => Some(reply),
		Outcome::Panicked => None,
		Outcome::Running | Outcome::Expired => {
			tracing::debug!(method, "local.deadline_exceeded");
			Some(Err(Status::deadline_exceeded(format!("{method}: deadline passed while serving"))))
		}
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use serde::{Deserialize, Serialize};

	use super::*;
	use crate::Error;
	use crate::status::Code;
	use crate::stub::Stub;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Text(String);

	const REVERSE: Method<Text, Text> = Method::new("/test.Text/Reverse");
	const SLOW: Method<Text, Text> = Method::new("/test.Text/Slow");
	const PANIC: Method<Text, Text> = Method::new("/test.Text/Panic");
	const HANG: Method<Text, Text> = Method::new("/test.Text/Hang");
	const PAD: Method<u32, Text> = Method::new("/test.Text/Pad");
	const MISSING: Method<Text, Text> = Method::new("/test.Text/Missing");

	fn server() -> LocalServer {
		LocalServer::new()
			.route(&REVERSE, |Text(s), _| Ok(Text(s.chars().rev().collect())))
			.route(&SLOW, |text, _| {
				thread::sleep(Duration::from_millis(50));
				Ok(text)
			})
			.route(&PANIC, |_: Text, _| -> Result<Text, Status> { panic!("handler exploded") })
			.route(&HANG, |text, _| {
				thread::sleep(Duration::from_secs(30));
				Ok(text)
			})
			.route(&PAD, |len, _| Ok(Text("x".repeat(len as usize))))
	}

	fn stub() -> Stub {
		let transport = LocalTransport::new();
		transport.bind("local:1", server());
		Stub::new(transport.channel("local:1"))
	}

	#[test]
	fn routed_method_replies() {
		assert_eq!(stub().call(&REVERSE, &Text("abc".into())).unwrap(), Text("cba".into()));
	}

	#[test]
	fn unknown_method_is_unimplemented() {
		let err = stub().call(&MISSING, &Text("x".into())).unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::Unimplemented));
	}

	#[test]
	fn unbound_endpoint_is_unavailable() {
		let transport = LocalTransport::new();
		transport.bind("local:1", server());
		assert!(transport.unbind("local:1"));

		let err = Stub::new(transport.channel("local:1"))
			.call(&REVERSE, &Text("x".into()))
			.unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::Unavailable));
	}

	#[test]
	fn deadline_is_enforced() {
		let context = CallContext::new().with_timeout(Duration::from_millis(5));
		let err = stub().call_with(&SLOW, &Text("x".into()), context).unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::DeadlineExceeded));
	}

	#[test]
	fn panicking_handler_fails_the_call() {
		let err = stub().call(&PANIC, &Text("x".into())).unwrap_err();
		assert!(matches!(err, Error::CallFailed), "{err}");
	}

	#[test]
	fn oversized_reply_is_resource_exhausted() {
		let transport = LocalTransport::with_max_message_size(2);
		transport.bind("local:1", server());
		let err = Stub::new(transport.channel("local:1"))
			.call(&REVERSE, &Text("abcdef".into()))
			.unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::ResourceExhausted));
	}

	#[test]
	fn undecodable_request_is_invalid_argument() {
		let transport = LocalTransport::new();
		transport.bind("local:1", server());
		let as_number: Method<u64, Text> = Method::new("/test.Text/Reverse");
		// 200 encodes as a varint length prefix with no string bytes behind it.
		let err = Stub::new(transport.channel("local:1"))
			.call(&as_number, &200u64)
			.unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::InvalidArgument));
	}

	#[test]
	fn hanging_handler_hits_the_deadline() {
		let started = std::time::Instant::now();
		let context = CallContext::new().with_timeout(Duration::from_millis(20));
		let err = stub().call_with(&HANG, &Text("x".into()), context).unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::DeadlineExceeded));
		assert!(started.elapsed() < Duration::from_secs(10));
	}

	#[test]
	fn panicking_handler_with_deadline_fails_the_call() {
		let context = CallContext::new().with_timeout(Duration::from_secs(10));
		let err = stub().call_with(&PANIC, &Text("x".into()), context).unwrap_err();
		assert!(matches!(err, Error::CallFailed), "{err}");
	}

	#[test]
	fn reply_over_channel_limit_is_resource_exhausted() {
		let transport = LocalTransport::new();
		transport.bind("local:1", server());
		let config = ClientConfig {
			max_message_size: 16,
			..ClientConfig::default()
		};
		let stub = Stub::new(transport.channel_with_config("local:1", config));

		let err = stub.call(&PAD, &1000).unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::ResourceExhausted));
		assert_eq!(stub.call(&PAD, &4).unwrap(), Text("xxxx".into()));
	}
}

use cqrpc::{CallContext, CallHandle, Channel, CompletionQueue, Dispatcher, PendingReply, Result, Stub};

use crate::messages::{HelloReply, HelloRequest, SAY_HELLO};

/// Reply text reported when a call does not produce a greeting.
pub(crate) const RPC_FAILED: &str = "RPC failed";

/// Typed client for the greeter service.
#[derive(Debug, Clone)]
pub struct GreeterClient {
	stub: Stub,
}

impl GreeterClient {
	/// Client issuing calls on `channel`.
	pub fn new(channel: Channel) -> Self {
		Self {
			stub: Stub::new(channel),
		}
	}

	/// Greets `user` and blocks until the server answers.
	///
	/// Any failure collapses into the text `"RPC failed"`; use
	/// [`GreeterClient::try_say_hello`] to see why.
	pub fn say_hello(&self, user: &str) -> String {
		self.try_say_hello(user).unwrap_or_else(|error| {
			tracing::debug!(%error, "greeter.call_failed");
			RPC_FAILED.to_owned()
		})
	}

	/// Greets `user`, surfacing the failure on error.
	///
	/// # Errors
	///
	/// Any error the underlying [`Stub::call`] reports.
	pub fn try_say_hello(&self, user: &str) -> Result<String> {
		self.try_say_hello_with(user, CallContext::default())
	}

	/// [`GreeterClient::try_say_hello`] with an explicit call context.
	///
	/// # Errors
	///
	/// See [`GreeterClient::try_say_hello`].
	pub fn try_say_hello_with(&self, user: &str, context: CallContext) -> Result<String> {
		let reply = self.stub.call_with(&SAY_HELLO, &request(user), context)?;
		Ok(reply.message)
	}

	/// Starts a greeting on `queue`; the caller waits for its event.
	///
	/// # Errors
	///
	/// Construction errors from [`Stub::call_async`].
	pub fn say_hello_async(&self, user: &str, queue: &CompletionQueue) -> Result<CallHandle<HelloReply>> {
		self.stub.call_async(&SAY_HELLO, &request(user), queue)
	}

	/// Starts a greeting routed through `dispatcher`.
	///
	/// # Errors
	///
	/// Construction errors from [`Dispatcher::call`].
	pub fn say_hello_dispatched(&self, user: &str, dispatcher: &Dispatcher) -> Result<PendingReply<HelloReply>> {
		dispatcher.call(&self.stub, &SAY_HELLO, &request(user))
	}
}

fn request(user: &str) -> HelloRequest {
	HelloRequest {
		name: user.to_owned(),
	}
}

#[cfg(test)]
mod tests {
	use cqrpc::test_helpers::ManualTransport;
	use cqrpc::{Code, Error, LocalTransport, Status};
	use pretty_assertions::assert_eq;

	use super::*;
	use crate::server::greeter_server;

	fn local_client() -> GreeterClient {
		let transport = LocalTransport::new();
		transport.bind("localhost:50051", greeter_server());
		GreeterClient::new(transport.channel("localhost:50051"))
	}

	#[test]
	fn greets_world() {
		assert_eq!(local_client().say_hello("world"), "Hello world");
	}

	#[test]
	fn unbound_endpoint_reads_rpc_failed() {
		let client = GreeterClient::new(LocalTransport::new().channel("localhost:1"));
		assert_eq!(client.say_hello("world"), RPC_FAILED);
		let err = client.try_say_hello("world").unwrap_err();
		assert_eq!(err.status().map(Status::code), Some(Code::Unavailable));
	}

	#[test]
	fn transport_failure_is_not_a_greeting() {
		let transport = ManualTransport::new();
		let client = GreeterClient::new(transport.channel("localhost:50051"));
		let queue = CompletionQueue::new();

		let call = client.say_hello_async("world", &queue).unwrap();
		transport.take(call.tag()).unwrap().completer.fail();

		let event = queue.next().unwrap();
		assert!(!event.ok());
		assert!(matches!(call.resolve(event), Err(Error::CallFailed)));
	}

	#[test]
	fn later_greeting_can_finish_first() {
		let transport = ManualTransport::new();
		let client = GreeterClient::new(transport.channel("localhost:50051"));
		let queue = CompletionQueue::new();

		let a = client.say_hello_async("A", &queue).unwrap();
		let b = client.say_hello_async("B", &queue).unwrap();
		transport.take(b.tag()).unwrap().reply(&HelloReply {
			message: "Hello B".into(),
		});
		transport.take(a.tag()).unwrap().reply(&HelloReply {
			message: "Hello A".into(),
		});

		let first = queue.next().unwrap();
		assert_eq!(first.tag(), b.tag());
		assert_eq!(b.resolve(first).unwrap().message, "Hello B");
		let second = queue.next().unwrap();
		assert_eq!(a.resolve(second).unwrap().message, "Hello A");
	}

	#[test]
	fn shutdown_cancels_pending_greeting() {
		let transport = ManualTransport::new();
		let client = GreeterClient::new(transport.channel("localhost:50051"));
		let queue = CompletionQueue::new();

		let call = client.say_hello_async("world", &queue).unwrap();
		queue.shutdown();
		let event = queue.next().unwrap();
		assert!(event.is_cancelled());
		assert!(call.resolve(event).unwrap_err().is_cancelled());
		assert!(queue.next().is_none());
	}
}

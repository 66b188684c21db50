use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cqrpc::{CallContext, ClientConfig, Code, CompletionQueue, Dispatcher, Error, LocalServer, LocalTransport, Status};
use cqrpc_greeter::{GreeterClient, HelloReply, SAY_HELLO, greeter_server};
use pretty_assertions::assert_eq;

fn init_tracing() {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn client() -> GreeterClient {
	let transport = LocalTransport::new();
	transport.bind("localhost:50051", greeter_server());
	GreeterClient::new(transport.channel("localhost:50051"))
}

#[test]
fn blocking_greeting_round_trips() {
	init_tracing();
	assert_eq!(client().try_say_hello("world").unwrap(), "Hello world");
}

#[test]
fn async_greeting_resolves_through_its_queue() {
	init_tracing();
	let client = client();
	let queue = CompletionQueue::new();

	let calls: Vec<_> = ["a", "b", "c"]
		.into_iter()
		.map(|name| client.say_hello_async(name, &queue).unwrap())
		.collect();

	let mut by_tag: std::collections::HashMap<_, _> = calls.into_iter().map(|call| (call.tag(), call)).collect();
	let mut greetings = Vec::new();
	for _ in 0..3 {
		let event = queue.next().unwrap();
		let call = by_tag.remove(&event.tag()).expect("event for an issued call");
		greetings.push(call.resolve(event).unwrap().message);
	}
	greetings.sort();
	assert_eq!(greetings, ["Hello a", "Hello b", "Hello c"]);
	assert_eq!(queue.outstanding(), 0);
}

#[test]
fn many_threads_share_one_dispatcher() {
	init_tracing();
	let client = client();
	let dispatcher = Arc::new(Dispatcher::spawn().unwrap());

	let workers: Vec<_> = (0..8)
		.map(|worker| {
			let client = client.clone();
			let dispatcher = Arc::clone(&dispatcher);
			thread::spawn(move || {
				let pending: Vec<_> = (0..25)
					.map(|i| {
						client
							.say_hello_dispatched(&format!("{worker}-{i}"), &dispatcher)
							.unwrap()
					})
					.collect();
				pending
					.into_iter()
					.map(|reply| reply.wait().unwrap().message)
					.collect::<Vec<_>>()
			})
		})
		.collect();

	let mut seen = HashSet::new();
	for worker in workers {
		for message in worker.join().unwrap() {
			assert!(seen.insert(message), "greeting delivered twice");
		}
	}
	assert_eq!(seen.len(), 200);
	assert!(seen.contains("Hello 7-24"));

	let dispatcher = Arc::into_inner(dispatcher).unwrap();
	assert_eq!(dispatcher.shutdown(), 200);
}

#[tokio::test]
async fn dispatched_greeting_can_be_awaited() {
	init_tracing();
	let client = client();
	let dispatcher = Dispatcher::spawn().unwrap();

	let reply = client.say_hello_dispatched("async", &dispatcher).unwrap();
	let reply = tokio::time::timeout(Duration::from_secs(5), reply)
		.await
		.expect("greeting should arrive")
		.unwrap();
	assert_eq!(reply, HelloReply {
		message: "Hello async".into(),
	});
}

#[test]
fn server_status_reads_rpc_failed() {
	init_tracing();
	let transport = LocalTransport::new();
	transport.bind(
		"localhost:50051",
		LocalServer::new().route(&SAY_HELLO, |_, _| Err(Status::new(Code::NotFound, "nobody home"))),
	);
	let client = GreeterClient::new(transport.channel("localhost:50051"));

	assert_eq!(client.say_hello("world"), "RPC failed");
	let err = client.try_say_hello("world").unwrap_err();
	assert_eq!(err.status().map(Status::code), Some(Code::NotFound));
}

#[test]
fn elapsed_deadline_is_reported() {
	init_tracing();
	let context = CallContext::new().with_deadline(std::time::Instant::now());
	let err = client().try_say_hello_with("late", context).unwrap_err();
	assert_eq!(err.status().map(Status::code), Some(Code::DeadlineExceeded));
}

#[test]
fn oversized_request_never_leaves_the_client() {
	init_tracing();
	let transport = LocalTransport::new();
	transport.bind("localhost:50051", greeter_server());
	let config = ClientConfig {
		max_message_size: 8,
		..ClientConfig::default()
	};
	let client = GreeterClient::new(transport.channel_with_config("localhost:50051", config));

	let err = client.try_say_hello("a name longer than eight bytes").unwrap_err();
	assert!(matches!(err, Error::MessageTooLarge { limit: 8, .. }), "{err}");
}

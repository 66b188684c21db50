use cqrpc::Method;
use serde::{Deserialize, Serialize};

/// Request carrying the name to greet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
	/// Name to greet.
	pub name: String,
}

/// Greeting produced by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
	/// Greeting text.
	pub message: String,
}

/// Plain record used to exercise the wire encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
	/// Display name.
	pub name: String,
	/// Signed age.
	pub age: i32,
}

/// `helloworld.Greeter/SayHello`.
pub const SAY_HELLO: Method<HelloRequest, HelloReply> = Method::new("/helloworld.Greeter/SayHello");

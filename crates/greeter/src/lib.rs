//! Hello-world greeter service over [`cqrpc`].
//!
//! [`GreeterClient`] issues `SayHello` calls through a [`cqrpc::Stub`];
//! [`greeter_server`] answers them in-process.

mod client;
mod messages;
mod server;

pub use client::GreeterClient;
pub use messages::{HelloReply, HelloRequest, SAY_HELLO, Test};
pub use server::greeter_server;

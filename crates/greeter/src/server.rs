use cqrpc::LocalServer;

use crate::messages::{HelloReply, SAY_HELLO};

/// Greeter endpoint answering `SayHello` with `"Hello {name}"`.
pub fn greeter_server() -> LocalServer {
	LocalServer::new().route(&SAY_HELLO, |request, _| {
		tracing::debug!(name = %request.name, "greeter.say_hello");
		Ok(HelloReply {
			message: format!("Hello {}", request.name),
		})
	})
}

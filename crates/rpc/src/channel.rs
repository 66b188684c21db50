//! Channels and the transport seam.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::call::{CallContext, Completer};
use crate::config::ClientConfig;

/// A call handed to a transport.
pub struct OutboundCall {
	/// Full method path, e.g. `/helloworld.Greeter/SayHello`.
	pub method: &'static str,
	/// Encoded request.
	pub payload: Bytes,
	/// Deadline and metadata.
	pub context: CallContext,
	/// Largest reply the caller accepts; larger replies should finish with
	/// `ResourceExhausted`.
	pub max_reply_size: usize,
	/// Posts the call's terminal event. Dropping it reports `success=false`.
	pub completer: Completer,
}

impl fmt::Debug for OutboundCall {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OutboundCall")
			.field("method", &self.method)
			.field("tag", &self.completer.tag())
			.field("payload_len", &self.payload.len())
			.finish_non_exhaustive()
	}
}

/// Network side of a channel.
///
/// Implementations move the request to the endpoint and eventually finish the
/// call's [`Completer`], from any thread.
pub trait Transport: Send + Sync + 'static {
	/// Begins transmitting `call` to `target`.
	///
	/// Must return without waiting for the reply.
	fn start_call(&self, target: &str, call: OutboundCall);
}

struct ChannelInner {
	target: String,
	transport: Arc<dyn Transport>,
	config: ClientConfig,
}

/// Reusable connection to a single endpoint.
///
/// Cheap to clone; every clone shares the same transport.
#[derive(Clone)]
pub struct Channel {
	inner: Arc<ChannelInner>,
}

impl fmt::Debug for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Channel")
			.field("target", &self.inner.target)
			.field("config", &self.inner.config)
			.finish_non_exhaustive()
	}
}

impl Channel {
	/// Creates a channel with the default configuration.
	pub fn new(target: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
		Self::with_config(target, transport, ClientConfig::default())
	}

	/// Creates a channel with an explicit configuration.
	pub fn with_config(
		target: impl Into<String>,
		transport: Arc<dyn Transport>,
		config: ClientConfig,
	) -> Self {
		Self {
			inner: Arc::new(ChannelInner {
				target: target.into(),
				transport,
				config,
			}),
		}
	}

	/// Endpoint address this channel talks to.
	pub fn target(&self) -> &str {
		&self.inner.target
	}

	/// Configuration applied to calls on this channel.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	pub(crate) fn start_call(&self, call: OutboundCall) {
		self.inner.transport.start_call(&self.inner.target, call);
	}
}

//! Tag-correlated unary RPC client core.
//!
//! A call is prepared by a [`Stub`] against a [`Channel`], started, and
//! terminated by exactly one event on a [`CompletionQueue`]. Events carry only a
//! [`Tag`] and a success flag; whoever issued the call matches the tag back to
//! its [`CallHandle`] and resolves it:
//! * [`Stub::call`]: one call, one private queue, one blocking wait.
//! * [`CorrelationTable`]: many calls in flight on a shared queue, each result
//!   routed to its own [`PendingReply`].
//! * [`Dispatcher`]: a background thread driving a table from its own queue.
//!
//! Transports plug in through [`Transport`] and report completions with the
//! [`Completer`] each call hands them. [`LocalTransport`] serves calls
//! in-process.

#![warn(missing_docs)]

mod call;
mod channel;
pub mod codec;
mod config;
pub mod dispatcher;
mod error;
pub mod local;
mod queue;
mod status;
mod stub;
mod table;
mod tag;

#[doc(hidden)]
pub mod test_helpers;

pub use call::{CallContext, CallHandle, Completer, Reply};
pub use channel::{Channel, OutboundCall, Transport};
pub use codec::Message;
pub use config::{ClientConfig, DEFAULT_MAX_MESSAGE_SIZE};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use local::{LocalServer, LocalTransport};
pub use queue::{CompletionQueue, Event, Next};
pub use status::{Code, Status};
pub use stub::{Method, Stub};
pub use table::{CorrelationTable, PendingReply};
pub use tag::Tag;

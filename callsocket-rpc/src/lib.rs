//! Callsocket RPC
//!
//! Named-method remote procedure calls over multiplexed `callsocket` connections.
//!
//! A [`client::Client`] invokes `"handler.method"` on a remote [`server::Server`] with a list of
//! opaque MessagePack values. Any number of calls may be in flight on one connection; each request
//! carries a correlation id (`cb_id`) and the response echoes it, so replies are routed to their
//! caller no matter the order they arrive in.
//!
//! Calls come in three shapes:
//! * `call`: blocks the calling thread until the reply arrives. It refuses to run on the event
//!   loop thread, which would deadlock.
//! * `call_with`: returns immediately, and a continuation receives the reply on a worker thread.
//! * `send`: a future, for callers already in async code.
//!
//! Failures on the server are marshaled into an exception envelope and reconstructed on the client
//! as a typed [`Fault`], keeping the remote message and trace.
//!
//! All connections and listeners are driven by one [`EventLoop`], a single-threaded tokio runtime
//! on its own thread. Handler code and continuations never run on it.
//!
//! The wire codec is pluggable. `callsocket-messagepack` is the default.

#![deny(missing_docs)]

mod error;
mod event_loop;
mod fault;
mod message;

pub mod client;
pub mod server;

pub use error::{Error, Result};
pub use event_loop::EventLoop;
pub use fault::{Fault, FaultKind};
pub use message::{Decoded, ExceptionEnvelope, Request, Response};

/// The dynamic value type for call arguments and results.
pub use rmpv::Value;

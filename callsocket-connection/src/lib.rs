//! Callsocket connections
//!
//! The low level framed stream underneath `callsocket-rpc`. A [`Connection`] owns one
//! `AsyncRead + AsyncWrite` stream, turns outbound messages into frames with an [`Encoder`],
//! turns inbound bytes back into messages with a [`Decoder`], and hands every inbound message
//! to a [`MessageReactor`].
//!
//! Nothing about a connection pairs requests with responses: any number of messages may be in
//! flight in either direction. Correlation is the reactor's business.

#![deny(missing_docs)]

mod connection;
mod encoding;
mod error;
mod message_reactor;
mod pooled_encoder;
mod socket_listener;

pub use connection::Connection;
pub use encoding::{Codec, Decoder, Encoder};
pub use error::DeserializeError;
pub use message_reactor::{MessageReactor, ReactorStatus};
pub use pooled_encoder::{PooledEncoder, Reusable, Serialize};
pub use socket_listener::{
    SocketListener, SocketResult, StreamWithAddress, TcpSocketListener, TlsSocketListener,
};

pub(crate) fn interrupted(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::Interrupted
}

//! MessagePack framing for callsocket connections.
//!
//! Every frame is a MessagePack `u32` holding the body length (always 5 bytes: the marker
//! and 4 big-endian bytes), followed by the body. Bodies are encoded with field names, so a
//! struct goes over the wire as a map keyed by its field names and peers do not need to
//! agree on field order.

#![deny(missing_docs)]

mod decoder;
mod serializer;

pub use decoder::MessagePackDecoder;
pub use serializer::MessagePackSerializer;

/// A pooled MessagePack codec that writes `Outbound` and reads `Inbound`.
pub type MessagePackCodec<Outbound, Inbound> = (
    callsocket::PooledEncoder<MessagePackSerializer<Outbound>>,
    MessagePackDecoder<Inbound>,
);

/// The frame length prefix is a MessagePack u32: marker byte + 4 bytes.
pub(crate) const PREFIX_LENGTH: usize = 5;

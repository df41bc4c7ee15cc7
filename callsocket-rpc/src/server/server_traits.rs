use std::net::SocketAddr;

use callsocket::{Codec, Decoder, Encoder, SocketListener};

use crate::{server::rpc_responder::RpcResponder, Decoded, Request, Response};

/// The wire codec a server speaks: decodes requests, encodes responses.
pub trait ServerCodec:
    Codec
    + Decoder<Message = Decoded<Request>>
    + Encoder<Message = Response>
    + Send
    + 'static
{
}
impl<T> ServerCodec for T where
    T: Codec
        + Decoder<Message = Decoded<Request>>
        + Encoder<Message = Response>
        + Send
        + 'static
{
}

/// SocketService receives connections and produces ConnectionServices.
///
/// The SocketService is notified when a new connection is established. It is given the address of the
/// remote peer and it returns a ConnectionService for that connection. You can think of this as the
/// "connection factory" for your server. It is the "top" of your service stack.
pub trait SocketService: Send + 'static {
    /// Message encoding scheme
    ///
    /// Consider pooling your allocations, like with `callsocket::PooledEncoder`.
    /// The write out to the network uses the raw `Encoder::Serialized` type, so you
    /// can make outbound messages low-allocation via simple pooling.
    type Codec: ServerCodec;

    /// The type of connection service that will be created for each connection.
    type ConnectionService: ConnectionService;

    /// The listener type for this service. E.g., `TcpSocketListener`
    type SocketListener: SocketListener;

    /// Create a new message codec for a connection.
    fn codec(&self) -> Self::Codec;

    /// Create a new ConnectionService for the connection from `address`.
    fn new_stream_service(&self, address: SocketAddr) -> Self::ConnectionService;
}

/// A connection service receives calls from one client.
///
/// Each client connection gets a ConnectionService. You put your per-connection state in your
/// ConnectionService implementation.
///
/// You are called on the event loop, with `&mut self`, for every request the connection
/// decodes. Hand slow work off the loop: every other call on this connection waits while
/// you hold it. Send the reply through the responder, from wherever the work finishes.
pub trait ConnectionService: Send + 'static {
    /// Handle one request. Every request gets a reply: a responder dropped without one
    /// replies with a fault.
    fn new_call(&mut self, request: Request, responder: RpcResponder);
}

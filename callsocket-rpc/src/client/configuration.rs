use std::{future::Future, marker::PhantomData, sync::Arc, time::Duration};

use callsocket::{Codec, Connection, Decoder, Encoder};
use callsocket_messagepack::MessagePackCodec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    connection_pool::ClientConnector,
    reactor::completion_reactor::RpcCompletionReactor,
    stream_connector::{StreamConnector, TcpStreamConnector},
    Destination, RpcConnection,
};
use crate::{Decoded, Fault, Request, Response};

/// The wire codec a client speaks: encodes requests, decodes responses.
pub trait ClientCodec:
    Codec
    + Encoder<Message = Request>
    + Decoder<Message = Decoded<Response>>
    + Default
    + Send
    + 'static
{
}
impl<T> ClientCodec for T where
    T: Codec
        + Encoder<Message = Request>
        + Decoder<Message = Decoded<Response>>
        + Default
        + Send
        + 'static
{
}

/// The default client codec.
pub type MessagePackClientCodec = MessagePackCodec<Request, Decoded<Response>>;

/// Configuration for a `callsocket` rpc client.
///
/// Share it as an `Arc<Configuration>`: that is the [`ClientConnector`] a connection pool
/// uses to open connections.
pub struct Configuration<
    TStreamConnector = TcpStreamConnector,
    TCodec = MessagePackClientCodec,
> {
    stream_connector: TStreamConnector,
    max_buffer_length: usize,
    buffer_allocation_increment: usize,
    max_queued_outbound_messages: usize,
    connect_timeout: Option<Duration>,
    _codec: PhantomData<fn() -> TCodec>,
}

impl<TStreamConnector: std::fmt::Debug, TCodec> std::fmt::Debug
    for Configuration<TStreamConnector, TCodec>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("stream_connector", &self.stream_connector)
            .field("max_buffer_length", &self.max_buffer_length)
            .field(
                "buffer_allocation_increment",
                &self.buffer_allocation_increment,
            )
            .field(
                "max_queued_outbound_messages",
                &self.max_queued_outbound_messages,
            )
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(TcpStreamConnector)
    }
}

impl<TStreamConnector, TCodec> Configuration<TStreamConnector, TCodec>
where
    TStreamConnector: StreamConnector,
{
    /// Configuration using `stream_connector` for the handshake after TCP connects.
    pub fn new(stream_connector: TStreamConnector) -> Self {
        log::trace!("new client configuration with {stream_connector:?}");
        Self {
            stream_connector,
            max_buffer_length: 4 * (2 << 20),
            buffer_allocation_increment: 1 << 20,
            max_queued_outbound_messages: 256,
            connect_timeout: None,
            _codec: PhantomData,
        }
    }

    /// Max buffer length limits the max message size. Try to use a buffer length that is at least 4 times the largest message you want to support.
    ///
    /// Default: 8MiB
    pub fn max_buffer_length(&mut self, max_buffer_length: usize) {
        self.max_buffer_length = max_buffer_length;
    }

    /// The step the receive buffer grows by.
    ///
    /// Default: 1MiB
    pub fn buffer_allocation_increment(&mut self, buffer_allocation_increment: usize) {
        self.buffer_allocation_increment = buffer_allocation_increment;
    }

    /// Max encoded messages that will be queued up waiting for the socket.
    ///
    /// Default: 256
    pub fn max_queued_outbound_messages(&mut self, max_queued_outbound_messages: usize) {
        self.max_queued_outbound_messages = max_queued_outbound_messages;
    }

    /// Give up on a TCP connect after this long.
    ///
    /// Default: none
    pub fn connect_timeout(&mut self, connect_timeout: Duration) {
        self.connect_timeout = Some(connect_timeout);
    }
}

impl<TStreamConnector, TCodec> ClientConnector for Arc<Configuration<TStreamConnector, TCodec>>
where
    TStreamConnector: StreamConnector + Send + Sync + 'static,
    TCodec: ClientCodec,
{
    fn connect(
        self,
        destination: Destination,
    ) -> impl Future<Output = Result<RpcConnection, Fault>> + Send + 'static {
        async move {
            let key = destination.key();
            log::debug!("connecting to {key}");

            let connect =
                tokio::net::TcpStream::connect((destination.host(), destination.port()));
            let stream = match self.connect_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, connect).await {
                    Ok(result) => result,
                    Err(_elapsed) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {timeout:?}"),
                    )),
                },
                None => connect.await,
            }
            .map_err(|e| Fault::connection_error(&key, &e))?;
            stream
                .set_nodelay(true)
                .map_err(|e| Fault::connection_error(&key, &e))?;
            let address = stream
                .peer_addr()
                .map_err(|e| Fault::connection_error(&key, &e))?;

            let stream = self
                .stream_connector
                .connect_stream(stream)
                .await
                .map_err(|e| Fault::connection_error(&key, &e))?;

            let reactor = RpcCompletionReactor::new(key.clone());
            let (submission_queue, outbound_messages) = mpsc::unbounded_channel();
            let closer = CancellationToken::new();
            let rpc_connection =
                RpcConnection::new(&key, &reactor, submission_queue, closer.clone());

            let connection = Connection::new(
                stream,
                address,
                TCodec::default(),
                self.max_buffer_length,
                self.buffer_allocation_increment,
                self.max_queued_outbound_messages,
                outbound_messages,
                reactor,
            );
            tokio::spawn(async move {
                tokio::select! {
                    _ = connection => log::info!("connection to {key} ended"),
                    _ = closer.cancelled() => log::info!("connection to {key} closed"),
                }
            });

            Ok(rpc_connection)
        }
    }
}

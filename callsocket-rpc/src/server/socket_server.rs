use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use callsocket::{Connection, SocketListener, SocketResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{rpc_submitter::RpcSubmitter, server_traits::SocketService};

/// A `SocketRpcServer` is a server future. It listens on a socket and spawns new connections,
/// with a ConnectionService to handle each connection.
///
/// Callsockets use monomorphic messages: every connection speaks the request and response
/// envelopes, through the codec your SocketService provides.
///
/// The socket server hosts your SocketService.
/// Your SocketService creates a ConnectionService for each new connection.
/// Your ConnectionService manages one connection. It is Dropped when the connection is closed.
///
/// Poll it on a runtime: connections are spawned onto the runtime that polls it. When the
/// shutdown token is cancelled, every connection this server accepted is closed.
pub struct SocketRpcServer<TSocketService>
where
    TSocketService: SocketService,
{
    socket_service: TSocketService,
    listener: TSocketService::SocketListener,
    shutdown: CancellationToken,
    max_buffer_length: usize,
    buffer_allocation_increment: usize,
    max_queued_outbound_messages: usize,
}

impl<TSocketService> SocketRpcServer<TSocketService>
where
    TSocketService: SocketService,
{
    /// Construct a new `SocketRpcServer` with a listener.
    pub fn new(
        listener: TSocketService::SocketListener,
        socket_service: TSocketService,
        shutdown: CancellationToken,
        max_buffer_length: usize,
        buffer_allocation_increment: usize,
        max_queued_outbound_messages: usize,
    ) -> Self {
        Self {
            socket_service,
            listener,
            shutdown,
            max_buffer_length,
            buffer_allocation_increment,
            max_queued_outbound_messages,
        }
    }
}

impl<TSocketService> Unpin for SocketRpcServer<TSocketService> where TSocketService: SocketService {}
impl<TSocketService> Future for SocketRpcServer<TSocketService>
where
    TSocketService: SocketService,
{
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        loop {
            if self.shutdown.is_cancelled() {
                return Poll::Ready(());
            }
            break match self.listener.poll_accept(context) {
                Poll::Ready(SocketResult::Stream(new_connection)) => {
                    let address = new_connection.address();
                    let connection_service = self.socket_service.new_stream_service(address);
                    let (outbound, outbound_messages) = mpsc::unbounded_channel();
                    let submitter = RpcSubmitter::new(connection_service, outbound, address);
                    let connection = Connection::new(
                        new_connection.into_inner(),
                        address,
                        self.socket_service.codec(),
                        self.max_buffer_length,
                        self.buffer_allocation_increment,
                        self.max_queued_outbound_messages,
                        outbound_messages,
                        submitter,
                    );
                    let shutdown = self.shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = connection => log::info!("connection from {address} ended"),
                            _ = shutdown.cancelled() => log::info!("connection from {address} closed for shutdown"),
                        }
                    });
                    continue;
                }
                Poll::Ready(SocketResult::Disconnect) => {
                    log::error!("listener disconnected; no more connections will be accepted");
                    Poll::Ready(())
                }
                Poll::Pending => {
                    // hooray, listener is pending.
                    Poll::Pending
                }
            };
        }
    }
}

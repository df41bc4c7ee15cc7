use std::{
    marker::PhantomData,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use callsocket::{SocketListener, TcpSocketListener, TlsSocketListener};
use callsocket_messagepack::MessagePackCodec;
use tokio_util::sync::CancellationToken;

use super::{
    dispatch_service::DispatchSocketService, server_traits::ServerCodec, Configuration,
    Dispatcher, Handler, SocketRpcServer,
};
use crate::{Decoded, Error, EventLoop, Request, Response};

/// The default server codec.
pub type MessagePackServerCodec = MessagePackCodec<Response, Decoded<Request>>;

/// A callsocket rpc server: register handlers, then start it.
///
/// ```no_run
/// use callsocket_rpc::server::{Configuration, Methods, Server};
///
/// let mut server: Server = Server::new(Configuration::new("127.0.0.1", 7331));
/// server.add_handler(
///     "bench",
///     Methods::new().method("foo", |(a, b, c): (i64, i64, i64)| Ok::<_, String>(a + b + c)),
/// );
/// let running = server.start()?;
/// println!("listening on {}", running.local_address());
/// # Ok::<(), callsocket_rpc::Error>(())
/// ```
#[derive(Debug)]
pub struct Server<TCodec = MessagePackServerCodec> {
    configuration: Configuration,
    dispatcher: Dispatcher,
    event_loop: Option<Arc<EventLoop>>,
    _codec: PhantomData<fn() -> TCodec>,
}

impl<TCodec> Server<TCodec>
where
    TCodec: ServerCodec + Default,
{
    /// A server with no handlers, to run on the shared event loop.
    pub fn new(configuration: Configuration) -> Self {
        let dispatcher = Dispatcher::new(configuration.token.clone());
        Self {
            configuration,
            dispatcher,
            event_loop: None,
            _codec: PhantomData,
        }
    }

    /// Run on `event_loop` instead of the shared one.
    pub fn with_event_loop(mut self, event_loop: Arc<EventLoop>) -> Self {
        self.event_loop = Some(event_loop);
        self
    }

    /// Expose `handler`'s methods as `namespace.method`.
    pub fn add_handler(&mut self, namespace: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.dispatcher.add_handler(namespace, handler);
        self
    }

    /// Bind and start serving. The listener is bound before this returns.
    pub fn start(self) -> crate::Result<ServerHandle> {
        let event_loop = match self.event_loop {
            Some(event_loop) => event_loop,
            None => EventLoop::shared()?,
        };
        let Configuration {
            host,
            port,
            tls,
            max_buffer_length,
            buffer_allocation_increment,
            max_queued_outbound_messages,
            listen_backlog,
            tcp_keepalive,
            ..
        } = self.configuration;

        let address = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| Error::AddressError(format!("{host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| Error::AddressError(format!("{host}:{port} did not resolve")))?;

        // registering the listener needs the loop's reactor
        let _runtime = event_loop.handle().enter();
        let listener = TcpSocketListener::listen(address, listen_backlog, tcp_keepalive)?;
        let local_address = listener.local_address()?;
        let dispatcher = Arc::new(self.dispatcher);
        let shutdown = CancellationToken::new();

        match tls {
            None => {
                let server = SocketRpcServer::new(
                    listener,
                    DispatchSocketService::<TCodec, TcpSocketListener>::new(dispatcher),
                    shutdown.clone(),
                    max_buffer_length,
                    buffer_allocation_increment,
                    max_queued_outbound_messages,
                );
                spawn_server(&event_loop, server, shutdown.clone(), local_address);
            }
            Some(tls) => {
                let server = SocketRpcServer::new(
                    TlsSocketListener::wrap(listener, tls),
                    DispatchSocketService::<TCodec, TlsSocketListener>::new(dispatcher),
                    shutdown.clone(),
                    max_buffer_length,
                    buffer_allocation_increment,
                    max_queued_outbound_messages,
                );
                spawn_server(&event_loop, server, shutdown.clone(), local_address);
            }
        }
        log::info!("serving on {local_address}");

        Ok(ServerHandle {
            local_address,
            shutdown,
            _event_loop: event_loop,
        })
    }
}

fn spawn_server<TSocketService>(
    event_loop: &EventLoop,
    server: SocketRpcServer<TSocketService>,
    shutdown: CancellationToken,
    local_address: SocketAddr,
) where
    TSocketService: super::SocketService,
{
    event_loop.spawn(async move {
        tokio::select! {
            _ = server => log::info!("server on {local_address} stopped accepting"),
            _ = shutdown.cancelled() => log::info!("server on {local_address} shut down"),
        }
    });
}

/// A running server. Dropping it shuts the server down.
#[derive(Debug)]
pub struct ServerHandle {
    local_address: SocketAddr,
    shutdown: CancellationToken,
    _event_loop: Arc<EventLoop>,
}

impl ServerHandle {
    /// The address the server is bound to, with the real port when port 0 was configured.
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Stop accepting, and close every connection this server accepted.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

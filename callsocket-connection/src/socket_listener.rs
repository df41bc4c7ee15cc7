use std::{
    ffi::c_int,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use socket2::TcpKeepalive;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    task::JoinSet,
};

/// A pollable listener that produces socket connections
pub trait SocketListener: Send + 'static {
    /// The stream type accepted connections use, e.g. a raw `TcpStream` or a TLS stream.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Like `tokio::net::TcpListener::poll_accept`, this function returns a
    /// socket connection along with its peer address.
    fn poll_accept(
        &mut self,
        context: &mut Context<'_>,
    ) -> Poll<SocketResult<StreamWithAddress<Self::Stream>>>;

    /// The address this listener is bound to.
    fn local_address(&self) -> std::io::Result<SocketAddr>;
}

/// The outcome of polling a listener.
#[derive(Debug)]
pub enum SocketResult<T> {
    /// A new connection.
    Stream(T),
    /// The listener is broken and will not produce more connections.
    Disconnect,
}

/// A stream wrapper for streams with addresses
#[derive(Debug)]
pub struct StreamWithAddress<T: AsyncRead + AsyncWrite + Unpin + 'static> {
    stream: T,
    address: SocketAddr,
}
impl<T: AsyncRead + AsyncWrite + Unpin + 'static> StreamWithAddress<T> {
    /// Pair a stream with the address of its peer.
    pub fn new(stream: T, address: SocketAddr) -> Self {
        Self { stream, address }
    }

    /// inspect the remote address for this stream
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Unwrap the stream
    pub fn into_inner(self) -> T {
        self.stream
    }
}
impl<T: AsyncRead + AsyncWrite + Unpin + 'static> AsyncRead for StreamWithAddress<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        context: &mut Context<'_>,
        buffer: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(context, buffer)
    }
}
impl<T: AsyncRead + AsyncWrite + Unpin + 'static> AsyncWrite for StreamWithAddress<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        context: &mut Context<'_>,
        buffer: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        Pin::new(&mut self.stream).poll_write(context, buffer)
    }

    fn poll_flush(
        mut self: Pin<&mut Self>,
        context: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.stream).poll_flush(context)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        context: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.stream).poll_shutdown(context)
    }
}

/// A socket listener for TCP
#[derive(Debug)]
pub struct TcpSocketListener {
    listener: tokio::net::TcpListener,
}
impl TcpSocketListener {
    /// Create a new TCP listener.
    /// Note that this synchronously binds and listens, and must be called within a
    /// tokio runtime context.
    pub fn listen(
        address: SocketAddr,
        listen_backlog: u32,
        tcp_keepalive_duration: Option<Duration>,
    ) -> std::io::Result<Self> {
        let socket = socket2::Socket::new(
            match address {
                std::net::SocketAddr::V4(_) => socket2::Domain::IPV4,
                std::net::SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            None,
        )?;

        let mut tcp_keepalive = TcpKeepalive::new();
        if let Some(duration) = tcp_keepalive_duration {
            tcp_keepalive = tcp_keepalive.with_time(duration);
        }

        socket.set_nonblocking(true)?;
        socket.set_nodelay(true)?;
        socket.set_tcp_keepalive(&tcp_keepalive)?;
        socket.set_reuse_address(true)?;

        socket.bind(&address.into())?;
        socket.listen(listen_backlog.min(i32::MAX as u32) as c_int)?;

        let listener = tokio::net::TcpListener::from_std(socket.into())?;
        log::info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener })
    }
}
impl SocketListener for TcpSocketListener {
    type Stream = TcpStream;

    fn poll_accept(
        &mut self,
        context: &mut Context<'_>,
    ) -> Poll<SocketResult<StreamWithAddress<TcpStream>>> {
        match self.listener.poll_accept(context) {
            Poll::Ready(Ok((stream, address))) => {
                if stream.set_nodelay(true).is_err() {
                    log::warn!("could not set nodelay on connection to {address}");
                }
                Poll::Ready(SocketResult::Stream(StreamWithAddress { stream, address }))
            }
            Poll::Ready(Err(e)) => {
                log::error!("failed to accept connection: {e:?}");
                Poll::Ready(SocketResult::Disconnect)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn local_address(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A socket listener that accepts TLS connections.
///
/// Handshakes run concurrently; a peer that fails its handshake is logged and
/// dropped without affecting the listener.
pub struct TlsSocketListener {
    listener: TcpSocketListener,
    tls_acceptor: tokio_rustls::TlsAcceptor,
    in_flight_connections: JoinSet<(
        std::io::Result<tokio_rustls::server::TlsStream<tokio::net::TcpStream>>,
        SocketAddr,
    )>,
}
impl TlsSocketListener {
    /// Decorate a TcpSocketListener with TLS
    pub fn wrap(
        listener: TcpSocketListener,
        server_config: Arc<tokio_rustls::rustls::ServerConfig>,
    ) -> Self {
        Self {
            listener,
            tls_acceptor: server_config.into(),
            in_flight_connections: Default::default(),
        }
    }
}
impl std::fmt::Debug for TlsSocketListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocketListener")
            .field("listener", &self.listener)
            .field("handshakes", &self.in_flight_connections.len())
            .finish_non_exhaustive()
    }
}

impl SocketListener for TlsSocketListener {
    type Stream = tokio_rustls::server::TlsStream<tokio::net::TcpStream>;

    fn poll_accept(
        &mut self,
        context: &mut Context<'_>,
    ) -> Poll<SocketResult<StreamWithAddress<Self::Stream>>> {
        loop {
            match self.listener.poll_accept(context) {
                Poll::Ready(SocketResult::Stream(StreamWithAddress { stream, address })) => {
                    let accept = self.tls_acceptor.accept(stream);
                    self.in_flight_connections
                        .spawn(async move { (accept.await, address) });
                    continue;
                }
                Poll::Ready(SocketResult::Disconnect) => {
                    return Poll::Ready(SocketResult::Disconnect)
                }
                Poll::Pending => break,
            }
        }
        // pending on accept
        loop {
            break match self.in_flight_connections.poll_join_next(context) {
                Poll::Ready(None) => {
                    // in-flight is empty
                    Poll::Pending
                }
                Poll::Ready(Some(Err(e))) => {
                    log::error!("failed to join tls accept: {e:?}");
                    continue;
                }
                Poll::Ready(Some(Ok((Ok(stream), address)))) => {
                    log::debug!("new connection completed tls accept: {address}");
                    Poll::Ready(SocketResult::Stream(StreamWithAddress { stream, address }))
                }
                Poll::Ready(Some(Ok((Err(e), address)))) => {
                    log::warn!("failed to accept tls from {address}: {e:?}");
                    continue;
                }
                Poll::Pending => Poll::Pending,
            };
        }
    }

    fn local_address(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_address()
    }
}

use std::{sync::Arc, time::Duration};

use tokio_rustls::rustls::ServerConfig;

/// Configuration for a `callsocket` rpc server.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) token: Option<String>,
    pub(crate) tls: Option<Arc<ServerConfig>>,
    pub(crate) max_buffer_length: usize,
    pub(crate) buffer_allocation_increment: usize,
    pub(crate) max_queued_outbound_messages: usize,
    pub(crate) listen_backlog: u32,
    pub(crate) tcp_keepalive: Option<Duration>,
}

impl Configuration {
    /// Listen on `host:port`. Port 0 picks an ephemeral port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            token: None,
            tls: None,
            max_buffer_length: 4 * (2 << 20),
            buffer_allocation_increment: 1 << 20,
            max_queued_outbound_messages: 256,
            listen_backlog: 65536,
            tcp_keepalive: None,
        }
    }

    /// Require every request to carry this token.
    ///
    /// Default: no token
    pub fn token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// Accept only TLS connections, with this rustls configuration.
    ///
    /// Default: plain TCP
    pub fn tls(&mut self, tls: Arc<ServerConfig>) {
        self.tls = Some(tls);
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

    /// Max encoded messages per connection waiting for the socket.
    ///
    /// Default: 256
    pub fn max_queued_outbound_messages(&mut self, max_queued_outbound_messages: usize) {
        self.max_queued_outbound_messages = max_queued_outbound_messages;
    }

    /// The listen backlog.
    ///
    /// Default: 65536
    pub fn listen_backlog(&mut self, listen_backlog: u32) {
        self.listen_backlog = listen_backlog;
    }

    /// Idle time before TCP keepalive probes start.
    ///
    /// Default: the system's
    pub fn tcp_keepalive(&mut self, tcp_keepalive: Duration) {
        self.tcp_keepalive = Some(tcp_keepalive);
    }
}

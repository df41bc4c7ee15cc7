use std::{
    collections::HashMap,
    future::Future,
    pin::{pin, Pin},
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures::FutureExt;

use super::{Configuration, Destination, RpcConnection};
use crate::{EventLoop, Fault, FaultKind};

/// A connection strategy for callsocket rpc clients.
///
/// This is called asynchronously by the connection pool to create new connections.
pub trait ClientConnector: Clone + Send + Sync + 'static {
    /// Connect to `destination` and return a handle to the new connection. The connection's
    /// driver task must be spawned onto the current runtime, which is the pool's event loop.
    ///
    /// Your returned future needs to be `'static`, and your connector needs to be cheap to
    /// clone. One easy way to do that is to just impl ClientConnector on `Arc<YourConnectorType>`
    /// instead of directly on `YourConnectorType`, like `Arc<Configuration>` does.
    ///
    /// If you have rolling credentials, initialization messages, changing endpoints, or other
    /// adaptive connection logic, this is the place to do it or consult those sources of truth.
    fn connect(
        self,
        destination: Destination,
    ) -> impl Future<Output = Result<RpcConnection, Fault>> + Send + 'static;
}

/// A connection pool for callsocket rpc clients, keeping at most one live connection per
/// destination.
///
/// Callsocket-rpc connections are shared and multiplexed, so this vends cloned handles. All
/// callers asking for a destination that is still connecting share that one connect. A dead
/// connection is replaced by the next caller that asks for it.
///
/// The pool is an ordinary value: make one per client, or share one between clients, and
/// drop it when you are done with it. [`ConnectionPool::shared`] is the process-wide pool
/// for the default configuration.
#[derive(Debug)]
pub struct ConnectionPool<Connector: ClientConnector> {
    connector: Connector,
    event_loop: Arc<EventLoop>,
    connections: Mutex<HashMap<String, ConnectionState, ahash::RandomState>>,
}

static SHARED: Mutex<Option<Arc<ConnectionPool<Arc<Configuration>>>>> = Mutex::new(None);

impl ConnectionPool<Arc<Configuration>> {
    /// The process-wide pool of default-configured connections, on the shared event loop.
    /// Created on first use and never dropped.
    pub fn shared() -> std::io::Result<Arc<Self>> {
        let mut shared = SHARED.lock().expect("internal mutex must work");
        if let Some(pool) = shared.as_ref() {
            return Ok(pool.clone());
        }
        let pool = Arc::new(Self::new(
            Arc::new(Configuration::default()),
            EventLoop::shared()?,
        ));
        *shared = Some(pool.clone());
        Ok(pool)
    }
}

impl<Connector: ClientConnector> ConnectionPool<Connector> {
    /// Create a new connection pool whose connections run on `event_loop`.
    pub fn new(connector: Connector, event_loop: Arc<EventLoop>) -> Self {
        Self {
            connector,
            event_loop,
            connections: Default::default(),
        }
    }

    /// The event loop this pool's connections run on.
    pub fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Get the connection for `destination`, connecting if there is no live one.
    pub async fn get_connection(&self, destination: &Destination) -> Result<RpcConnection, Fault> {
        let key = destination.key();

        // The connection state requires a mutex, so I need to keep await out of the scope to satisfy clippy (and for paranoia).
        let connecting_handle = loop {
            let mut connections = self.connections.lock().expect("internal mutex must work");
            let state = connections
                .entry(key.clone())
                .or_insert(ConnectionState::Disconnected);
            break match state {
                ConnectionState::Connected(shared_connection) => {
                    if shared_connection.is_alive() {
                        return Ok(shared_connection.clone());
                    } else {
                        log::debug!("replacing dead connection to {key}");
                        *state = ConnectionState::Disconnected;
                        continue;
                    }
                }
                ConnectionState::Connecting(join_handle) => join_handle.clone(),
                ConnectionState::Disconnected => {
                    let connector = self.connector.clone();
                    let load = SpawnedConnect {
                        destination: key.clone(),
                        inner: self.event_loop.spawn(connector.connect(destination.clone())),
                    }
                    .shared();
                    *state = ConnectionState::Connecting(load.clone());
                    continue;
                }
            };
        };

        match connecting_handle.await {
            Ok(connection) => Ok(reconcile_connection_slot(
                &self.connections,
                &key,
                connection,
            )),
            Err(connect_error) => {
                let mut connections = self.connections.lock().expect("internal mutex must work");
                if let Some(state) = connections.get_mut(&key) {
                    if matches!(state, ConnectionState::Connecting(_)) {
                        *state = ConnectionState::Disconnected;
                    }
                }
                Err(connect_error)
            }
        }
    }

    /// Close the connection to `destination`, failing its pending calls.
    pub fn close(&self, destination: &Destination) {
        let removed = self
            .connections
            .lock()
            .expect("internal mutex must work")
            .remove(&destination.key());
        if let Some(ConnectionState::Connected(connection)) = removed {
            connection.close();
        }
    }

    /// Close every connection in the pool.
    pub fn close_all(&self) {
        let removed: Vec<_> = self
            .connections
            .lock()
            .expect("internal mutex must work")
            .drain()
            .collect();
        for (_, state) in removed {
            if let ConnectionState::Connected(connection) = state {
                connection.close();
            }
        }
    }

    /// The number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .expect("internal mutex must work")
            .values()
            .filter(|state| {
                matches!(state, ConnectionState::Connected(connection) if connection.is_alive())
            })
            .count()
    }
}

impl<Connector: ClientConnector> Drop for ConnectionPool<Connector> {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn reconcile_connection_slot(
    connections: &Mutex<HashMap<String, ConnectionState, ahash::RandomState>>,
    key: &str,
    connection: RpcConnection,
) -> RpcConnection {
    let mut connections = connections.lock().expect("internal mutex must work");
    let state = connections
        .entry(key.to_string())
        .or_insert(ConnectionState::Disconnected);
    match state {
        ConnectionState::Connecting(_shared) => {
            // Here we drop the shared handle. If there is another task still waiting on it, they will get notified when
            // the spawned connection task completes. When they come to reconcile with the connection slot, they will
            // favor this connection and drop their own.
            *state = ConnectionState::Connected(connection.clone());
            connection
        }
        ConnectionState::Connected(current) => {
            if current.is_alive() {
                // someone else beat us to it
                current.clone()
            } else {
                // well this one is broken too, so we should just replace it with our new one
                *state = ConnectionState::Connected(connection.clone());
                connection
            }
        }
        ConnectionState::Disconnected => {
            // we raced with a disconnect, but we have a new connection, so use it
            *state = ConnectionState::Connected(connection.clone());
            connection
        }
    }
}

struct SpawnedConnect {
    destination: String,
    inner: tokio::task::JoinHandle<Result<RpcConnection, Fault>>,
}
impl Future for SpawnedConnect {
    type Output = Result<RpcConnection, Fault>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        match pin!(&mut self.inner).poll(context) {
            Poll::Ready(Ok(connect_result)) => Poll::Ready(connect_result),
            Poll::Ready(Err(join_error)) => Poll::Ready(Err(Fault::new(
                FaultKind::ConnectionError,
                format!("{join_error} for '{}'.", self.destination),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug)]
enum ConnectionState {
    Connecting(futures::future::Shared<SpawnedConnect>),
    Connected(RpcConnection),
    Disconnected,
}

impl std::fmt::Debug for SpawnedConnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedConnect")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

use std::{sync::Arc, time::Duration};

use rmpv::Value;
use tokio::sync::oneshot;

use super::{
    configuration::ClientCodec, reactor::callback_registry::Completion, ClientConnector,
    Configuration, ConnectionPool, Destination, RemoteObject, RpcConnection, StreamConnector,
};
use crate::{Error, EventLoop, Fault};

/// A client for calling methods on a callsocket rpc server.
///
/// Calls go over the pool's one connection to the destination. The connection is
/// multiplexed: calls from any number of threads and tasks share it, and replies are
/// delivered to their callers in whatever order they arrive.
///
/// Clients are cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Client<Connector: ClientConnector = Arc<Configuration>> {
    destination: Destination,
    pool: Arc<ConnectionPool<Connector>>,
    token: Option<String>,
    call_timeout: Option<Duration>,
}

impl<TStreamConnector, TCodec> Client<Arc<Configuration<TStreamConnector, TCodec>>>
where
    TStreamConnector: StreamConnector + Send + Sync + 'static,
    TCodec: ClientCodec,
{
    /// Connect a new client to `destination` on the shared event loop, with its own pool.
    ///
    /// Each call builds a separate pool, so two clients made this way never share a
    /// connection. Use [`Client::shared`], or hand one [`ConnectionPool`] to
    /// [`Client::new`], to keep one connection per destination.
    ///
    /// The connection is established before this returns, so an unreachable destination
    /// fails here with a connection fault.
    pub fn connect(
        destination: Destination,
        configuration: Configuration<TStreamConnector, TCodec>,
    ) -> crate::Result<Self> {
        let pool = ConnectionPool::new(Arc::new(configuration), EventLoop::shared()?);
        let client = Self::new(destination, Arc::new(pool));
        client.establish()?;
        Ok(client)
    }
}

impl Client {
    /// A client for `destination` over [`ConnectionPool::shared`], the process-wide pool of
    /// default-configured connections. Every shared client for a destination uses the same
    /// connection.
    ///
    /// The connection is established before this returns.
    pub fn shared(destination: Destination) -> crate::Result<Self> {
        let client = Self::new(destination, ConnectionPool::shared()?);
        client.establish()?;
        Ok(client)
    }
}

impl<Connector: ClientConnector> Client<Connector> {
    /// A client for `destination` that takes its connections from `pool`.
    ///
    /// Nothing is connected until the first call, or until you call `establish`.
    pub fn new(destination: Destination, pool: Arc<ConnectionPool<Connector>>) -> Self {
        Self {
            destination,
            pool,
            token: None,
            call_timeout: None,
        }
    }

    /// Send `token` with every call, for servers that require one.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Give up on blocking and awaited calls that get no reply within `call_timeout`.
    ///
    /// The call is forgotten: its reply, if it ever comes, is dropped. Without a timeout a
    /// call waits as long as its connection lives.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = Some(call_timeout);
        self
    }

    /// Where this client's calls go.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The pool this client takes connections from.
    pub fn pool(&self) -> &Arc<ConnectionPool<Connector>> {
        &self.pool
    }

    /// Make sure there is a live connection, connecting if needed. Blocks.
    pub fn establish(&self) -> crate::Result<()> {
        self.connection().map(|_| ())
    }

    /// The live connection calls currently use, connecting if needed. Blocks.
    pub fn connection(&self) -> crate::Result<RpcConnection> {
        let connection = self
            .pool
            .event_loop()
            .block_on(self.pool.get_connection(&self.destination))??;
        Ok(connection)
    }

    /// Call `name` and block until it replies.
    ///
    /// A remote failure is returned as `Error::Fault` carrying the remote fault's kind,
    /// message and trace. This must not be called from the event loop thread: it fails with
    /// `Error::WouldDeadlock` there instead of waiting forever.
    pub fn call(&self, name: &str, args: Vec<Value>) -> crate::Result<Value> {
        let event_loop = self.pool.event_loop();
        if event_loop.is_current_thread() {
            log::error!("blocking call to {name} attempted on the event loop thread");
            return Err(Error::WouldDeadlock);
        }
        event_loop.block_on(self.send(name, args))?
    }

    /// Call `name` and return immediately.
    ///
    /// `continuation` runs exactly once, on a worker thread, with the reply or the fault.
    /// A remote failure is handed to the continuation as its `Err`.
    pub fn call_with<F>(&self, name: &str, args: Vec<Value>, continuation: F)
    where
        F: FnOnce(Result<Value, Fault>) + Send + 'static,
    {
        let pool = self.pool.clone();
        let destination = self.destination.clone();
        let token = self.token.clone();
        let call = name.to_string();
        self.pool.event_loop().spawn(async move {
            let completion = Completion::Callback(Box::new(continuation));
            match pool.get_connection(&destination).await {
                Ok(connection) => {
                    // a failed send has already failed the completion
                    let _ = connection.send_call(call, args, token, completion);
                }
                Err(fault) => completion.complete(Err(fault)),
            }
        });
    }

    /// Call `name` and await the reply. Use this from async code.
    pub async fn send(&self, name: &str, args: Vec<Value>) -> crate::Result<Value> {
        let connection = self.pool.get_connection(&self.destination).await?;
        let (completion, reply) = oneshot::channel();
        let cb_id = connection.send_call(
            name.to_string(),
            args,
            self.token.clone(),
            Completion::Oneshot(completion),
        )?;

        let reply = match self.call_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply).await {
                Ok(reply) => reply,
                Err(_elapsed) => {
                    connection.forget(&cb_id);
                    log::warn!("{cb_id} {name} timed out after {timeout:?}");
                    return Err(Error::CallTimedOut {
                        call: name.to_string(),
                        timeout,
                    });
                }
            },
            None => reply.await,
        };
        match reply {
            Ok(result) => Ok(result?),
            Err(_dropped) => Err(Fault::connection_closed(connection.destination()).into()),
        }
    }

    /// A proxy for the methods the server registered under `namespace`.
    pub fn remote(&self, namespace: impl Into<String>) -> RemoteObject<Connector> {
        RemoteObject::new(self.clone(), namespace.into())
    }
}

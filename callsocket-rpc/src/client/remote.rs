use rmpv::Value;

use super::{Client, ClientConnector};
use crate::Fault;

/// A handle to one remote handler namespace: `remote.call("foo", args)` is
/// `client.call("namespace.foo", args)`.
#[derive(Debug, Clone)]
pub struct RemoteObject<Connector: ClientConnector> {
    client: Client<Connector>,
    namespace: String,
}

impl<Connector: ClientConnector> RemoteObject<Connector> {
    pub(crate) fn new(client: Client<Connector>, namespace: String) -> Self {
        Self { client, namespace }
    }

    /// The namespace calls are sent to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn qualify(&self, method: &str) -> String {
        format!("{}.{method}", self.namespace)
    }

    /// Blocking call; see [`Client::call`].
    pub fn call(&self, method: &str, args: Vec<Value>) -> crate::Result<Value> {
        self.client.call(&self.qualify(method), args)
    }

    /// Call with a continuation; see [`Client::call_with`].
    pub fn call_with<F>(&self, method: &str, args: Vec<Value>, continuation: F)
    where
        F: FnOnce(Result<Value, Fault>) + Send + 'static,
    {
        self.client
            .call_with(&self.qualify(method), args, continuation)
    }

    /// Awaited call; see [`Client::send`].
    pub async fn send(&self, method: &str, args: Vec<Value>) -> crate::Result<Value> {
        self.client.send(&self.qualify(method), args).await
    }
}

//! The calling side: clients, their connections and the pool that shares them.
//!
//! ```no_run
//! use callsocket_rpc::client::{Client, Configuration, Destination};
//!
//! let client = Client::connect(Destination::new("127.0.0.1", 7331), Configuration::default())?;
//! let sum = client.call("bench.foo", vec![1.into(), 2.into(), 3.into()])?;
//! client.call_with("bench.foo", vec![4.into(), 5.into(), 6.into()], |reply| {
//!     println!("bench.foo replied {reply:?}");
//! });
//! # let _ = sum;
//! # Ok::<(), callsocket_rpc::Error>(())
//! ```

mod configuration;
mod connection_pool;
mod destination;
mod reactor;
mod remote;
mod rpc_client;
mod rpc_connection;
mod stream_connector;

pub use configuration::{ClientCodec, Configuration, MessagePackClientCodec};
pub use connection_pool::{ClientConnector, ConnectionPool};
pub use destination::Destination;
pub use reactor::callback_registry::{Completion, Reply};
pub use remote::RemoteObject;
pub use rpc_client::Client;
pub use rpc_connection::RpcConnection;
pub use stream_connector::{
    StreamConnector, TcpStreamConnector, TrustedTlsStreamConnector, UnverifiedTlsStreamConnector,
    WebpkiTlsStreamConnector,
};

//! The serving side: handlers, dispatch and the socket server that hosts them.

mod configuration;
mod dispatch_service;
mod dispatcher;
mod handler;
mod rpc_responder;
mod rpc_server;
mod rpc_submitter;
mod server_traits;
mod socket_server;

pub use configuration::Configuration;
pub use dispatch_service::{DispatchConnectionService, DispatchSocketService};
pub use dispatcher::Dispatcher;
pub use handler::{Handler, Methods};
pub use rpc_responder::RpcResponder;
pub use rpc_server::{MessagePackServerCodec, Server, ServerHandle};
pub use server_traits::{ConnectionService, ServerCodec, SocketService};
pub use socket_server::SocketRpcServer;

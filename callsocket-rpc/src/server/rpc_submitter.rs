use std::net::SocketAddr;

use callsocket::{MessageReactor, ReactorStatus};
use tokio::sync::mpsc;

use crate::{
    server::{rpc_responder::RpcResponder, ConnectionService},
    Decoded, Fault, Request, Response,
};

/// A MessageReactor that sends calls along to a ConnectionService, each with a responder
/// that replies on this connection.
#[derive(Debug)]
pub struct RpcSubmitter<TConnectionService>
where
    TConnectionService: ConnectionService,
{
    connection_service: TConnectionService,
    outbound: mpsc::UnboundedSender<Response>,
    address: SocketAddr,
}
impl<TConnectionService> RpcSubmitter<TConnectionService>
where
    TConnectionService: ConnectionService,
{
    /// A reactor for the connection from `address`, replying on `outbound`.
    pub fn new(
        connection_service: TConnectionService,
        outbound: mpsc::UnboundedSender<Response>,
        address: SocketAddr,
    ) -> Self {
        Self {
            connection_service,
            outbound,
            address,
        }
    }
}

impl<TConnectionService> MessageReactor for RpcSubmitter<TConnectionService>
where
    TConnectionService: ConnectionService,
{
    type Inbound = Decoded<Request>;
    type Outbound = Response;
    type LogicalOutbound = Response;

    fn on_inbound_message(&mut self, request: Self::Inbound) -> ReactorStatus {
        let request = match request {
            Decoded::Valid(request) => request,
            Decoded::Malformed {
                cb_id: Some(cb_id),
                error,
            } => {
                log::warn!("{} {cb_id} malformed request: {error}", self.address);
                let fault = Fault::protocol_error(format!("Malformed request: {error}"));
                if self.outbound.send(Response::reply(cb_id, Err(fault))).is_err() {
                    log::debug!("{} connection closed before the fault went out", self.address);
                }
                return ReactorStatus::Continue;
            }
            Decoded::Malformed { cb_id: None, error } => {
                log::warn!("{} dropping uncorrelated request: {error}", self.address);
                return ReactorStatus::Continue;
            }
        };
        log::trace!("{} {} received {}", self.address, request.cb_id, request.call);
        let responder = RpcResponder::new(
            self.outbound.clone(),
            request.cb_id.clone(),
            request.call.clone(),
        );
        self.connection_service.new_call(request, responder);
        ReactorStatus::Continue
    }

    fn on_outbound_message(&mut self, response: Self::LogicalOutbound) -> Self::Outbound {
        log::trace!("{} {} replying", self.address, response.cb_id);
        response
    }
}

use std::sync::Arc;

use callsocket::{MessageReactor, ReactorStatus};

use crate::{Decoded, Fault, Request, Response};

use super::callback_registry::CallbackRegistry;

/// The client side of a connection: routes each response to the completion registered
/// under its correlation id.
///
/// When the connection ends this reactor is dropped, and every call still pending fails
/// with a connection fault.
#[derive(Debug)]
pub struct RpcCompletionReactor {
    destination: String,
    registry: Arc<CallbackRegistry>,
}

impl RpcCompletionReactor {
    /// A reactor for a connection to `destination`, with an empty registry.
    pub fn new(destination: String) -> Self {
        Self {
            destination,
            registry: Default::default(),
        }
    }

    /// The registry calls on this connection register with. It is closed once the
    /// connection ends.
    pub fn registry_handle(&self) -> Arc<CallbackRegistry> {
        self.registry.clone()
    }
}

impl Drop for RpcCompletionReactor {
    fn drop(&mut self) {
        let orphaned = self.registry.close();
        if !orphaned.is_empty() {
            log::debug!(
                "{} failing {} pending calls on close",
                self.destination,
                orphaned.len()
            );
        }
        for completion in orphaned {
            completion.complete(Err(Fault::connection_closed(&self.destination)));
        }
    }
}

impl MessageReactor for RpcCompletionReactor {
    type Inbound = Decoded<Response>;
    type Outbound = Request;
    type LogicalOutbound = Request;

    fn on_inbound_message(&mut self, response: Self::Inbound) -> ReactorStatus {
        let (cb_id, reply) = match response {
            Decoded::Valid(response) => response.into_reply(),
            Decoded::Malformed {
                cb_id: Some(cb_id),
                error,
            } => {
                log::warn!("{} {cb_id} malformed response: {error}", self.destination);
                let fault = Fault::protocol_error(format!("Malformed response: {error}"));
                (cb_id, Err(fault))
            }
            Decoded::Malformed { cb_id: None, error } => {
                log::warn!("{} dropping uncorrelated response: {error}", self.destination);
                return ReactorStatus::Continue;
            }
        };
        match self.registry.fire(&cb_id) {
            Some(completion) => {
                log::trace!("{cb_id} completing call");
                completion.complete(reply);
            }
            None => {
                // late replies to timed out calls land here too
                log::warn!("{cb_id} response for a call that is not in flight; dropping it");
            }
        }
        ReactorStatus::Continue
    }

    fn on_outbound_message(&mut self, request: Self::LogicalOutbound) -> Self::Outbound {
        log::trace!("{} sending {}", request.cb_id, request.call);
        request
    }
}

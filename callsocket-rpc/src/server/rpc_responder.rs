use rmpv::Value;
use tokio::sync::mpsc;

use crate::{Fault, Response};

/// The reply sink for one call, stamped with the call's correlation id.
///
/// Reply once with [`RpcResponder::respond`], from any thread or task. A responder that is
/// dropped without replying sends a fault instead, so the caller never waits on a reply that
/// is not coming. That includes handlers that panic.
#[must_use = "an unanswered responder replies with a fault"]
#[derive(Debug)]
pub struct RpcResponder {
    outbound: Option<mpsc::UnboundedSender<Response>>,
    cb_id: String,
    call: String,
}

impl RpcResponder {
    pub(crate) fn new(
        outbound: mpsc::UnboundedSender<Response>,
        cb_id: String,
        call: String,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            cb_id,
            call,
        }
    }

    /// The correlation id of the call.
    pub fn cb_id(&self) -> &str {
        &self.cb_id
    }

    /// The `handler.method` that was called.
    pub fn call(&self) -> &str {
        &self.call
    }

    /// Send the call's outcome. A fault is marshaled with a trace line naming the call.
    pub fn respond(mut self, result: Result<Value, Fault>) {
        self.send(result);
    }

    fn send(&mut self, result: Result<Value, Fault>) {
        let Some(outbound) = self.outbound.take() else {
            return;
        };
        let result = result.map_err(|fault| {
            log::debug!("{} {} failed: {fault}", self.cb_id, self.call);
            fault.with_trace(format!("while dispatching '{}'", self.call))
        });
        if outbound
            .send(Response::reply(self.cb_id.clone(), result))
            .is_err()
        {
            log::debug!("{} connection closed before {} replied", self.cb_id, self.call);
        }
    }
}

impl Drop for RpcResponder {
    fn drop(&mut self) {
        if self.outbound.is_some() {
            log::warn!("{} {} ended without a reply", self.cb_id, self.call);
            let fault = Fault::remote_exception(format!("'{}' ended without a reply", self.call));
            self.send(Err(fault));
        }
    }
}

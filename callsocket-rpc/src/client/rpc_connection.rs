use std::sync::Arc;

use rmpv::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::reactor::{
    callback_registry::{CallbackRegistry, Completion},
    completion_reactor::RpcCompletionReactor,
};
use crate::{Fault, Request};

/// A handle to one live connection.
///
/// Connections are shared and multiplexed: clone the handle freely, and issue as many
/// concurrent calls as you like. Replies are matched to calls by correlation id.
#[derive(Debug, Clone)]
pub struct RpcConnection {
    destination: Arc<str>,
    registry: Arc<CallbackRegistry>,
    submission_queue: mpsc::UnboundedSender<Request>,
    closer: CancellationToken,
}

impl RpcConnection {
    pub(crate) fn new(
        destination: &str,
        reactor: &RpcCompletionReactor,
        submission_queue: mpsc::UnboundedSender<Request>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            destination: destination.into(),
            registry: reactor.registry_handle(),
            submission_queue,
            closer,
        }
    }

    /// The `host:port` this connection goes to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// False once the connection has ended, for any reason.
    pub fn is_alive(&self) -> bool {
        !self.registry.is_closed() && !self.closer.is_cancelled()
    }

    /// Send a call. The completion is resolved exactly once: with the reply, or with a
    /// connection fault if the call cannot be sent or the connection dies first.
    ///
    /// Returns the call's correlation id, or the fault the completion was failed with.
    pub fn send_call(
        &self,
        call: String,
        args: Vec<Value>,
        token: Option<String>,
        completion: Completion,
    ) -> Result<String, Fault> {
        // registered before sending, so the reply cannot arrive first
        let cb_id = match self.registry.register(completion) {
            Ok(cb_id) => cb_id,
            Err(completion) => {
                let fault = Fault::connection_closed(&self.destination);
                completion.complete(Err(fault.clone()));
                return Err(fault);
            }
        };
        log::trace!("{cb_id} submitting {call} to {}", self.destination);
        let request = Request {
            call,
            args,
            token,
            cb_id: cb_id.clone(),
        };
        if self.submission_queue.send(request).is_err() {
            let fault = Fault::connection_closed(&self.destination);
            // the reactor may have drained it already
            if let Some(completion) = self.registry.fire(&cb_id) {
                completion.complete(Err(fault.clone()));
            }
            return Err(fault);
        }
        Ok(cb_id)
    }

    /// Forget a pending call. A reply arriving later is dropped as an orphan.
    pub fn forget(&self, cb_id: &str) -> bool {
        self.registry.fire(cb_id).is_some()
    }

    /// The number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    /// Close the connection. Every pending call fails with a connection fault.
    pub fn close(&self) {
        log::debug!("closing connection to {}", self.destination);
        self.closer.cancel();
    }

    /// True if both handles refer to the same underlying connection.
    pub fn same_connection(&self, other: &RpcConnection) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

#[cfg(test)]
mod test {
    use rmpv::Value;
    use tokio::sync::{mpsc, oneshot};
    use tokio_util::sync::CancellationToken;

    use super::RpcConnection;
    use crate::{
        client::{reactor::completion_reactor::RpcCompletionReactor, Completion},
        FaultKind,
    };

    #[test]
    fn calls_are_registered_before_they_are_sent() {
        let reactor = RpcCompletionReactor::new("bench:1".to_string());
        let (sender, mut submissions) = mpsc::unbounded_channel();
        let connection = RpcConnection::new("bench:1", &reactor, sender, CancellationToken::new());

        let (completion, _reply) = oneshot::channel();
        let cb_id = connection
            .send_call(
                "bench.foo".to_string(),
                vec![Value::from(1)],
                Some("secret".to_string()),
                Completion::Oneshot(completion),
            )
            .expect("sent");

        let request = submissions.try_recv().expect("submitted");
        assert_eq!(cb_id, request.cb_id);
        assert_eq!("bench.foo", request.call);
        assert_eq!(Some("secret".to_string()), request.token);
        assert_eq!(1, connection.pending_calls());
    }

    #[test]
    fn calls_on_a_dead_connection_fail_immediately() {
        let reactor = RpcCompletionReactor::new("bench:1".to_string());
        let (sender, submissions) = mpsc::unbounded_channel();
        let connection = RpcConnection::new("bench:1", &reactor, sender, CancellationToken::new());
        drop(submissions);

        let (completion, mut reply) = oneshot::channel();
        let fault = connection
            .send_call(
                "bench.foo".to_string(),
                Vec::new(),
                None,
                Completion::Oneshot(completion),
            )
            .expect_err("nothing to send to");
        assert_eq!(FaultKind::ConnectionError, fault.kind());
        assert_eq!(Ok(Err(fault)), reply.try_recv());
        assert_eq!(0, connection.pending_calls());
    }

    #[test]
    fn calls_after_the_reactor_drops_fail_immediately() {
        let reactor = RpcCompletionReactor::new("bench:1".to_string());
        let (sender, _submissions) = mpsc::unbounded_channel();
        let connection = RpcConnection::new("bench:1", &reactor, sender, CancellationToken::new());
        drop(reactor);
        assert!(!connection.is_alive());

        let (completion, mut reply) = oneshot::channel();
        assert!(connection
            .send_call(
                "bench.foo".to_string(),
                Vec::new(),
                None,
                Completion::Oneshot(completion),
            )
            .is_err());
        assert!(matches!(reply.try_recv(), Ok(Err(_))));
    }

    #[test]
    fn handles_know_their_siblings() {
        let reactor = RpcCompletionReactor::new("bench:1".to_string());
        let other_reactor = RpcCompletionReactor::new("bench:1".to_string());
        let (sender, _submissions) = mpsc::unbounded_channel();
        let connection =
            RpcConnection::new("bench:1", &reactor, sender.clone(), CancellationToken::new());
        let other = RpcConnection::new("bench:1", &other_reactor, sender, CancellationToken::new());

        assert!(connection.same_connection(&connection.clone()));
        assert!(!connection.same_connection(&other));
    }
}

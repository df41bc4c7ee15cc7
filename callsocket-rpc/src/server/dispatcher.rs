use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use super::{Handler, RpcResponder};
use crate::{Fault, Request};

/// Routes `handler.method` calls to registered handlers.
///
/// The token is checked before anything else. Then the call is split on its first `.` into a
/// namespace and a method, and each is looked up in turn. Every failure along the way is
/// replied to as a fault; nothing here can take the server down.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>, ahash::RandomState>,
    token: Option<String>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Dispatcher {
    /// A dispatcher with no handlers. With a token, every request must carry the same one.
    pub fn new(token: Option<String>) -> Self {
        Self {
            handlers: Default::default(),
            token,
        }
    }

    /// Register `handler` under `namespace`, replacing any handler already there.
    pub fn add_handler(&mut self, namespace: impl Into<String>, handler: impl Handler) {
        let namespace = namespace.into();
        log::debug!("registering handler {namespace}");
        self.handlers.insert(namespace, Arc::new(handler));
    }

    /// Handle one request. This runs handler code: call it off the event loop.
    pub fn dispatch(&self, request: Request, responder: RpcResponder) {
        let Request {
            call, args, token, ..
        } = request;

        if let Some(expected) = &self.token {
            if token.as_deref() != Some(expected.as_str()) {
                log::warn!("{} rejected {call}: bad token", responder.cb_id());
                return responder.respond(Err(Fault::authentication(format!(
                    "Token missing or invalid while calling: {call}"
                ))));
            }
        }

        let Some((namespace, method)) = call.split_once('.') else {
            return responder.respond(Err(Fault::invalid_object(format!(
                "'{call}' is not a handler.method reference."
            ))));
        };
        let Some(handler) = self.handlers.get(namespace) else {
            return responder.respond(Err(Fault::invalid_object(format!(
                "Trying to access non-existent object '{namespace}'."
            ))));
        };
        if !handler.has_method(method) {
            return responder.respond(Err(Fault::invalid_method(format!(
                "Trying to access non-existent method '{method}' of '{namespace}'."
            ))));
        }

        log::trace!("{} invoking {call}", responder.cb_id());
        // an unwinding handler drops its responder, which replies with a fault
        if catch_unwind(AssertUnwindSafe(|| handler.invoke(method, args, responder))).is_err() {
            log::error!("handler panicked while serving {call}");
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use rmpv::Value;
    use tokio::sync::mpsc;

    use super::Dispatcher;
    use crate::{
        server::{Methods, RpcResponder},
        Fault, FaultKind, Request, Response,
    };

    #[track_caller]
    fn dispatch(
        dispatcher: &Dispatcher,
        call: &str,
        args: Vec<Value>,
        token: Option<&str>,
    ) -> Result<Value, Fault> {
        let (outbound, mut responses) = mpsc::unbounded_channel::<Response>();
        let request = Request {
            call: call.to_string(),
            args,
            token: token.map(str::to_string),
            cb_id: "42".to_string(),
        };
        let responder = RpcResponder::new(outbound, request.cb_id.clone(), request.call.clone());
        dispatcher.dispatch(request, responder);
        let (cb_id, result) = responses.try_recv().expect("replied").into_reply();
        assert_eq!("42", cb_id, "faults are correlated too");
        assert!(responses.try_recv().is_err(), "exactly one reply");
        result
    }

    fn bench_dispatcher(token: Option<&str>, invocations: Arc<AtomicUsize>) -> Dispatcher {
        let mut dispatcher = Dispatcher::new(token.map(str::to_string));
        dispatcher.add_handler(
            "bench",
            Methods::new()
                .method("foo", move |(a, b, c): (i64, i64, i64)| {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Fault>(a + b + c)
                })
                .method("panic", |(): ()| -> Result<(), Fault> { panic!("handler bug") }),
        );
        dispatcher
    }

    #[test]
    fn calls_reach_their_handler() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let dispatcher = bench_dispatcher(None, invocations.clone());
        assert_eq!(
            Ok(Value::from(6)),
            dispatch(&dispatcher, "bench.foo", vec![1.into(), 2.into(), 3.into()], None)
        );
        assert_eq!(1, invocations.load(Ordering::SeqCst));
    }

    #[test]
    fn the_token_is_checked_before_dispatch() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let dispatcher = bench_dispatcher(Some("other"), invocations.clone());
        let args = || vec![1.into(), 2.into(), 3.into()];

        for token in [Some("secret"), None] {
            let fault = dispatch(&dispatcher, "bench.foo", args(), token).expect_err("rejected");
            assert_eq!(FaultKind::Authentication, fault.kind());
        }
        let fault = dispatch(&dispatcher, "missing.method", args(), None).expect_err("rejected");
        assert_eq!(
            FaultKind::Authentication,
            fault.kind(),
            "authentication comes before lookup"
        );
        assert_eq!(0, invocations.load(Ordering::SeqCst));

        assert!(dispatch(&dispatcher, "bench.foo", args(), Some("other")).is_ok());
    }

    #[test]
    fn unknown_references_are_invalid_objects() {
        let dispatcher = bench_dispatcher(None, Default::default());
        for call in ["missing.method", "bench", ".foo"] {
            let fault = dispatch(&dispatcher, call, Vec::new(), None).expect_err("no such handler");
            assert_eq!(FaultKind::InvalidObject, fault.kind(), "{call}");
        }
        let fault = dispatch(&dispatcher, "bench.missing", Vec::new(), None).expect_err("no method");
        assert_eq!(FaultKind::InvalidMethod, fault.kind());
    }

    #[test]
    fn the_call_splits_on_the_first_separator() {
        let dispatcher = bench_dispatcher(None, Default::default());
        let fault = dispatch(&dispatcher, "bench.foo.bar", Vec::new(), None).expect_err("no method");
        assert_eq!(FaultKind::InvalidMethod, fault.kind());
        assert!(fault.message().contains("'foo.bar'"), "{fault}");
    }

    #[test]
    fn panicking_handlers_still_reply() {
        let dispatcher = bench_dispatcher(None, Default::default());
        let fault = dispatch(&dispatcher, "bench.panic", Vec::new(), None).expect_err("panicked");
        assert_eq!(FaultKind::RemoteException, fault.kind());
    }
}

use std::collections::HashMap;

use rmpv::Value;
use serde::{de::DeserializeOwned, Serialize};

use super::RpcResponder;
use crate::Fault;

/// An object whose methods can be called remotely, registered on a server under a namespace.
///
/// `invoke` runs on a worker thread, never the event loop, so it may block. It must reply
/// through the responder, now or later.
pub trait Handler: Send + Sync + 'static {
    /// True if `method` can be invoked on this handler.
    fn has_method(&self, method: &str) -> bool;

    /// Invoke `method` with positional `args`.
    fn invoke(&self, method: &str, args: Vec<Value>, responder: RpcResponder);
}

type Method = Box<dyn Fn(Vec<Value>, RpcResponder) + Send + Sync>;

/// A [`Handler`] built from closures, one per method name.
///
/// ```
/// use callsocket_rpc::server::Methods;
///
/// let bench = Methods::new()
///     .method("foo", |(a, b, c): (i64, i64, i64)| Ok::<_, String>(a + b + c))
///     .method("explode", |(): ()| Err::<(), _>("boom"));
/// ```
#[derive(Default)]
pub struct Methods {
    methods: HashMap<String, Method, ahash::RandomState>,
}

impl std::fmt::Debug for Methods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.methods.keys()).finish()
    }
}

impl Methods {
    /// A handler with no methods yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed method.
    ///
    /// The positional arguments are decoded as `A`, usually a tuple: a 3 argument method
    /// takes `(A1, A2, A3)`, a single argument method takes `(A1,)` and a method with no
    /// arguments takes `()`. Arguments that do not decode are an `InvalidArgument` fault. An
    /// `Err` from the method is marshaled as a fault; plain messages become `RemoteException`.
    pub fn method<A, R, E, F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        E: Into<Fault>,
        F: Fn(A) -> Result<R, E> + Send + Sync + 'static,
    {
        let name = name.into();
        let method_name = name.clone();
        self.methods.insert(
            name,
            Box::new(move |args, responder| {
                let result = decode_arguments::<A>(&method_name, args)
                    .and_then(|args| method(args).map_err(Into::into))
                    .and_then(|value| {
                        rmpv::ext::to_value(value).map_err(|e| {
                            Fault::remote_exception(format!(
                                "unable to encode the result of '{method_name}': {e}"
                            ))
                        })
                    });
                responder.respond(result);
            }),
        );
        self
    }

    /// Add a method that takes and returns raw values.
    pub fn raw<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, Fault> + Send + Sync + 'static,
    {
        self.methods.insert(
            name.into(),
            Box::new(move |args, responder| responder.respond(method(args))),
        );
        self
    }

    /// Add a method that replies later, from any thread or task, through its responder.
    pub fn deferred<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(Vec<Value>, RpcResponder) + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(method));
        self
    }
}

impl Handler for Methods {
    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn invoke(&self, method: &str, args: Vec<Value>, responder: RpcResponder) {
        match self.methods.get(method) {
            Some(method) => method(args, responder),
            None => responder.respond(Err(Fault::invalid_method(format!(
                "Trying to access non-existent method '{method}'."
            )))),
        }
    }
}

fn decode_arguments<A: DeserializeOwned>(method: &str, args: Vec<Value>) -> Result<A, Fault> {
    let no_arguments = args.is_empty();
    match rmpv::ext::from_value(Value::Array(args)) {
        Ok(args) => Ok(args),
        // `()` decodes from nil, not from an empty array
        Err(_) if no_arguments => rmpv::ext::from_value(Value::Nil)
            .map_err(|e| invalid_arguments(method, e)),
        Err(e) => Err(invalid_arguments(method, e)),
    }
}

fn invalid_arguments(method: &str, error: impl std::fmt::Display) -> Fault {
    Fault::invalid_argument(format!("wrong arguments for '{method}': {error}"))
}

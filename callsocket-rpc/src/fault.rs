use crate::message::ExceptionEnvelope;

/// The closed set of fault kinds that cross the wire.
///
/// The wire key of each kind is its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The transport could not be established, or it died with calls pending.
    ConnectionError,
    /// The call named a handler that does not exist, or was not a `handler.method` reference.
    InvalidObject,
    /// The handler exists but has no such method.
    InvalidMethod,
    /// The arguments did not fit the method's arity or types.
    InvalidArgument,
    /// The request token was missing or did not match.
    Authentication,
    /// A malformed envelope or an unknown fault kind.
    ProtocolError,
    /// The handler itself failed.
    RemoteException,
}

/// Wire keys and the kinds they reconstruct.
const FAULT_KINDS: &[(&str, FaultKind)] = &[
    ("ConnectionError", FaultKind::ConnectionError),
    ("InvalidObject", FaultKind::InvalidObject),
    ("InvalidMethod", FaultKind::InvalidMethod),
    ("InvalidArgument", FaultKind::InvalidArgument),
    ("Authentication", FaultKind::Authentication),
    ("ProtocolError", FaultKind::ProtocolError),
    ("RemoteException", FaultKind::RemoteException),
];

impl FaultKind {
    /// The key this kind is marshaled as.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::ConnectionError => "ConnectionError",
            FaultKind::InvalidObject => "InvalidObject",
            FaultKind::InvalidMethod => "InvalidMethod",
            FaultKind::InvalidArgument => "InvalidArgument",
            FaultKind::Authentication => "Authentication",
            FaultKind::ProtocolError => "ProtocolError",
            FaultKind::RemoteException => "RemoteException",
        }
    }

    /// Look up a kind by its wire key.
    pub fn from_key(key: &str) -> Option<Self> {
        FAULT_KINDS
            .iter()
            .find(|(known, _)| *known == key)
            .map(|(_, kind)| *kind)
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure of a remote call.
///
/// Faults raised on the server are marshaled into an exception envelope and reconstructed
/// here with their kind, message and origin trace. The trace is for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    kind: FaultKind,
    message: String,
    backtrace: Vec<String>,
}

impl Fault {
    /// A fault of `kind` with no trace.
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    /// The transport to `destination` failed. The trace is the error's source chain.
    pub fn connection_error(
        destination: impl std::fmt::Display,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let backtrace = std::iter::successors(Some(error), |error| error.source())
            .map(|error| error.to_string())
            .collect();
        Self {
            kind: FaultKind::ConnectionError,
            message: format!("{error} for '{destination}'."),
            backtrace,
        }
    }

    /// The connection to `destination` is gone.
    pub fn connection_closed(destination: impl std::fmt::Display) -> Self {
        Self::new(
            FaultKind::ConnectionError,
            format!("Connection is closed for '{destination}'."),
        )
    }

    /// No such handler, or not a `handler.method` reference.
    pub fn invalid_object(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidObject, message)
    }

    /// No such method on the handler.
    pub fn invalid_method(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidMethod, message)
    }

    /// The arguments do not fit the method.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(FaultKind::InvalidArgument, message)
    }

    /// The token was missing or wrong.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Authentication, message)
    }

    /// Something about the protocol exchange was malformed.
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ProtocolError, message)
    }

    /// A handler failed with a domain error.
    pub fn remote_exception(message: impl Into<String>) -> Self {
        Self::new(FaultKind::RemoteException, message)
    }

    /// Append a line to the origin trace.
    pub fn with_trace(mut self, line: impl Into<String>) -> Self {
        self.backtrace.push(line.into());
        self
    }

    /// Which kind of fault this is.
    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The fault's message, as raised at its origin.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The origin trace, innermost first.
    pub fn backtrace(&self) -> &[String] {
        &self.backtrace
    }

    /// Marshal this fault for the wire.
    pub fn to_envelope(&self) -> ExceptionEnvelope {
        ExceptionEnvelope {
            exception: self.message.clone(),
            backtrace: self.backtrace.clone(),
            r#type: self.kind.as_str().to_string(),
        }
    }

    /// Reconstruct a fault from the wire.
    ///
    /// An unknown kind is itself a protocol fault, carrying the unknown key, the original
    /// message and the original trace.
    pub fn from_envelope(envelope: ExceptionEnvelope) -> Self {
        match FaultKind::from_key(&envelope.r#type) {
            Some(kind) => Self {
                kind,
                message: envelope.exception,
                backtrace: envelope.backtrace,
            },
            None => {
                log::warn!("received a fault of unknown kind '{}'", envelope.r#type);
                Self {
                    kind: FaultKind::ProtocolError,
                    message: format!(
                        "unknown fault kind '{}': {}",
                        envelope.r#type, envelope.exception
                    ),
                    backtrace: envelope.backtrace,
                }
            }
        }
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self::remote_exception(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self::remote_exception(message)
    }
}

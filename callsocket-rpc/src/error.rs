use std::{sync::Arc, time::Duration};

use crate::Fault;

/// Result type for callsocket-rpc.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for callsocket-rpc.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The call failed remotely, or its connection failed.
    #[error(transparent)]
    Fault(#[from] Fault),
    /// A blocking call was made from the event loop thread. Waiting there would stop the
    /// loop from ever delivering the reply.
    #[error("blocking call made from the event loop thread; use call_with or send instead")]
    WouldDeadlock,
    /// No reply arrived within the configured call timeout.
    #[error("'{call}' timed out after {timeout:?}")]
    CallTimedOut {
        /// The `handler.method` that was called.
        call: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },
    /// A local I/O failure, like failing to bind a listener.
    #[error("IO failure: {0}")]
    IoFailure(Arc<std::io::Error>),
    /// The configured address could not be resolved.
    #[error("bad address: {0}")]
    AddressError(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::IoFailure(Arc::new(e))
    }
}

impl Error {
    /// The fault behind this error, if it came from a call.
    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Error::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

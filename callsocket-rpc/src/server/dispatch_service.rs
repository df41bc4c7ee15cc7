use std::{marker::PhantomData, net::SocketAddr, sync::Arc};

use callsocket::SocketListener;

use super::{
    server_traits::{ConnectionService, ServerCodec, SocketService},
    Dispatcher, RpcResponder,
};
use crate::Request;

/// The SocketService behind [`super::Server`]: every connection dispatches to the same
/// handlers.
pub struct DispatchSocketService<TCodec, TListener> {
    dispatcher: Arc<Dispatcher>,
    _phantom: PhantomData<fn() -> (TCodec, TListener)>,
}

impl<TCodec, TListener> DispatchSocketService<TCodec, TListener> {
    /// A service dispatching to `dispatcher`.
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            _phantom: PhantomData,
        }
    }
}

impl<TCodec, TListener> std::fmt::Debug for DispatchSocketService<TCodec, TListener> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchSocketService")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl<TCodec, TListener> SocketService for DispatchSocketService<TCodec, TListener>
where
    TCodec: ServerCodec + Default,
    TListener: SocketListener,
{
    type Codec = TCodec;
    type ConnectionService = DispatchConnectionService;
    type SocketListener = TListener;

    fn codec(&self) -> Self::Codec {
        TCodec::default()
    }

    fn new_stream_service(&self, address: SocketAddr) -> Self::ConnectionService {
        log::debug!("new connection service for {address}");
        DispatchConnectionService {
            dispatcher: self.dispatcher.clone(),
            address,
        }
    }
}

/// Dispatches each call of one connection on the blocking worker pool.
#[derive(Debug)]
pub struct DispatchConnectionService {
    dispatcher: Arc<Dispatcher>,
    address: SocketAddr,
}

impl ConnectionService for DispatchConnectionService {
    fn new_call(&mut self, request: Request, responder: RpcResponder) {
        log::trace!("{} {} deferring {}", self.address, request.cb_id, request.call);
        let dispatcher = self.dispatcher.clone();
        tokio::task::spawn_blocking(move || dispatcher.dispatch(request, responder));
    }
}

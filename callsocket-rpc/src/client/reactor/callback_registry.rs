use std::collections::HashMap;

use k_lock::Mutex;
use rmpv::Value;
use tokio::sync::oneshot;

use crate::Fault;

/// The outcome of one call.
pub type Reply = Result<Value, Fault>;

/// Where a call's reply goes.
pub enum Completion {
    /// A continuation, run on the blocking worker pool.
    Callback(Box<dyn FnOnce(Reply) + Send + 'static>),
    /// A waiting caller, blocked or awaiting.
    Oneshot(oneshot::Sender<Reply>),
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Callback(_) => f.write_str("Completion::Callback"),
            Completion::Oneshot(_) => f.write_str("Completion::Oneshot"),
        }
    }
}

impl Completion {
    /// Deliver the reply. Never call this while holding the registry lock.
    pub fn complete(self, reply: Reply) {
        match self {
            Completion::Callback(continuation) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || continuation(reply));
                }
                Err(_) => continuation(reply),
            },
            Completion::Oneshot(sender) => {
                if sender.send(reply).is_err() {
                    log::debug!("caller lost interest in its reply");
                }
            }
        }
    }
}

/// The pending calls of one connection, keyed by correlation id.
///
/// Registration and firing happen under one lock, so a reply can never race its own
/// registration. Each completion leaves the registry exactly once: by `fire` when its reply
/// arrives, or by `close` when the connection dies.
#[derive(Debug)]
pub struct CallbackRegistry {
    state: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    in_flight: HashMap<String, Completion, ahash::RandomState>,
    closed: bool,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackRegistry {
    /// An open registry with nothing in flight.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Allocate a correlation id for `completion`. Ids still pending are skipped.
    ///
    /// A closed registry hands the completion back.
    pub fn register(&self, completion: Completion) -> Result<String, Completion> {
        let mut state = self.state.lock().expect("internal mutex must work");
        if state.closed {
            return Err(completion);
        }
        let cb_id = loop {
            let candidate = state.next_id.to_string();
            state.next_id = state.next_id.wrapping_add(1);
            if !state.in_flight.contains_key(&candidate) {
                break candidate;
            }
        };
        state.in_flight.insert(cb_id.clone(), completion);
        Ok(cb_id)
    }

    /// Take the completion registered under `cb_id`, if it is still pending.
    pub fn fire(&self, cb_id: &str) -> Option<Completion> {
        self.state
            .lock()
            .expect("internal mutex must work")
            .in_flight
            .remove(cb_id)
    }

    /// Refuse new registrations and take every pending completion.
    pub fn close(&self) -> Vec<Completion> {
        let mut state = self.state.lock().expect("internal mutex must work");
        state.closed = true;
        state.in_flight.drain().map(|(_, completion)| completion).collect()
    }

    /// The number of pending calls.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("internal mutex must work")
            .in_flight
            .len()
    }

    /// Whether the connection this registry serves has ended.
    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("internal mutex must work").closed
    }
}

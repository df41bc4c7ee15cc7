use std::{
    future::Future,
    sync::{Arc, Mutex},
    thread::ThreadId,
};

use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};

/// A single-threaded tokio runtime on its own thread.
///
/// Every connection and listener is driven here. Nothing that might block runs on this
/// thread: handler code and continuations are handed to the runtime's blocking pool with
/// [`EventLoop::defer`].
///
/// Use [`EventLoop::shared`] for the process-wide loop, or [`EventLoop::start`] for an
/// independent one. An independent loop stops when its last reference is dropped.
#[derive(Debug)]
pub struct EventLoop {
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

static SHARED: Mutex<Option<Arc<EventLoop>>> = Mutex::new(None);

impl EventLoop {
    /// The process-wide event loop, started on first use.
    pub fn shared() -> std::io::Result<Arc<Self>> {
        let mut shared = SHARED.lock().expect("internal mutex must work");
        if let Some(event_loop) = shared.as_ref() {
            return Ok(event_loop.clone());
        }
        let event_loop = Arc::new(Self::start_named("callsocket-event-loop")?);
        *shared = Some(event_loop.clone());
        Ok(event_loop)
    }

    /// Start an independent event loop.
    pub fn start() -> std::io::Result<Self> {
        Self::start_named("callsocket-event-loop")
    }

    /// Start an independent event loop whose thread has the given name.
    pub fn start_named(name: &str) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("{name}-worker"))
            .build()?;
        let handle = runtime.handle().clone();
        let (shutdown, shutdown_signal) = oneshot::channel::<()>();
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // a dropped sender stops the loop too
                let _ = runtime.block_on(shutdown_signal);
                log::debug!("event loop stopping");
                runtime.shutdown_background();
            })?;
        let thread_id = thread.thread().id();
        log::debug!("started event loop {name}");
        Ok(Self {
            handle,
            thread_id,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    /// The runtime handle for this loop.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// True when called from the thread driving this loop.
    pub fn is_current_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Run a future on the loop.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a closure off the loop, on the blocking worker pool.
    pub fn defer<F, R>(&self, work: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.spawn_blocking(work)
    }

    /// Block the calling thread until `future` completes on the loop.
    ///
    /// On the loop's own thread this fails with [`crate::Error::WouldDeadlock`]: the loop
    /// would be waiting on itself. It panics if called from inside some other async context;
    /// call it from plain threads or from [`EventLoop::defer`] work.
    pub fn block_on<F: Future>(&self, future: F) -> crate::Result<F::Output> {
        if self.is_current_thread() {
            return Err(crate::Error::WouldDeadlock);
        }
        Ok(self.handle.block_on(future))
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if self.is_current_thread() {
                // the loop thread cannot join itself; it exits once this task returns
                return;
            }
            if thread.join().is_err() {
                log::error!("event loop thread panicked");
            }
        }
    }
}

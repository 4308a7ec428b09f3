//! Development host with a single privileged dispatch thread.
//!
//! [`DevHost`] owns the host application state on a dedicated thread and
//! invokes registered handlers strictly in the order their events were
//! raised, each to completion before the next. That is the dispatch
//! guarantee bridges rely on.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
};

use hostlink_bridge::spi::dispatch::{
    DispatchError, EventDispatchCapability, EventHandle, HostEventHandler,
};
use tracing::{debug, trace};

enum HostRequest {
    Invoke(usize),
    Stop,
}

struct Registry<S> {
    handlers: Mutex<Vec<Arc<dyn HostEventHandler<S>>>>,
    closed: AtomicBool,
}

/// In-process host application: a privileged thread owning state `S`.
pub struct DevHost<S> {
    registry: Arc<Registry<S>>,
    requests: Sender<HostRequest>,
    thread: Option<JoinHandle<S>>,
}

/// Cloneable registration facade handed out by [`DevHost::dispatcher`].
///
/// Stays valid after the host shuts down; registration and raising then fail
/// with [`DispatchError::Closed`].
pub struct DevDispatcher<S> {
    registry: Arc<Registry<S>>,
    requests: Sender<HostRequest>,
}

struct DevEventHandle<S> {
    id: usize,
    registry: Arc<Registry<S>>,
    requests: Sender<HostRequest>,
}

impl<S> std::fmt::Debug for DevEventHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevEventHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<S> DevHost<S>
where
    S: Send + 'static,
{
    /// Start the dispatch thread with the given application state.
    pub fn start(state: S) -> Self {
        let (requests, receiver) = mpsc::channel();
        let registry = Arc::new(Registry {
            handlers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let loop_registry = Arc::clone(&registry);
        let thread = thread::spawn(move || run_dispatch_loop(state, receiver, loop_registry));
        Self {
            registry,
            requests,
            thread: Some(thread),
        }
    }

    /// Obtain a registration facade for bridge construction.
    pub fn dispatcher(&self) -> DevDispatcher<S> {
        DevDispatcher {
            registry: Arc::clone(&self.registry),
            requests: self.requests.clone(),
        }
    }

    /// Stop the dispatch thread and return the final application state.
    ///
    /// Requests already queued before the shutdown are still served.
    pub fn shutdown(mut self) -> S {
        self.registry.closed.store(true, Ordering::SeqCst);
        let _ = self.requests.send(HostRequest::Stop);
        let thread = self.thread.take().expect("dispatch thread running");
        thread.join().expect("dispatch thread panicked")
    }
}

impl<S> Drop for DevHost<S> {
    fn drop(&mut self) {
        self.registry.closed.store(true, Ordering::SeqCst);
        let _ = self.requests.send(HostRequest::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl<S> Clone for DevDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            requests: self.requests.clone(),
        }
    }
}

impl<S> EventDispatchCapability<S> for DevDispatcher<S>
where
    S: Send + 'static,
{
    type Error = DispatchError;

    fn register(
        &self,
        handler: Arc<dyn HostEventHandler<S>>,
    ) -> Result<Box<dyn EventHandle>, Self::Error> {
        if self.registry.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }
        let mut handlers = self.registry.handlers.lock().expect("handler registry lock");
        let id = handlers.len();
        debug!("registered handler {} as event {id}", handler.name());
        handlers.push(handler);
        Ok(Box::new(DevEventHandle {
            id,
            registry: Arc::clone(&self.registry),
            requests: self.requests.clone(),
        }))
    }
}

impl<S> EventHandle for DevEventHandle<S>
where
    S: Send + 'static,
{
    fn raise(&self) -> Result<(), DispatchError> {
        if self.registry.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::Closed);
        }
        self.requests
            .send(HostRequest::Invoke(self.id))
            .map_err(|_| DispatchError::Closed)
    }
}

fn run_dispatch_loop<S>(
    mut state: S,
    receiver: Receiver<HostRequest>,
    registry: Arc<Registry<S>>,
) -> S {
    while let Ok(request) = receiver.recv() {
        match request {
            HostRequest::Stop => break,
            HostRequest::Invoke(id) => {
                let handler = registry
                    .handlers
                    .lock()
                    .expect("handler registry lock")
                    .get(id)
                    .cloned();
                match handler {
                    Some(handler) => {
                        trace!("dispatching event {id} to {}", handler.name());
                        handler.execute(&mut state);
                    }
                    None => debug!("raise for unknown handler id {id}"),
                }
            }
        }
    }
    state
}

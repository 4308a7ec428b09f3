//! Event dispatch SPI contracts.

use std::sync::Arc;

use thiserror::Error;

/// Errors returned by host dispatch primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The host dispatch loop has shut down.
    #[error("host dispatcher is closed")]
    Closed,
    /// The host refused the request.
    #[error("host rejected the request: {0}")]
    Rejected(String),
}

/// Callback contract invoked by the host on its privileged thread.
///
/// The host guarantees that `execute` runs to completion on the host thread
/// before any further dispatch interaction takes place.
pub trait HostEventHandler<S>: Send + Sync {
    /// Execute the handler with exclusive access to host application state.
    fn execute(&self, state: &mut S);

    /// Display name reported to the host for diagnostics.
    fn name(&self) -> &str;
}

/// Handle to a registered handler.
pub trait EventHandle: Send + Sync + std::fmt::Debug {
    /// Ask the host to invoke the registered handler at its next safe
    /// opportunity. Scheduling only; the host controls invocation timing.
    fn raise(&self) -> Result<(), DispatchError>;
}

/// Capability responsible for host event registration.
pub trait EventDispatchCapability<S> {
    /// Host-specific error type.
    type Error: Into<DispatchError>;

    /// Register a handler, obtaining a handle that can later be raised.
    fn register(
        &self,
        handler: Arc<dyn HostEventHandler<S>>,
    ) -> Result<Box<dyn EventHandle>, Self::Error>;
}

impl<S, T> EventDispatchCapability<S> for Arc<T>
where
    T: EventDispatchCapability<S>,
{
    type Error = T::Error;

    fn register(
        &self,
        handler: Arc<dyn HostEventHandler<S>>,
    ) -> Result<Box<dyn EventHandle>, Self::Error> {
        self.as_ref().register(handler)
    }
}

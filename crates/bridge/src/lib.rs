use thiserror::Error;

use crate::spi::dispatch::DispatchError;

pub mod bridge;
pub mod outcome;
pub mod spi;

pub use bridge::HostBridge;
pub use outcome::{Outcome, WorkPanic};

/// Errors surfaced synchronously by bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host refused to register the callback handler.
    #[error("handler registration rejected")]
    Register(#[source] DispatchError),
    /// The host refused to schedule the registered callback.
    #[error("event raise rejected")]
    Raise(#[source] DispatchError),
}

//! Resolve-once completion state and the future over it.

use std::{
    any::Any,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;
use thiserror::Error;

/// Failure captured from a work item that panicked on the host thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("work item panicked: {message}")]
pub struct WorkPanic {
    message: String,
}

impl WorkPanic {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "opaque panic payload".to_string()
        };
        Self { message }
    }

    /// Panic message carried by the payload, when one was recoverable.
    pub fn message(&self) -> &str {
        &self.message
    }
}

enum Slot<T> {
    Pending(Option<Waker>),
    Ready(Result<T, WorkPanic>),
    Taken,
}

/// Completion state shared between the caller and the host callback.
pub(crate) struct OutcomeState<T> {
    slot: Mutex<Slot<T>>,
}

impl<T> OutcomeState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Pending(None)),
        })
    }

    /// Record the outcome unless one is already recorded. First write wins;
    /// later writes are discarded and return `false`.
    pub(crate) fn resolve(&self, outcome: Result<T, WorkPanic>) -> bool {
        let mut slot = self.slot.lock();
        match &mut *slot {
            Slot::Pending(waker) => {
                let waker = waker.take();
                *slot = Slot::Ready(outcome);
                drop(slot);
                if let Some(waker) = waker {
                    waker.wake();
                }
                true
            }
            Slot::Ready(_) | Slot::Taken => false,
        }
    }
}

/// Future half of a submitted work item. Yields the work's result, or the
/// captured [`WorkPanic`], once the host has invoked the callback.
pub struct Outcome<T> {
    state: Arc<OutcomeState<T>>,
}

impl<T> Outcome<T> {
    pub(crate) fn new(state: Arc<OutcomeState<T>>) -> Self {
        Self { state }
    }
}

impl<T> std::fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome").finish_non_exhaustive()
    }
}

impl<T> Future for Outcome<T> {
    type Output = Result<T, WorkPanic>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.state.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(outcome) => Poll::Ready(outcome),
            Slot::Pending(_) => {
                *slot = Slot::Pending(Some(cx.waker().clone()));
                Poll::Pending
            }
            Slot::Taken => panic!("outcome polled after completion"),
        }
    }
}

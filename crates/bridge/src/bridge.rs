//! Future-based adapter over a host application's external event mechanism.
//!
//! A [`HostBridge`] registers a callback with the host's event dispatcher at
//! construction time. Each call to [`HostBridge::run`] stores a work item in
//! the bridge's single pending slot, raises the host event, and returns an
//! [`Outcome`] future. When the host invokes the callback on its privileged
//! thread, the work item runs against host state and the outcome resolves
//! with its result, or with the captured panic.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    BridgeError,
    outcome::{Outcome, OutcomeState, WorkPanic},
    spi::dispatch::{EventDispatchCapability, EventHandle, HostEventHandler},
};

type WorkFn<S, T> = Box<dyn FnOnce(&mut S) -> T + Send>;

struct Pending<S, T> {
    work: WorkFn<S, T>,
    state: Arc<OutcomeState<T>>,
}

/// Handler registered with the host. Owns the single pending-work slot.
struct BridgeHandler<S, T> {
    name: String,
    pending: Mutex<Option<Pending<S, T>>>,
}

impl<S, T> HostEventHandler<S> for BridgeHandler<S, T>
where
    S: 'static,
    T: Send + 'static,
{
    fn execute(&self, state: &mut S) {
        let Some(pending) = self.pending.lock().take() else {
            // Tolerated: the host may invoke us again for an already-served
            // request, and a refused raise clears the slot.
            debug!("event {} fired with no pending work item", self.name);
            return;
        };

        let Pending { work, state: outcome } = pending;
        let resolved = match panic::catch_unwind(AssertUnwindSafe(|| work(state))) {
            Ok(value) => outcome.resolve(Ok(value)),
            Err(payload) => outcome.resolve(Err(WorkPanic::from_payload(payload))),
        };
        if !resolved {
            debug!("outcome for {} was already resolved", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Adapter that lets callers await work executed on the host's privileged
/// thread.
pub struct HostBridge<S, T> {
    handler: Arc<BridgeHandler<S, T>>,
    event: Box<dyn EventHandle>,
}

impl<S, T> std::fmt::Debug for HostBridge<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBridge")
            .field("name", &self.handler.name)
            .finish_non_exhaustive()
    }
}

impl<S, T> HostBridge<S, T>
where
    S: 'static,
    T: Send + 'static,
{
    /// Register a callback handler with the host dispatcher under the given
    /// display name. No work is scheduled until [`HostBridge::run`] is
    /// called.
    pub fn register<D>(dispatcher: &D, name: impl Into<String>) -> Result<Self, BridgeError>
    where
        D: EventDispatchCapability<S>,
    {
        let handler = Arc::new(BridgeHandler {
            name: name.into(),
            pending: Mutex::new(None),
        });
        let dyn_handler: Arc<dyn HostEventHandler<S>> = handler.clone();
        let event = dispatcher
            .register(dyn_handler)
            .map_err(|err| BridgeError::Register(err.into()))?;
        Ok(Self { handler, event })
    }

    /// Submit a work item for execution on the host thread and return the
    /// future half of its outcome.
    ///
    /// The bridge holds a single pending slot: calling `run` again before the
    /// host has invoked the callback replaces the stored work item, and the
    /// superseded outcome is never resolved. Raising is fire-and-forget; the
    /// host alone decides when the callback actually runs. If the host
    /// refuses the raise, the slot is cleared and the error is returned
    /// synchronously.
    pub fn run<F>(&self, work: F) -> Result<Outcome<T>, BridgeError>
    where
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        let state = OutcomeState::new();
        let outcome = Outcome::new(Arc::clone(&state));
        {
            let mut pending = self.handler.pending.lock();
            if pending.is_some() {
                debug!("replacing pending work item for {}", self.handler.name);
            }
            *pending = Some(Pending {
                work: Box::new(work),
                state,
            });
        }

        trace!("raising external event for {}", self.handler.name);
        if let Err(err) = self.event.raise() {
            self.handler.pending.lock().take();
            return Err(BridgeError::Raise(err));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        future::Future,
        pin::Pin,
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicBool, AtomicU32, Ordering},
        },
        task::{Context, Poll},
    };

    use futures::task::noop_waker;

    use crate::spi::dispatch::DispatchError;

    struct HostShared {
        handler: StdMutex<Option<Arc<dyn HostEventHandler<u64>>>>,
        raises: AtomicU32,
        accept: AtomicBool,
    }

    struct HostDouble {
        shared: Arc<HostShared>,
    }

    struct DoubleHandle {
        shared: Arc<HostShared>,
    }

    impl std::fmt::Debug for DoubleHandle {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("DoubleHandle").finish_non_exhaustive()
        }
    }

    impl HostDouble {
        fn new() -> Self {
            Self {
                shared: Arc::new(HostShared {
                    handler: StdMutex::new(None),
                    raises: AtomicU32::new(0),
                    accept: AtomicBool::new(true),
                }),
            }
        }

        fn refuse_raises(&self) {
            self.shared.accept.store(false, Ordering::SeqCst);
        }

        fn raises(&self) -> u32 {
            self.shared.raises.load(Ordering::SeqCst)
        }

        fn fire(&self, state: &mut u64) {
            let handler = self
                .shared
                .handler
                .lock()
                .expect("handler slot")
                .clone()
                .expect("handler registered");
            handler.execute(state);
        }
    }

    impl EventHandle for DoubleHandle {
        fn raise(&self) -> Result<(), DispatchError> {
            if !self.shared.accept.load(Ordering::SeqCst) {
                return Err(DispatchError::Closed);
            }
            self.shared.raises.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl EventDispatchCapability<u64> for HostDouble {
        type Error = DispatchError;

        fn register(
            &self,
            handler: Arc<dyn HostEventHandler<u64>>,
        ) -> Result<Box<dyn EventHandle>, Self::Error> {
            *self.shared.handler.lock().expect("handler slot") = Some(handler);
            Ok(Box::new(DoubleHandle {
                shared: Arc::clone(&self.shared),
            }))
        }
    }

    struct RefusingHost;

    impl EventDispatchCapability<u64> for RefusingHost {
        type Error = DispatchError;

        fn register(
            &self,
            _handler: Arc<dyn HostEventHandler<u64>>,
        ) -> Result<Box<dyn EventHandle>, Self::Error> {
            Err(DispatchError::Rejected("no handler slots left".to_string()))
        }
    }

    fn poll_once<T>(outcome: &mut Outcome<T>) -> Poll<Result<T, WorkPanic>> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(outcome).poll(&mut cx)
    }

    #[tokio::test]
    async fn run_resolves_with_work_result() {
        let host = HostDouble::new();
        let bridge = HostBridge::register(&host, "counter").expect("register bridge");

        let outcome = bridge
            .run(|state| {
                *state += 1;
                *state
            })
            .expect("run work");
        assert_eq!(host.raises(), 1);

        let mut state = 41u64;
        host.fire(&mut state);

        assert_eq!(outcome.await.expect("work result"), 42);
        assert_eq!(state, 42);
    }

    #[tokio::test]
    async fn panicking_work_resolves_exceptionally() {
        let host = HostDouble::new();
        let bridge = HostBridge::register(&host, "faulty").expect("register bridge");

        let outcome = bridge
            .run(|_state| -> u64 { panic!("x") })
            .expect("run work");

        // The handler entry point must absorb the unwind itself.
        let mut state = 0u64;
        host.fire(&mut state);

        let failure = outcome.await.expect_err("work must fail");
        assert_eq!(failure.message(), "x");
    }

    #[test]
    fn second_run_overwrites_pending_work() {
        let host = HostDouble::new();
        let bridge = HostBridge::register(&host, "latest-wins").expect("register bridge");

        let mut first = bridge.run(|state| *state + 1).expect("run first");
        let mut second = bridge.run(|state| *state + 2).expect("run second");
        assert_eq!(host.raises(), 2);

        let mut state = 10u64;
        host.fire(&mut state);
        host.fire(&mut state);

        // Only the replacement executed; the superseded outcome stays pending.
        assert_eq!(poll_once(&mut second), Poll::Ready(Ok(12)));
        assert!(poll_once(&mut first).is_pending());
        assert_eq!(state, 10);
    }

    #[tokio::test]
    async fn duplicate_host_invocation_is_tolerated() {
        let host = HostDouble::new();
        let bridge = HostBridge::register(&host, "idempotent").expect("register bridge");

        let outcome = bridge.run(|state| *state).expect("run work");

        let mut state = 5u64;
        host.fire(&mut state);
        host.fire(&mut state);

        assert_eq!(outcome.await.expect("work result"), 5);
    }

    #[test]
    fn refused_raise_clears_the_pending_slot() {
        let host = HostDouble::new();
        let bridge = HostBridge::register(&host, "refused").expect("register bridge");
        host.refuse_raises();

        let err = bridge
            .run(|state| {
                *state += 1;
                *state
            })
            .expect_err("raise must fail");
        assert!(matches!(err, BridgeError::Raise(DispatchError::Closed)));

        // A later host invocation finds no work to run.
        let mut state = 0u64;
        host.fire(&mut state);
        assert_eq!(state, 0);
    }

    #[test]
    fn rejected_registration_is_surfaced() {
        let err = HostBridge::<u64, u64>::register(&RefusingHost, "unwanted")
            .expect_err("registration must fail");
        assert!(matches!(
            err,
            BridgeError::Register(DispatchError::Rejected(_))
        ));
    }
}

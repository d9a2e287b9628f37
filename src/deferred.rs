//! Implements the deferred value

use crate::{
    error::WaitError,
    settle::{Producer, Rejecter, Resolver},
};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    mem,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        Arc,
    },
    time::{Duration, Instant},
};

/// A queued success continuation, returning the replacement value if any
type SuccessFn<T> = Box<dyn FnOnce(&T) -> Option<T> + Send>;
/// A queued failure continuation
type FailureFn<E> = Box<dyn FnOnce(&E) + Send>;
/// A queued terminal continuation
type TerminalFn = Box<dyn FnOnce() + Send>;

/// The next instance id
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// The observable state of a deferred value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeferredState {
    /// Not settled yet
    Pending,
    /// Settled with a success value
    Fulfilled,
    /// Settled with a failure value
    Rejected,
}

/// The return value of a success continuation
///
/// Returning `()` passes the current value through to the next continuation; returning `Some(value)` replaces it.
pub trait Forward<T> {
    /// The replacement value, if any
    fn forward(self) -> Option<T>;
}
impl<T> Forward<T> for () {
    fn forward(self) -> Option<T> {
        None
    }
}
impl<T> Forward<T> for Option<T> {
    fn forward(self) -> Option<T> {
        self
    }
}

/// The settlement slot
///
/// The outcome of a settled slot is `None` only while a drain has it checked out.
enum Slot<T, E> {
    Pending,
    Fulfilled(Option<T>),
    Rejected(Option<E>),
}
impl<T, E> Slot<T, E> {
    /// The state of the slot
    fn state(&self) -> DeferredState {
        match self {
            Self::Pending => DeferredState::Pending,
            Self::Fulfilled(_) => DeferredState::Fulfilled,
            Self::Rejected(_) => DeferredState::Rejected,
        }
    }

    /// Checks the outcome out, or returns `None` if the slot is pending or already checked out
    fn lend(&mut self) -> Option<Result<T, E>> {
        match self {
            Self::Pending => None,
            Self::Fulfilled(value) => value.take().map(Ok),
            Self::Rejected(error) => error.take().map(Err),
        }
    }
    /// Checks an outcome back in
    fn restore(&mut self, outcome: Result<T, E>) {
        *self = match outcome {
            Ok(value) => Self::Fulfilled(Some(value)),
            Err(error) => Self::Rejected(Some(error)),
        };
    }

    /// A copy of the outcome, if settled and not checked out
    fn peek(&self) -> Option<Result<T, E>>
    where
        T: Clone,
        E: Clone,
    {
        match self {
            Self::Pending => None,
            Self::Fulfilled(value) => value.clone().map(Ok),
            Self::Rejected(error) => error.clone().map(Err),
        }
    }
}

/// The guarded part of a deferred value
struct Inner<T, E> {
    /// The outcome
    slot: Slot<T, E>,
    /// Success continuations in registration order
    on_success: VecDeque<SuccessFn<T>>,
    /// Failure continuations in registration order
    on_failure: VecDeque<FailureFn<E>>,
    /// Terminal continuations in registration order
    on_settled: VecDeque<TerminalFn>,
    /// Whether all producers are gone while pending
    abandoned: bool,
}

/// The state shared between the handles and the producers of a deferred value
pub(crate) struct Shared<T, E> {
    /// The id used to correlate log events
    id: u64,
    /// The guarded state
    inner: Mutex<Inner<T, E>>,
    /// Signalled whenever an outcome is checked in or the value is abandoned
    signal: Condvar,
}
impl<T, E> Shared<T, E> {
    /// Creates a new pending state
    fn new() -> Self {
        let inner = Inner {
            slot: Slot::Pending,
            on_success: VecDeque::new(),
            on_failure: VecDeque::new(),
            on_settled: VecDeque::new(),
            abandoned: false,
        };
        Self { id: NEXT_ID.fetch_add(1, Relaxed), inner: Mutex::new(inner), signal: Condvar::new() }
    }

    /// Fulfills a pending value; returns whether this call settled it
    pub(crate) fn fulfill(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Pending) {
            tracing::trace!(id = self.id, "ignoring resolution of a settled deferred value");
            return false;
        }

        // Failure continuations can no longer run
        inner.slot = Slot::Fulfilled(Some(value));
        let discarded = mem::take(&mut inner.on_failure);
        tracing::debug!(id = self.id, "deferred value fulfilled");
        self.drain(inner);

        drop(discarded);
        true
    }
    /// Rejects a pending value; returns whether this call settled it
    pub(crate) fn reject(&self, error: E) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Pending) {
            tracing::trace!(id = self.id, "ignoring rejection of a settled deferred value");
            return false;
        }

        // Success continuations can no longer run
        inner.slot = Slot::Rejected(Some(error));
        let discarded = mem::take(&mut inner.on_success);
        tracing::debug!(id = self.id, discarded = discarded.len(), "deferred value rejected");
        self.drain(inner);

        drop(discarded);
        true
    }
    /// Marks a pending value as abandoned and drops its continuations, which can never run
    pub(crate) fn abandon(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Pending) {
            return;
        }

        // Take the continuations out, they may own producers of other deferred values
        inner.abandoned = true;
        let continuations = (
            mem::take(&mut inner.on_success),
            mem::take(&mut inner.on_failure),
            mem::take(&mut inner.on_settled),
        );
        drop(inner);
        tracing::debug!(id = self.id, "deferred value abandoned by its producers");

        self.signal.notify_all();
        drop(continuations);
    }

    /// Runs the queued continuations of a settled value
    ///
    /// The outcome is checked out for the duration of the drain and every continuation runs with the lock released.
    /// Continuations queued meanwhile (also from within a continuation) are picked up by the same drain, so only one
    /// drain runs at a time and registration order is kept.
    fn drain(&self, mut inner: MutexGuard<'_, Inner<T, E>>) {
        // Either pending or another call is draining already
        let Some(mut outcome) = inner.slot.lend() else {
            return;
        };

        loop {
            match &mut outcome {
                Ok(value) => {
                    if let Some(handler) = inner.on_success.pop_front() {
                        let next = MutexGuard::unlocked(&mut inner, || handler(value));
                        if let Some(next) = next {
                            *value = next;
                        }
                        continue;
                    }
                }
                Err(error) => {
                    if let Some(handler) = inner.on_failure.pop_front() {
                        MutexGuard::unlocked(&mut inner, || handler(error));
                        continue;
                    }
                }
            }

            // Terminal continuations run last
            match inner.on_settled.pop_front() {
                Some(handler) => MutexGuard::unlocked(&mut inner, handler),
                None => break,
            }
        }

        // Check the outcome back in and wake waiting threads
        inner.slot.restore(outcome);
        drop(inner);
        self.signal.notify_all();
    }
}
impl<T, E> Debug for Shared<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Shared")
            .field("id", &self.id)
            .field("state", &inner.slot.state())
            .field("outcome", &"<opaque>")
            .field("abandoned", &inner.abandoned)
            .finish()
    }
}

/// A single-assignment value that is eventually fulfilled or rejected
///
/// A `Deferred` is a cheap handle; clones refer to the same value. Continuations attached via [`Deferred::then`],
/// [`Deferred::catch`] and [`Deferred::finally`] run synchronously, either within the call that settles the value or,
/// if it is settled already, within the attaching call.
///
/// # Panics
/// A panicking continuation unwinds through the call that ran it and leaves the outcome checked out; the value then
/// stays settled, but its remaining continuations never run and [`Deferred::wait`] blocks until it times out.
///
/// Calling [`Deferred::wait`] from within one of the value's own continuations blocks forever.
pub struct Deferred<T, E> {
    /// The shared state
    shared: Arc<Shared<T, E>>,
}
impl<T, E> Deferred<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Creates a new pending deferred value and synchronously runs `executor` with its settlement capabilities
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>),
    {
        let (this, resolver, rejecter) = Self::pending();
        tracing::trace!(id = this.shared.id, "running executor");
        executor(resolver, rejecter);
        this
    }
    /// Like [`Deferred::new`], but an `Err` returned by `executor` rejects the value
    ///
    /// The error is ignored if the executor settled the value before failing.
    pub fn try_new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let (this, resolver, rejecter) = Self::pending();
        let fallback = rejecter.clone();
        tracing::trace!(id = this.shared.id, "running fallible executor");
        if let Err(error) = executor(resolver, rejecter) {
            tracing::debug!(id = this.shared.id, "executor failed");
            fallback.reject(error);
        }
        this
    }
    /// Creates a new pending deferred value together with its settlement capabilities
    pub fn pending() -> (Self, Resolver<T, E>, Rejecter<T, E>) {
        let shared = Arc::new(Shared::new());
        let producer = Arc::new(Producer::new(shared.clone()));
        (Self { shared }, Resolver::new(producer.clone()), Rejecter::new(producer))
    }
    /// Creates a deferred value that is already fulfilled with `value`
    pub fn resolved(value: T) -> Self {
        Self::new(|resolver, _| {
            resolver.resolve(value);
        })
    }
    /// Creates a deferred value that is already rejected with `error`
    pub fn rejected(error: E) -> Self {
        Self::new(|_, rejecter| {
            rejecter.reject(error);
        })
    }

    /// The current state
    pub fn state(&self) -> DeferredState {
        self.shared.inner.lock().slot.state()
    }
    /// Whether the value is not settled yet
    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }
    /// Whether all settlement capabilities were dropped before the value was settled
    pub fn is_abandoned(&self) -> bool {
        self.shared.inner.lock().abandoned
    }

    /// Attaches a success continuation
    ///
    /// The continuation receives the current value; if it returns `Some(value)`, that value replaces the current one
    /// for all later continuations (see [`Forward`]). It runs immediately if the value is fulfilled already and never
    /// if the value is or becomes rejected.
    ///
    /// Attached from within a continuation of the same value, it is queued behind the continuations that are still
    /// pending and runs after the current one returns, receiving whatever value they forward.
    pub fn then<F, R>(&self, handler: F) -> &Self
    where
        F: FnOnce(&T) -> R + Send + 'static,
        R: Forward<T>,
    {
        let mut inner = self.shared.inner.lock();
        if inner.slot.state() == DeferredState::Rejected {
            tracing::trace!(id = self.shared.id, "dropping success continuation of a rejected deferred value");
            return self;
        }
        if inner.abandoned {
            tracing::trace!(id = self.shared.id, "dropping success continuation of an abandoned deferred value");
            return self;
        }

        inner.on_success.push_back(Box::new(move |value: &T| handler(value).forward()));
        self.shared.drain(inner);
        self
    }
    /// Attaches a failure continuation
    ///
    /// It runs immediately if the value is rejected already and never if the value is or becomes fulfilled.
    pub fn catch<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.slot.state() == DeferredState::Fulfilled {
            tracing::trace!(id = self.shared.id, "dropping failure continuation of a fulfilled deferred value");
            return self;
        }
        if inner.abandoned {
            tracing::trace!(id = self.shared.id, "dropping failure continuation of an abandoned deferred value");
            return self;
        }

        inner.on_failure.push_back(Box::new(handler));
        self.shared.drain(inner);
        self
    }
    /// Attaches a terminal continuation that runs once the value is settled, whatever the outcome
    ///
    /// It runs after the success or failure continuations attached before it, or immediately if the value is settled
    /// already.
    pub fn finally<F>(&self, handler: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.abandoned {
            tracing::trace!(id = self.shared.id, "dropping terminal continuation of an abandoned deferred value");
            return self;
        }

        inner.on_settled.push_back(Box::new(handler));
        self.shared.drain(inner);
        self
    }

    /// Creates a new deferred value that is fulfilled with `f(value)` once this one is fulfilled, or rejected with
    /// the same error once this one is rejected
    ///
    /// Unlike [`Deferred::then`], this leaves the value of `self` untouched.
    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Send + 'static,
        E: Clone,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        Deferred::new(|resolver, rejecter| {
            self.then(move |value| {
                resolver.resolve(f(value));
            });
            self.catch(move |error| {
                rejecter.reject(error.clone());
            });
        })
    }
    /// Creates a new deferred value that adopts the outcome of `f(value)` once this one is fulfilled, or is rejected
    /// with the same error once this one is rejected
    pub fn and_then<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        E: Clone,
        F: FnOnce(&T) -> Deferred<U, E> + Send + 'static,
    {
        Deferred::new(|resolver, rejecter| {
            let inner_rejecter = rejecter.clone();
            self.then(move |value| {
                let next = f(value);
                next.then(move |value| {
                    resolver.resolve(value.clone());
                });
                next.catch(move |error| {
                    inner_rejecter.reject(error.clone());
                });
            });
            self.catch(move |error| {
                rejecter.reject(error.clone());
            });
        })
    }

    /// Blocks until the value is settled and returns a copy of the outcome
    pub fn wait(&self) -> Result<Result<T, E>, WaitError>
    where
        T: Clone,
        E: Clone,
    {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.slot.peek() {
                return Ok(outcome);
            }
            if inner.abandoned {
                return Err(WaitError::Abandoned);
            }
            self.shared.signal.wait(&mut inner);
        }
    }
    /// Blocks until the value is settled or the timeout is reached and returns a copy of the outcome
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Result<T, E>, WaitError>
    where
        T: Clone,
        E: Clone,
    {
        // Compute an absolute deadline from the timeout; a deadline beyond the clock's range is no deadline at all
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.wait();
        };

        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.slot.peek() {
                return Ok(outcome);
            }
            if inner.abandoned {
                return Err(WaitError::Abandoned);
            }
            if self.shared.signal.wait_until(&mut inner, deadline).timed_out() {
                return inner.slot.peek().ok_or(WaitError::Timeout(timeout));
            }
        }
    }
}
impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}
impl<T, E> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("shared", &self.shared).finish()
    }
}

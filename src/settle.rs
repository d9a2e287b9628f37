//! Implements the settlement capabilities

use crate::deferred::Shared;
use std::{
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// The producer side of a deferred value
///
/// Shared by all resolvers and rejecters of one instance; once the last of them is gone, a still pending deferred
/// value is marked as abandoned.
pub(crate) struct Producer<T, E> {
    /// The underlying deferred value
    shared: Arc<Shared<T, E>>,
}
impl<T, E> Producer<T, E> {
    /// Creates a new producer
    pub(crate) const fn new(shared: Arc<Shared<T, E>>) -> Self {
        Self { shared }
    }
}
impl<T, E> Drop for Producer<T, E> {
    fn drop(&mut self) {
        self.shared.abandon();
    }
}

/// The capability to settle a deferred value with a success value
pub struct Resolver<T, E> {
    /// The producer side
    producer: Arc<Producer<T, E>>,
}
impl<T, E> Resolver<T, E> {
    /// Creates a new resolver
    pub(crate) const fn new(producer: Arc<Producer<T, E>>) -> Self {
        Self { producer }
    }

    /// Fulfills the deferred value with `value` and runs its pending continuations
    ///
    /// Returns `true` if this call settled the deferred value, or `false` if it had already been settled (in which
    /// case `value` is dropped).
    pub fn resolve(&self, value: T) -> bool {
        self.producer.shared.fulfill(value)
    }
}
impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self { producer: self.producer.clone() }
    }
}
impl<T, E> Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("deferred", &self.producer.shared).finish()
    }
}

/// The capability to settle a deferred value with a failure value
pub struct Rejecter<T, E> {
    /// The producer side
    producer: Arc<Producer<T, E>>,
}
impl<T, E> Rejecter<T, E> {
    /// Creates a new rejecter
    pub(crate) const fn new(producer: Arc<Producer<T, E>>) -> Self {
        Self { producer }
    }

    /// Rejects the deferred value with `error` and runs its pending continuations
    ///
    /// Returns `true` if this call settled the deferred value, or `false` if it had already been settled (in which
    /// case `error` is dropped).
    pub fn reject(&self, error: E) -> bool {
        self.producer.shared.reject(error)
    }
}
impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self { producer: self.producer.clone() }
    }
}
impl<T, E> Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter").field("deferred", &self.producer.shared).finish()
    }
}

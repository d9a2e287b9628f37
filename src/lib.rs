//! This library provides a single-assignment deferred value: it starts pending, is settled exactly once with either
//! a success or a failure value, and runs the continuations attached to it once it is settled, regardless of whether
//! they were attached before or after settlement.
//!
//! The value performs no I/O and owns no threads; whoever holds its [`Resolver`] or [`Rejecter`] settles it, from any
//! thread. Continuations run synchronously within the settling call or, if the value is settled already, within the
//! attaching call.
//!
//! # Example
//! ```
//! use deferred_value::Deferred;
//! use std::thread;
//!
//! let deferred = Deferred::<String, String>::new(|resolver, _rejecter| {
//!     thread::spawn(move || resolver.resolve("foo".to_string()));
//! });
//! deferred.then(|name| Some(format!("hello {name}")));
//!
//! assert_eq!(deferred.wait(), Ok(Ok("hello foo".to_string())));
//! ```

mod deferred;
mod error;
mod settle;

pub use crate::{
    deferred::{Deferred, DeferredState, Forward},
    error::WaitError,
    settle::{Rejecter, Resolver},
};

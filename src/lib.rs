//! A small promise primitive with synchronous resolution.
//!
//! A producer calls [`defer`] to get a [`Deferred`], hands
//! [`Deferred::promise`] to consumers, and later calls
//! [`Deferred::resolve`] or [`Deferred::reject`]. Consumers chain
//! continuations with [`Promise::then`], [`Promise::catch`] and friends.
//!
//! Unlike Promises/A+, continuations are never scheduled for a later turn:
//! they run in the stack of whichever call made them runnable. A handler
//! registered on a settled promise runs before `then` returns, and
//! `resolve`/`reject` return only after the whole downstream chain has been
//! driven.
//!
//! ```
//! use oath::{defer, State};
//!
//! let deferred = defer::<i32, String>();
//! let result = deferred.promise().then(|x| x * 2).then(|x| x + 1);
//! deferred.resolve(10);
//! assert_eq!(result.state(), State::Resolved(21));
//! ```
//!
//! Promises can also be awaited; see the [`Future`](std::future::Future)
//! impl on [`Promise`].
//!
//! Known limitations: a panicking handler is not turned into a rejection,
//! and a handler that returns its own successor leaves that cycle waiting
//! forever.

mod deferred;
mod promise;

pub use deferred::Deferred;
pub use promise::{Outcome, Promise, State};

/// Why awaiting a promise did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error<E> {
    #[error("promise was rejected: {0:?}")]
    Rejected(E),
    #[error("deferred was dropped before the promise settled")]
    Abandoned,
}

/// Creates a waiting promise and the deferred that settles it.
pub fn defer<T, E>() -> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    Deferred::new()
}

use log::trace;

use crate::promise::Promise;

/// The settling half of a promise. Every promise other than the
/// pre-settled ones has exactly one, either inside a [`Deferred`] or inside
/// the continuation that feeds it.
///
/// Dropping it unsettled abandons the promise.
#[derive(Debug)]
pub(crate) struct Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    promise: Promise<T, E>,
    done: bool,
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub(crate) fn pair() -> (Promise<T, E>, Self) {
        let promise = Promise::waiting();
        (promise.clone(), Self { promise, done: false })
    }

    pub(crate) fn resolve(self, value: T) {
        self.settle(Ok(value))
    }

    pub(crate) fn reject(self, error: E) {
        self.settle(Err(error))
    }

    fn settle(mut self, settled: Result<T, E>) {
        self.done = true;
        self.promise.settle(settled);
    }

    /// Follows `thenable`: settles right away if it already has, otherwise
    /// waits in its queue and settles when it does.
    pub(crate) fn adopt(self, thenable: Promise<T, E>) {
        trace!("adopting the state of a returned promise");
        thenable.subscribe(Box::new(move |settled| self.settle(settled)));
    }
}

impl<T, E> Drop for Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// If this promise was never settled, nobody else can settle it now.
    fn drop(&mut self) {
        if !self.done {
            self.promise.abandon();
        }
    }
}

/// The producer side of a promise: the only handle that may settle it.
///
/// `resolve` and `reject` consume the deferred, so a promise cannot be
/// settled twice.
///
/// # Examples
///
/// ```
/// use oath::{Deferred, State};
///
/// let deferred = Deferred::<String, String>::new();
/// let handled = deferred.promise().catch(|e| format!("handled:{e}"));
/// deferred.reject("boom".into());
/// assert_eq!(handled.state(), State::Resolved("handled:boom".to_string()));
/// ```
#[derive(Debug)]
pub struct Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    resolver: Resolver<T, E>,
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        let (_, resolver) = Resolver::pair();
        Self { resolver }
    }

    /// The consumer-facing promise. Every call returns a handle to the same
    /// promise.
    pub fn promise(&self) -> Promise<T, E> {
        self.resolver.promise.clone()
    }

    /// Resolves the promise with `value` and runs every continuation queued
    /// on it before returning.
    pub fn resolve(self, value: T) {
        self.resolver.resolve(value)
    }

    /// Rejects the promise with `error` and runs every continuation queued
    /// on it before returning.
    pub fn reject(self, error: E) {
        self.resolver.reject(error)
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

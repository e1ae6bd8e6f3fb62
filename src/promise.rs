use std::fmt::{self, Debug};
use std::sync::Arc;
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::deferred::Resolver;
use crate::Error;

/// Where a promise is in its lifecycle. `Waiting` is the only state a
/// promise ever leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State<T, E> {
    Waiting,
    Resolved(T),
    Rejected(E),
}

impl<T, E> State<T, E> {
    pub fn is_waiting(&self) -> bool {
        matches!(self, State::Waiting)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, State::Resolved(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, State::Rejected(_))
    }
}

/// What a continuation hands to its successor: either a plain value, or
/// another promise the successor should follow until it settles.
#[derive(Debug)]
pub enum Outcome<T, E> {
    Value(T),
    Adopt(Promise<T, E>),
}

impl<T, E> From<Promise<T, E>> for Outcome<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Outcome::Adopt(promise)
    }
}

/// One `then`-family registration: the handlers plus the settling half of
/// the successor, fused into a single closure.
pub(crate) type Reaction<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

struct Inner<T, E> {
    state: State<T, E>,
    reactions: Vec<Reaction<T, E>>,
    wakers: Vec<Waker>,
    abandoned: bool,
}

/// A value that becomes available later.
///
/// Continuations run synchronously: registering on a settled promise runs
/// the handler before the call returns, and settling a waiting promise runs
/// every queued handler, in registration order, before `resolve`/`reject`
/// returns.
///
/// # Examples
///
/// ```
/// use oath::{defer, State};
///
/// let deferred = defer::<i32, String>();
/// let answer = deferred.promise().then(|x| x + 1);
/// assert_eq!(answer.state(), State::Waiting);
///
/// deferred.resolve(41);
/// assert_eq!(answer.state(), State::Resolved(42));
/// ```
pub struct Promise<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Debug, E: Debug> Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Promise")
            .field("state", &inner.state)
            .field("continuations", &inner.reactions.len())
            .field("abandoned", &inner.abandoned)
            .finish()
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn with_state(state: State<T, E>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                reactions: vec![],
                wakers: vec![],
                abandoned: false,
            })),
        }
    }

    pub(crate) fn waiting() -> Self {
        Self::with_state(State::Waiting)
    }

    /// A promise that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        Self::with_state(State::Resolved(value))
    }

    /// A promise that is already rejected with `error`.
    pub fn rejected(error: E) -> Self {
        Self::with_state(State::Rejected(error))
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> State<T, E> {
        self.inner.lock().state.clone()
    }

    pub fn is_settled(&self) -> bool {
        !self.inner.lock().state.is_waiting()
    }

    /// Runs `on_success` with the resolved value. A rejection passes through
    /// to the returned promise unchanged.
    pub fn then<U, F>(&self, on_success: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.chain(move |settled| settled.map(|value| Outcome::Value(on_success(value))))
    }

    /// Runs exactly one of the two handlers depending on how the promise
    /// settles; the returned promise resolves with that handler's result.
    pub fn then_with<U, F, G>(&self, on_success: F, on_failure: G) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
        G: FnOnce(E) -> U + Send + 'static,
    {
        self.chain(move |settled| {
            Ok(Outcome::Value(match settled {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            }))
        })
    }

    /// Runs `on_failure` with the rejection and resolves the returned promise
    /// with its result. A resolved value passes through unchanged.
    pub fn catch<G>(&self, on_failure: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> T + Send + 'static,
    {
        self.chain(move |settled| Ok(Outcome::Value(settled.unwrap_or_else(on_failure))))
    }

    /// Like [`then`](Self::then), but the handler returns a promise and the
    /// returned promise settles the way that one does.
    pub fn and_then<U, F>(&self, on_success: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        self.chain(move |settled| settled.map(|value| Outcome::Adopt(on_success(value))))
    }

    /// Like [`catch`](Self::catch), but the handler returns a promise to
    /// follow.
    pub fn or_else<G>(&self, on_failure: G) -> Promise<T, E>
    where
        G: FnOnce(E) -> Promise<T, E> + Send + 'static,
    {
        self.chain(move |settled| {
            Ok(match settled {
                Ok(value) => Outcome::Value(value),
                Err(error) => Outcome::Adopt(on_failure(error)),
            })
        })
    }

    /// The general form: each handler decides at runtime whether to hand the
    /// successor a value or a promise to adopt.
    pub fn then_outcome<U, F, G>(&self, on_success: F, on_failure: G) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U, E> + Send + 'static,
        G: FnOnce(E) -> Outcome<U, E> + Send + 'static,
    {
        self.chain(move |settled| {
            Ok(match settled {
                Ok(value) => on_success(value),
                Err(error) => on_failure(error),
            })
        })
    }

    /// Creates the successor and links it to this promise through `handler`.
    /// `Err` from the handler tunnels a rejection straight through.
    fn chain<U, H>(&self, handler: H) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        H: FnOnce(Result<T, E>) -> Result<Outcome<U, E>, E> + Send + 'static,
    {
        let (successor, resolver) = Resolver::pair();
        self.subscribe(Box::new(move |settled| match handler(settled) {
            Ok(Outcome::Value(value)) => resolver.resolve(value),
            Ok(Outcome::Adopt(promise)) => resolver.adopt(promise),
            Err(error) => resolver.reject(error),
        }));
        successor
    }

    /// Queues `reaction` while waiting, runs it now once settled.
    pub(crate) fn subscribe(&self, reaction: Reaction<T, E>) {
        let mut inner = self.inner.lock();
        let settled = match &inner.state {
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(error.clone())),
            State::Waiting => None,
        };
        match settled {
            Some(settled) => {
                drop(inner);
                trace!("promise already settled, running continuation in place");
                reaction(settled);
            }
            None if inner.abandoned => {
                drop(inner);
                trace!("dropping continuation registered on an abandoned promise");
                drop(reaction);
            }
            None => {
                inner.reactions.push(reaction);
                trace!("queued continuation #{}", inner.reactions.len());
            }
        }
    }

    /// Fixes the outcome and drains the queue. The lock is released before
    /// any continuation runs.
    pub(crate) fn settle(&self, settled: Result<T, E>) {
        let (reactions, wakers) = {
            let mut inner = self.inner.lock();
            debug_assert!(inner.state.is_waiting(), "promise settled twice");
            inner.state = match &settled {
                Ok(value) => State::Resolved(value.clone()),
                Err(error) => State::Rejected(error.clone()),
            };
            (
                std::mem::take(&mut inner.reactions),
                std::mem::take(&mut inner.wakers),
            )
        };
        debug!(
            "promise {}, flushing {} continuation(s)",
            if settled.is_ok() { "resolved" } else { "rejected" },
            reactions.len()
        );
        // Wake before running handlers: a panicking handler must not strand
        // tasks awaiting an already settled promise.
        for waker in wakers {
            waker.wake()
        }
        for reaction in reactions {
            reaction(settled.clone());
        }
    }

    /// Marks a waiting promise as never settling. Dropping the queued
    /// reactions drops their successors' resolvers, so abandonment cascades.
    pub(crate) fn abandon(&self) {
        let (reactions, wakers) = {
            let mut inner = self.inner.lock();
            if !inner.state.is_waiting() {
                return;
            }
            inner.abandoned = true;
            (
                std::mem::take(&mut inner.reactions),
                std::mem::take(&mut inner.wakers),
            )
        };
        debug!("promise abandoned with {} pending continuation(s)", reactions.len());
        for waker in wakers {
            waker.wake()
        }
        drop(reactions);
    }
}

impl<T, E> Future for Promise<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        let ready = match &inner.state {
            State::Resolved(value) => Some(Ok(value.clone())),
            State::Rejected(error) => Some(Err(Error::Rejected(error.clone()))),
            State::Waiting if inner.abandoned => Some(Err(Error::Abandoned)),
            State::Waiting => None,
        };
        match ready {
            Some(output) => Poll::Ready(output),
            None => {
                if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Outcome, Promise, State};
    use crate::defer;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(String) + Clone + Send + 'static) {
        let log = Arc::new(Mutex::new(vec![]));
        let sink = log.clone();
        (log, move |entry| sink.lock().push(entry))
    }

    #[test]
    fn test_then_on_settled_runs_before_returning() {
        let (log, record) = recorder();
        let promise = Promise::<i32, String>::resolved(7);
        let next = promise.then(move |x| {
            record(format!("saw {x}"));
            x * 3
        });
        assert_eq!(*log.lock(), vec!["saw 7"]);
        assert_eq!(next.state(), State::Resolved(21));
    }

    #[test]
    fn test_continuations_fire_in_registration_order() {
        let (log, record) = recorder();
        let deferred = defer::<i32, ()>();
        let promise = deferred.promise();
        for name in ["f1", "f2", "f3"] {
            let record = record.clone();
            promise.then(move |x| record(format!("{name}:{x}")));
        }
        assert!(log.lock().is_empty());
        deferred.resolve(5);
        assert_eq!(*log.lock(), vec!["f1:5", "f2:5", "f3:5"]);
    }

    #[test]
    fn test_queue_is_drained_once() {
        let (log, record) = recorder();
        let deferred = defer::<i32, ()>();
        let promise = deferred.promise();
        let first = record.clone();
        promise.then(move |_| first("early".into()));
        deferred.resolve(1);
        promise.then(move |_| record("late".into()));
        assert_eq!(*log.lock(), vec!["early", "late"]);
    }

    #[test]
    fn test_catch_passes_values_through() {
        let (log, record) = recorder();
        let promise = Promise::<i32, String>::resolved(3);
        let next = promise.catch(move |e| {
            record(e);
            0
        });
        assert_eq!(next.state(), State::Resolved(3));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_then_with_routes_by_outcome() {
        let ok = Promise::<i32, String>::resolved(2);
        let err = Promise::<i32, String>::rejected("four".into());
        assert!(ok.state().is_resolved());
        assert!(err.state().is_rejected());

        let from_ok = ok.then_with(|x| x * 10, |e| e.len() as i32);
        let from_err = err.then_with(|x| x * 10, |e| e.len() as i32);
        assert_eq!(from_ok.state(), State::Resolved(20));
        assert_eq!(from_err.state(), State::Resolved(4));
    }

    #[test]
    fn test_adopt_settled_promise() {
        let next = Promise::<i32, String>::resolved(1).and_then(|x| Promise::resolved(x + 1));
        assert_eq!(next.state(), State::Resolved(2));

        let failed = Promise::<i32, String>::resolved(1)
            .and_then(|_| Promise::<i32, String>::rejected("no".into()));
        assert_eq!(failed.state(), State::Rejected("no".to_string()));
    }

    #[test]
    fn test_adopt_waiting_promise() {
        let outer = defer::<i32, String>();
        let inner = defer::<i32, String>();
        let inner_promise = inner.promise();
        let next = outer
            .promise()
            .and_then(move |x| inner_promise.then(move |y| x + y))
            .then(|sum| sum * 2);
        outer.resolve(1);
        assert_eq!(next.state(), State::Waiting);
        inner.resolve(2);
        assert_eq!(next.state(), State::Resolved(6));
    }

    #[test]
    fn test_or_else_recovers_with_promise() {
        let recovery = defer::<String, String>();
        let recovery_promise = recovery.promise();
        let next =
            Promise::<String, String>::rejected("boom".into()).or_else(move |_| recovery_promise);
        assert!(!next.is_settled());
        recovery.resolve("fine".into());
        assert_eq!(next.state(), State::Resolved("fine".to_string()));
    }

    #[test]
    fn test_then_outcome_decides_at_runtime() {
        let pick = |x: i32| -> Outcome<i32, String> {
            if x > 0 {
                Outcome::Value(x)
            } else {
                Promise::rejected(format!("bad {x}")).into()
            }
        };
        let by_length = |e: String| -> Outcome<i32, String> { Outcome::Value(e.len() as i32) };
        let good = Promise::<i32, String>::resolved(4).then_outcome(pick, by_length);
        let bad = Promise::<i32, String>::resolved(-1).then_outcome(pick, by_length);
        assert_eq!(good.state(), State::Resolved(4));
        assert_eq!(bad.state(), State::Rejected("bad -1".to_string()));
    }

    #[test]
    fn test_successor_flushes_its_own_queue() {
        let deferred = defer::<i32, ()>();
        let middle = deferred.promise().then(|x| x + 1);
        let last = middle.then(|x| x * 100);
        deferred.resolve(0);
        assert_eq!(middle.state(), State::Resolved(1));
        assert_eq!(last.state(), State::Resolved(100));
    }

    #[test]
    fn test_adopting_settled_promise_flushes_successor_queue() {
        let deferred = defer::<i32, String>();
        let adopted = deferred.promise().and_then(|x| Promise::resolved(x));
        let next = adopted.then(|x| x + 1);
        assert_eq!(next.state(), State::Waiting);
        deferred.resolve(1);
        assert_eq!(adopted.state(), State::Resolved(1));
        assert_eq!(next.state(), State::Resolved(2));
    }

    #[test]
    fn test_reentrant_then_during_drain_runs_immediately() {
        let (log, record) = recorder();
        let deferred = defer::<i32, ()>();
        let promise = deferred.promise();
        let again = promise.clone();
        let inner_record = record.clone();
        promise.then(move |_| {
            record("first".into());
            again.then(move |_| inner_record("nested".into()));
        });
        let tail = log.clone();
        promise.then(move |_| tail.lock().push("second".into()));
        deferred.resolve(0);
        assert_eq!(*log.lock(), vec!["first", "nested", "second"]);
    }

    #[test]
    fn test_debug_shows_state() {
        let promise = Promise::<i32, ()>::resolved(9);
        let text = format!("{promise:?}");
        assert!(text.contains("Resolved(9)"), "{text}");
    }
}

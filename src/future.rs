//! The promise/future primitive.
//!
//! A [Promise] and its [Future]s are views of one shared single-assignment
//! cell. The cell starts out pending, transitions exactly once to either a
//! value or an error, and from then on never changes. Consumers can block
//! on the terminal state with [Future::get] or subscribe with
//! [Future::add_callback]; producers settle the cell through
//! [Promise::set] or [Promise::fail].
//!
//! Callbacks registered before completion run on the completing thread in
//! registration order, after blocking waiters have been woken.
//! A callback registered after completion runs synchronously on the
//! registering thread. In both cases the cell's lock is released before
//! user code is entered.
//!
//! # Example
//!
//! ```
//! use std::thread;
//! use pact::future::Promise;
//!
//! let promise = Promise::new();
//! let future = promise.future();
//!
//! thread::spawn(move || {
//!     promise.set(42);
//! });
//!
//! assert_eq!(future.get().unwrap(), 42);
//! ```

use std::mem;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::TaskError;

/// Terminal state of a cell: the value it settled into, or the error.
#[derive(Clone, Debug)]
pub enum Outcome<T> {
    Ready(T),
    Failed(TaskError),
}

impl<T> Outcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Outcome::Ready(_))
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Outcome::Ready(_) => None,
            Outcome::Failed(err) => Some(err),
        }
    }

    /// Discards the payload, keeping only the completion kind and error.
    pub(crate) fn erase(&self) -> Outcome<()> {
        match self {
            Outcome::Ready(_) => Outcome::Ready(()),
            Outcome::Failed(err) => Outcome::Failed(err.clone()),
        }
    }
}

type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;
pub(crate) type CommonCallback = Box<dyn FnOnce(Outcome<()>) + Send>;

/// The shared cell behind a promise/future pair.
///
/// `slot` is `None` while pending. Completion stores the outcome and wakes
/// waiters under the lock, then detaches the callback list and invokes it
/// with the lock released; a callback completing another cell therefore
/// never re-enters this one's lock.
pub(crate) struct SharedState<T> {
    inner: Mutex<CellInner<T>>,
    done: Condvar,
}

struct CellInner<T> {
    slot: Option<Outcome<T>>,
    callbacks: Vec<Callback<T>>,
}

impl<T> SharedState<T> {
    fn new() -> Self {
        SharedState {
            inner: Mutex::new(CellInner {
                slot: None,
                callbacks: Vec::new(),
            }),
            done: Condvar::new(),
        }
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().unwrap().slot.is_some()
    }

    fn wait_done(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.slot.is_none() {
            inner = self.done.wait(inner).unwrap();
        }
    }
}

impl<T: Clone> SharedState<T> {
    /// Settles the cell. Returns false if it was already terminal: the
    /// first writer wins and a late completion attempt is rejected.
    pub(crate) fn complete(&self, outcome: Outcome<T>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.slot.is_some() {
            return false;
        }
        let callbacks = mem::take(&mut inner.callbacks);
        if callbacks.is_empty() {
            inner.slot = Some(outcome);
            self.done.notify_all();
            return true;
        }
        inner.slot = Some(outcome.clone());
        self.done.notify_all();
        drop(inner);
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    fn add_callback(&self, callback: Callback<T>) {
        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.slot {
                None => {
                    inner.callbacks.push(callback);
                    return;
                }
                Some(outcome) => outcome.clone(),
            }
        };
        callback(&snapshot);
    }

    fn wait_outcome(&self) -> Outcome<T> {
        let mut inner = self.inner.lock().unwrap();
        while inner.slot.is_none() {
            inner = self.done.wait(inner).unwrap();
        }
        inner.slot.as_ref().unwrap().clone()
    }

    fn take_outcome(&self) -> Outcome<T> {
        let mut inner = self.inner.lock().unwrap();
        while inner.slot.is_none() {
            inner = self.done.wait(inner).unwrap();
        }
        match inner.slot.take().unwrap() {
            Outcome::Ready(value) => {
                inner.slot = Some(Outcome::Failed(TaskError::msg("future value moved out")));
                Outcome::Ready(value)
            }
            Outcome::Failed(err) => {
                inner.slot = Some(Outcome::Failed(err.clone()));
                Outcome::Failed(err)
            }
        }
    }
}

/// Payload-erased view of a cell, enough to track completion.
pub(crate) trait SharedStateBase: Send + Sync {
    fn is_ready(&self) -> bool;
    fn wait_done(&self);
    fn add_common_callback(&self, callback: CommonCallback);
}

impl<T: Clone + Send + 'static> SharedStateBase for SharedState<T> {
    fn is_ready(&self) -> bool {
        SharedState::is_ready(self)
    }

    fn wait_done(&self) {
        SharedState::wait_done(self)
    }

    fn add_common_callback(&self, callback: CommonCallback) {
        self.add_callback(Box::new(move |outcome| callback(outcome.erase())));
    }
}

/// Consumer handle to a cell.
///
/// Cheap to clone; all clones observe the same cell. A future does not
/// expose mutation: only the [Promise] it came from can settle the cell.
pub struct Future<T> {
    state: Arc<SharedState<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Waits until the cell is terminal, then returns a copy of the value,
    /// or the error the cell failed with.
    pub fn get(&self) -> Result<T, TaskError> {
        match self.state.wait_outcome() {
            Outcome::Ready(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Like [Future::get], but moves the value out of the cell. Later
    /// observers see a valid but unspecified state; do not combine `take`
    /// with other consumers of the same cell.
    pub fn take(&self) -> Result<T, TaskError> {
        match self.state.take_outcome() {
            Outcome::Ready(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
        }
    }

    /// Waits until the cell is terminal.
    pub fn wait(&self) {
        self.state.wait_done();
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    /// Subscribes to completion. If the cell is already terminal the
    /// callback runs synchronously on this thread, before this call
    /// returns; otherwise it runs on the completing thread.
    pub fn add_callback(&self, callback: impl FnOnce(&Outcome<T>) + Send + 'static) {
        self.state.add_callback(Box::new(callback));
    }

    /// Subscribes to completion with the payload discarded: the callback
    /// receives only the completion kind and the error, if any.
    pub fn add_common_callback(&self, callback: impl FnOnce(Outcome<()>) + Send + 'static) {
        self.state.add_common_callback(Box::new(callback));
    }
}

/// Producer handle to a cell: the only view capable of settling it.
pub struct Promise<T> {
    state: Arc<SharedState<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Promise {
            state: Arc::new(SharedState::new()),
        }
    }

    /// A consumer handle for this cell.
    pub fn future(&self) -> Future<T> {
        Future {
            state: Arc::clone(&self.state),
        }
    }

    /// Completes the cell with `value`. Returns false if the cell was
    /// already terminal; the earlier completion stands.
    pub fn set(&self, value: T) -> bool {
        self.state.complete(Outcome::Ready(value))
    }

    /// Fails the cell with `error`. Returns false if the cell was already
    /// terminal; the earlier completion stands.
    pub fn fail(&self, error: impl Into<TaskError>) -> bool {
        self.state.complete(Outcome::Failed(error.into()))
    }

    pub(crate) fn complete(&self, outcome: Outcome<T>) -> bool {
        self.state.complete(outcome)
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Promise::new()
    }
}

/// A future with its payload type erased, for code that only cares about
/// completion. Obtained from any [Future] via `From`/`Into`.
#[derive(Clone)]
pub struct AnyFuture {
    state: Arc<dyn SharedStateBase>,
}

impl AnyFuture {
    pub fn wait(&self) {
        self.state.wait_done();
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn add_common_callback(&self, callback: impl FnOnce(Outcome<()>) + Send + 'static) {
        self.state.add_common_callback(Box::new(callback));
    }
}

impl<T: Clone + Send + 'static> From<Future<T>> for AnyFuture {
    fn from(future: Future<T>) -> Self {
        AnyFuture {
            state: future.state,
        }
    }
}

/// An already-settled future holding `value`.
pub fn completed_future<T: Clone + Send + 'static>(value: T) -> Future<T> {
    let promise = Promise::new();
    promise.set(value);
    promise.future()
}

/// An already-failed future holding `error`.
pub fn failed_future<T: Clone + Send + 'static>(error: impl Into<TaskError>) -> Future<T> {
    let promise = Promise::new();
    promise.fail(error);
    promise.future()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use anyhow::anyhow;

    use super::{completed_future, failed_future, AnyFuture, Outcome, Promise};

    #[test]
    fn completed_future_yields_its_value() {
        assert_eq!(completed_future(7).get().unwrap(), 7);
    }

    #[test]
    fn get_blocks_until_set() {
        let promise = Promise::new();
        let future = promise.future();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            promise.set(String::from("done"));
        });

        assert_eq!(future.get().unwrap(), "done");
        // Repeated gets observe the same value.
        assert_eq!(future.get().unwrap(), "done");
    }

    #[test]
    fn second_completion_is_rejected() {
        let promise = Promise::new();
        assert!(promise.set(1));
        assert!(!promise.set(2));
        assert!(!promise.fail(anyhow!("too late")));
        assert_eq!(promise.future().get().unwrap(), 1);
    }

    #[test]
    fn fail_then_set_keeps_the_error() {
        let promise = Promise::<i32>::new();
        assert!(promise.fail(anyhow!("broken")));
        assert!(!promise.set(3));
        let err = promise.future().get().unwrap_err();
        assert_eq!(err.to_string(), "broken");
    }

    #[test]
    fn callbacks_fire_once_in_registration_order() {
        let promise = Promise::new();
        let future = promise.future();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = Arc::clone(&seen);
            future.add_callback(move |outcome| {
                assert!(outcome.is_ready());
                seen.lock().unwrap().push(tag);
            });
        }

        promise.set(5u8);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn late_callback_runs_synchronously() {
        let future = completed_future(9);
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        future.add_callback(move |outcome| {
            assert!(matches!(*outcome, Outcome::Ready(9)));
            flag.store(true, Ordering::SeqCst);
        });

        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn callback_observes_the_error() {
        let future = failed_future::<i32>(anyhow!("nope"));
        let fired = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&fired);
        future.add_callback(move |outcome| {
            assert_eq!(outcome.error().unwrap().to_string(), "nope");
            count.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(future.get().is_err());
    }

    #[test]
    fn take_moves_the_value_out() {
        let future = completed_future(vec![1, 2, 3]);
        assert_eq!(future.take().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn common_callback_discards_the_payload() {
        let future = completed_future("payload");
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        future.add_common_callback(move |outcome| {
            assert!(outcome.is_ready());
            flag.store(true, Ordering::SeqCst);
        });
        assert!(fired.load(Ordering::SeqCst));

        let erased: AnyFuture = failed_future::<i32>(anyhow!("kept")).into();
        assert!(erased.is_ready());
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        erased.add_common_callback(move |outcome| {
            assert_eq!(outcome.error().unwrap().to_string(), "kept");
            flag.store(true, Ordering::SeqCst);
        });
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_returns_for_every_clone() {
        let promise = Promise::new();
        let future = promise.future();
        let clone = future.clone();

        let waiter = thread::spawn(move || {
            clone.wait();
            assert!(clone.is_ready());
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!future.is_ready());
        promise.set(());
        waiter.join().unwrap();
        future.wait();
    }
}

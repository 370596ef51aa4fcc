//! Continuation combinators.
//!
//! Every combinator takes an executor and builds a derived future. The
//! continuation always runs on the executor's threads, never on the thread
//! that completed the input: the input's completion callback only enqueues.
//! Errors propagate along continuation edges without entering user code;
//! [catch_async] is the one operator that consumes an error.
//!
//! User functions are fallible through [anyhow::Result]; an `Err` becomes
//! the derived future's error.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use pact::chain::{launch, then};
//! use pact::executor::ThreadPool;
//!
//! let pool = Arc::new(ThreadPool::new(2));
//!
//! let base = launch(&pool, || Ok(40));
//! let answer = then(&pool, |v| Ok(v + 2), base);
//!
//! assert_eq!(answer.get().unwrap(), 42);
//! ```

use std::sync::Arc;

use anyhow::Result;

use crate::error::TaskError;
use crate::executor::Executor;
use crate::future::{Future, Outcome, Promise};

/// Runs `func` on `executor` and returns a future for its result.
pub fn launch<E, R, F>(executor: &Arc<E>, func: F) -> Future<R>
where
    E: Executor + ?Sized + 'static,
    R: Clone + Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    executor.enqueue(Box::new(move || {
        finish(&promise, func());
    }));
    future
}

/// Adds a synchronous function as a continuation to a future.
///
/// Once `arg` completes with a value, `func` runs on `executor` with that
/// value and the returned future completes with `func`'s result. If `arg`
/// failed, its error is forwarded verbatim and `func` never runs.
pub fn then<E, A, R, F>(executor: &Arc<E>, func: F, arg: Future<A>) -> Future<R>
where
    E: Executor + ?Sized + 'static,
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(A) -> Result<R> + Send + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    let executor = Arc::clone(executor);
    arg.add_callback(move |outcome| {
        let outcome = outcome.clone();
        executor.enqueue(Box::new(move || match outcome {
            Outcome::Ready(value) => finish(&promise, func(value)),
            Outcome::Failed(err) => {
                promise.complete(Outcome::Failed(err));
            }
        }));
    });
    future
}

/// Adds an asynchronous function as a continuation to a future.
///
/// Like [then], but `func` starts an asynchronous operation and returns a
/// future for it; the returned future settles with that inner future's
/// terminal state. If `func` fails before producing a future, that error
/// is the result.
pub fn then_async<E, A, R, F>(executor: &Arc<E>, func: F, arg: Future<A>) -> Future<R>
where
    E: Executor + ?Sized + 'static,
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(A) -> Result<Future<R>> + Send + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    let executor = Arc::clone(executor);
    arg.add_callback(move |outcome| {
        let outcome = outcome.clone();
        executor.enqueue(Box::new(move || match outcome {
            Outcome::Ready(value) => match func(value) {
                Ok(inner) => inner.add_callback(move |inner_outcome| {
                    promise.complete(inner_outcome.clone());
                }),
                Err(err) => {
                    promise.fail(err);
                }
            },
            Outcome::Failed(err) => {
                promise.complete(Outcome::Failed(err));
            }
        }));
    });
    future
}

/// Adds an asynchronous recovery function for a future's error.
///
/// The inverse of [then_async]: a successful `arg` passes through
/// untouched and `func` never runs. If `arg` failed, `func` receives the
/// error on `executor` and its returned future is the recovery path; an
/// error from `func` itself (or from the recovery future) is the result.
pub fn catch_async<E, R, F>(executor: &Arc<E>, func: F, arg: Future<R>) -> Future<R>
where
    E: Executor + ?Sized + 'static,
    R: Clone + Send + 'static,
    F: FnOnce(TaskError) -> Result<Future<R>> + Send + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    let executor = Arc::clone(executor);
    arg.add_callback(move |outcome| {
        let outcome = outcome.clone();
        executor.enqueue(Box::new(move || match outcome {
            Outcome::Ready(value) => {
                promise.set(value);
            }
            Outcome::Failed(err) => match func(err) {
                Ok(recovery) => recovery.add_callback(move |recovery_outcome| {
                    promise.complete(recovery_outcome.clone());
                }),
                Err(err) => {
                    promise.fail(err);
                }
            },
        }));
    });
    future
}

/// Runs an asynchronous loop over an accumulator.
///
/// Starting from `seed`, while `predicate(&current)` holds, `body(current)`
/// is invoked and the value of the future it returns becomes the next
/// `current`. When the predicate fails, the returned future completes with
/// the final accumulator. An error from any step ends the loop with that
/// error.
///
/// The predicate is assumed pure and cheap; after the first iteration it
/// runs on the executor thread that processes each step's completion.
pub fn loop_async<E, R, P, B>(executor: &Arc<E>, predicate: P, body: B, seed: R) -> Future<R>
where
    E: Executor + ?Sized + 'static,
    R: Clone + Send + 'static,
    P: Fn(&R) -> bool + Send + Sync + 'static,
    B: Fn(R) -> Result<Future<R>> + Send + Sync + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    loop_step(
        Arc::clone(executor),
        Arc::new(predicate),
        Arc::new(body),
        seed,
        promise,
    );
    future
}

fn loop_step<E, R, P, B>(
    executor: Arc<E>,
    predicate: Arc<P>,
    body: Arc<B>,
    current: R,
    promise: Promise<R>,
) where
    E: Executor + ?Sized + 'static,
    R: Clone + Send + 'static,
    P: Fn(&R) -> bool + Send + Sync + 'static,
    B: Fn(R) -> Result<Future<R>> + Send + Sync + 'static,
{
    if !(*predicate)(&current) {
        promise.set(current);
        return;
    }
    match (*body)(current) {
        Ok(step) => {
            step.add_callback(move |outcome| {
                // Each step re-enters through the executor queue, never by
                // direct recursion: stack depth stays flat however many
                // iterations the loop runs.
                let outcome = outcome.clone();
                let next_executor = Arc::clone(&executor);
                executor.enqueue(Box::new(move || match outcome {
                    Outcome::Ready(value) => {
                        loop_step(next_executor, predicate, body, value, promise)
                    }
                    Outcome::Failed(err) => {
                        promise.complete(Outcome::Failed(err));
                    }
                }));
            });
        }
        Err(err) => {
            promise.fail(err);
        }
    }
}

fn finish<R: Clone + Send + 'static>(promise: &Promise<R>, result: Result<R>) {
    match result {
        Ok(value) => promise.set(value),
        Err(err) => promise.fail(err),
    };
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use anyhow::anyhow;

    use super::{catch_async, launch, loop_async, then, then_async};
    use crate::alarm::AlarmClock;
    use crate::executor::ThreadPool;
    use crate::future::completed_future;

    #[test]
    fn direct_continuation() {
        let clock = AlarmClock::new();
        let pool = Arc::new(ThreadPool::new(32));
        let before = Instant::now();

        let delayed = clock.value_after(Duration::from_millis(300), 40);
        let answer = then(&pool, |v| Ok(v + 2), delayed);

        assert_eq!(answer.get().unwrap(), 42);
        assert!(before.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn async_continuation_unpacks_the_inner_future() {
        let clock = Arc::new(AlarmClock::new());
        let pool = Arc::new(ThreadPool::new(32));
        let before = Instant::now();

        let delayed = clock.value_after(Duration::from_millis(250), 40);
        let inner_clock = Arc::clone(&clock);
        let answer = then_async(
            &pool,
            move |v| Ok(inner_clock.value_after(Duration::from_millis(250), v + 2)),
            delayed,
        );

        assert_eq!(answer.get().unwrap(), 42);
        assert!(before.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn async_loop_reaches_the_fixed_point() {
        let clock = Arc::new(AlarmClock::new());
        let pool = Arc::new(ThreadPool::new(32));

        let loop_clock = Arc::clone(&clock);
        let answer = loop_async(
            &pool,
            |v: &i32| *v < 42,
            move |v| Ok(loop_clock.value_after(Duration::from_millis(60), v + 7)),
            0,
        );

        assert_eq!(answer.get().unwrap(), 49);
    }

    #[test]
    fn launch_runs_on_the_pool() {
        let pool = Arc::new(ThreadPool::new(2));
        let answer = launch(&pool, || Ok(21 * 2));
        assert_eq!(answer.get().unwrap(), 42);
    }

    #[test]
    fn launch_captures_the_error() {
        let pool = Arc::new(ThreadPool::new(2));
        let answer: crate::future::Future<i32> = launch(&pool, || Err(anyhow!("compute failed")));
        assert_eq!(answer.get().unwrap_err().to_string(), "compute failed");
    }

    #[test]
    fn then_with_identity_preserves_the_value() {
        let pool = Arc::new(ThreadPool::new(1));
        let future = then(&pool, Ok, completed_future(7));
        assert_eq!(future.get().unwrap(), 7);
    }

    #[test]
    fn errors_skip_continuations() {
        let pool = Arc::new(ThreadPool::new(2));
        let touched = Arc::new(AtomicBool::new(false));

        let failing = then(
            &pool,
            |_: i32| -> anyhow::Result<i32> { Err(anyhow!("boom")) },
            completed_future(40),
        );
        let flag = Arc::clone(&touched);
        let downstream = then(
            &pool,
            move |v: i32| {
                flag.store(true, Ordering::SeqCst);
                Ok(v + 1)
            },
            failing,
        );

        assert_eq!(downstream.get().unwrap_err().to_string(), "boom");
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[test]
    fn catch_recovers_from_an_error() {
        let pool = Arc::new(ThreadPool::new(2));

        let failing = then(
            &pool,
            |_: i32| -> anyhow::Result<i32> { Err(anyhow!("boom")) },
            completed_future(40),
        );
        let recovered = catch_async(&pool, |_err| Ok(completed_future(0)), failing);

        assert_eq!(recovered.get().unwrap(), 0);
    }

    #[test]
    fn catch_passes_success_through_untouched() {
        let pool = Arc::new(ThreadPool::new(2));
        let touched = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&touched);
        let future = catch_async(
            &pool,
            move |err| {
                flag.store(true, Ordering::SeqCst);
                Err(err.into())
            },
            completed_future(11),
        );

        assert_eq!(future.get().unwrap(), 11);
        assert!(!touched.load(Ordering::SeqCst));
    }

    #[test]
    fn catch_can_rethrow() {
        let pool = Arc::new(ThreadPool::new(2));

        let failing: crate::future::Future<i32> =
            crate::future::failed_future(anyhow!("unrecoverable"));
        let rethrown = catch_async(&pool, |err| Err(err.into()), failing);

        assert_eq!(rethrown.get().unwrap_err().to_string(), "unrecoverable");
    }

    #[test]
    fn then_async_error_before_future_propagates() {
        let pool = Arc::new(ThreadPool::new(1));
        let future = then_async(
            &pool,
            |_: i32| -> anyhow::Result<crate::future::Future<i32>> { Err(anyhow!("no future")) },
            completed_future(1),
        );
        assert_eq!(future.get().unwrap_err().to_string(), "no future");
    }

    #[test]
    fn loop_error_short_circuits() {
        let pool = Arc::new(ThreadPool::new(2));
        let future = loop_async(
            &pool,
            |v: &i32| *v < 10,
            |v| {
                if v == 3 {
                    Err(anyhow!("step failed"))
                } else {
                    Ok(completed_future(v + 1))
                }
            },
            0,
        );
        assert_eq!(future.get().unwrap_err().to_string(), "step failed");
    }

    #[test]
    fn loop_with_false_predicate_returns_the_seed() {
        let pool = Arc::new(ThreadPool::new(1));
        let future = loop_async(&pool, |_: &i32| false, |v| Ok(completed_future(v)), 17);
        assert_eq!(future.get().unwrap(), 17);
    }

    #[test]
    fn million_iterations_keep_the_stack_flat() {
        let pool = Arc::new(ThreadPool::new(1));
        let future = loop_async(
            &pool,
            |v: &u32| *v < 1_000_000,
            |v| Ok(completed_future(v + 1)),
            0,
        );
        assert_eq!(future.get().unwrap(), 1_000_000);
    }
}

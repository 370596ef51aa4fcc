//! # `pact`: promises and continuation toolkit
//!
//! This crate implements a small, self-contained asynchronous execution
//! runtime built around an explicit promise/future cell rather than
//! Rust's `async`/`await` machinery. Latency-bound operations such as
//! timers and socket I/O are composed into dependency graphs of futures
//! whose continuations resume on executor threads as their inputs
//! complete.
//!
//! The pieces:
//!
//! - [future]: the one-shot cell behind a [future::Promise] /
//!   [future::Future] pair, plus the payload-erased [future::AnyFuture].
//! - [executor]: the [executor::Executor] capability and the fixed-size
//!   [executor::ThreadPool].
//! - [alarm]: the [alarm::AlarmClock] timer thread.
//! - [chain]: the combinators [chain::launch], [chain::then],
//!   [chain::then_async], [chain::catch_async] and the stack-flat
//!   [chain::loop_async].
//! - [waiter]: the [waiter::WaiterSet] keeping fire-and-forget futures
//!   alive until they finish.
//! - [net]: TCP sockets whose operations settle futures.
//!
//! ## Example
//!
//! Complete a value on a timer, then add to it on a worker pool:
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pact::alarm::AlarmClock;
//! use pact::chain::then;
//! use pact::executor::ThreadPool;
//!
//! let clock = AlarmClock::new();
//! let pool = Arc::new(ThreadPool::new(4));
//!
//! let delayed = clock.value_after(Duration::from_millis(50), 40);
//! let answer = then(&pool, |v| Ok(v + 2), delayed);
//!
//! assert_eq!(answer.get().unwrap(), 42);
//! ```

pub mod alarm;
pub mod chain;
pub mod error;
pub mod executor;
pub mod future;
pub mod net;
pub mod waiter;

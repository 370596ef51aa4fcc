//! Timer scheduling.
//!
//! An [AlarmClock] owns one background thread and an ordered map of
//! deadlines. Actions fire at or after their deadline, with the clock's
//! lock released; timers cannot be cancelled. Dropping the clock lets
//! every remaining timer fire before the thread exits, so do not schedule
//! on a clock that is being torn down.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use pact::alarm::AlarmClock;
//!
//! let clock = AlarmClock::new();
//! let started = Instant::now();
//!
//! clock.sleep(Duration::from_millis(50)).get().unwrap();
//!
//! assert!(started.elapsed() >= Duration::from_millis(50));
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::trace;

use crate::future::{Future, Promise};

type TimerAction = Box<dyn FnOnce() + Send>;

/// Single-thread timer service firing actions at their deadline.
pub struct AlarmClock {
    shared: Arc<ClockShared>,
    thread: Option<JoinHandle<()>>,
}

struct ClockShared {
    state: Mutex<ClockState>,
    changed: Condvar,
}

struct ClockState {
    // Same-deadline timers share a bucket; their order within the tick is
    // unspecified.
    timers: BTreeMap<Instant, Vec<TimerAction>>,
    closing: bool,
}

impl AlarmClock {
    pub fn new() -> Self {
        let shared = Arc::new(ClockShared {
            state: Mutex::new(ClockState {
                timers: BTreeMap::new(),
                closing: false,
            }),
            changed: Condvar::new(),
        });

        let thread = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || clock_loop(&shared))
        };

        AlarmClock {
            shared,
            thread: Some(thread),
        }
    }

    /// Schedules `action` to run at `when`. The timer cannot be cancelled.
    pub fn schedule(&self, when: Instant, action: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        let new_head = state.timers.keys().next().map_or(true, |&head| when < head);
        state.timers.entry(when).or_default().push(Box::new(action));
        if new_head {
            trace!("timer thread re-armed for {when:?}");
            self.shared.changed.notify_one();
        }
    }

    /// A future that completes at `when`. It cannot be cancelled.
    pub fn sleep_until(&self, when: Instant) -> Future<()> {
        let promise = Promise::new();
        let future = promise.future();
        self.schedule(when, move || {
            promise.set(());
        });
        future
    }

    /// A future that completes once `after` has elapsed.
    pub fn sleep(&self, after: Duration) -> Future<()> {
        self.sleep_until(Instant::now() + after)
    }

    /// A future that completes with `value` once `after` has elapsed.
    pub fn value_after<T: Clone + Send + 'static>(&self, after: Duration, value: T) -> Future<T> {
        let promise = Promise::new();
        let future = promise.future();
        self.schedule(Instant::now() + after, move || {
            promise.set(value);
        });
        future
    }
}

impl Default for AlarmClock {
    fn default() -> Self {
        AlarmClock::new()
    }
}

impl Drop for AlarmClock {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.closing = true;
            self.shared.changed.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn clock_loop(shared: &ClockShared) {
    let mut state = shared.state.lock().unwrap();
    loop {
        let head = state.timers.keys().next().copied();
        let Some(deadline) = head else {
            // The thread exits only once the map is empty AND the clock is
            // closing, so scheduled timers still fire during teardown.
            if state.closing {
                return;
            }
            state = shared.changed.wait(state).unwrap();
            continue;
        };

        let now = Instant::now();
        if now < deadline {
            // An early or spurious wake falls through here and re-evaluates
            // against whatever the head deadline is by then.
            let (guard, _) = shared.changed.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            continue;
        }

        let action = {
            let bucket = state.timers.get_mut(&deadline).unwrap();
            let action = bucket.pop().unwrap();
            if bucket.is_empty() {
                state.timers.remove(&deadline);
            }
            action
        };
        drop(state);
        action();
        state = shared.state.lock().unwrap();
    }
}

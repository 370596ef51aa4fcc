//! Fire-and-forget future tracking.
//!
//! A [WaiterSet] retains futures whose results nobody will read, so the
//! cells (and whatever resources their continuations hold) stay alive
//! until they complete. Slots are reused as futures finish, and
//! [WaiterSet::wait_for_all] blocks until the set is quiescent.

use std::sync::{Arc, Condvar, Mutex};

use log::{debug, trace};
use slab::Slab;

use crate::future::{AnyFuture, Outcome};

/// Holds in-flight fire-and-forget futures until each completes.
///
/// Clones share the same set. Do not call [WaiterSet::add] after
/// [WaiterSet::wait_for_all] has returned.
#[derive(Clone)]
pub struct WaiterSet {
    inner: Arc<WaiterInner>,
}

struct WaiterInner {
    slots: Mutex<Slab<AnyFuture>>,
    quiescent: Condvar,
}

impl WaiterSet {
    pub fn new() -> Self {
        WaiterSet {
            inner: Arc::new(WaiterInner {
                slots: Mutex::new(Slab::new()),
                quiescent: Condvar::new(),
            }),
        }
    }

    /// Adds a future to the fire-and-forget list. The set retains it until
    /// it completes, then releases the slot for reuse.
    pub fn add(&self, future: impl Into<AnyFuture>) {
        let future = future.into();
        let key = {
            let mut slots = self.inner.slots.lock().unwrap();
            slots.insert(future.clone())
        };
        trace!("tracking background future in slot {key}");

        let inner = Arc::clone(&self.inner);
        future.add_common_callback(move |outcome| {
            match outcome {
                Outcome::Ready(()) => trace!("background future in slot {key} completed"),
                Outcome::Failed(err) => debug!("background future in slot {key} failed: {err}"),
            }
            let mut slots = inner.slots.lock().unwrap();
            slots.remove(key);
            if slots.is_empty() {
                inner.quiescent.notify_all();
            }
        });
    }

    /// Blocks until every added future has completed.
    pub fn wait_for_all(&self) {
        let mut slots = self.inner.slots.lock().unwrap();
        while !slots.is_empty() {
            slots = self.inner.quiescent.wait(slots).unwrap();
        }
    }

    /// Number of futures still in flight.
    pub fn active(&self) -> usize {
        self.inner.slots.lock().unwrap().len()
    }
}

impl Default for WaiterSet {
    fn default() -> Self {
        WaiterSet::new()
    }
}

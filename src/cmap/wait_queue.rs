use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

/// Ensures that threads checking out a connection proceed in strict first-come, first-served
/// order with respect to idle-stack availability: a newly arriving requester can never overtake
/// an already-enrolled waiter, because `signal_head` only ever wakes the entry at the front.
#[derive(Debug, Default)]
pub(super) struct WaitQueue {
    entries: Mutex<VecDeque<Arc<Waiter>>>,
}

/// A single enrolled waiter's one-shot wake primitive.
#[derive(Debug, Default)]
struct Waiter {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl Waiter {
    fn signal(&self) {
        *self.signaled.lock().unwrap() = true;
        self.condvar.notify_one();
    }

    /// Blocks until signaled or `deadline` passes. Returns whether it was signaled.
    fn wait_until(&self, deadline: Instant) -> bool {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, timeout_result) = self
                .condvar
                .wait_timeout(signaled, deadline - now)
                .unwrap();
            signaled = guard;
            if *signaled {
                break;
            }
            if timeout_result.timed_out() {
                return false;
            }
        }
        true
    }
}

/// The outcome of [`WaitQueue::enroll`].
pub(super) enum Enrollment {
    /// The caller was at the front of the queue the moment it enrolled and need not wait at all.
    Immediate(WaitHandle),
    /// The caller must wait on the returned handle until it is signaled or gives up.
    Pending(WaitHandle),
}

/// A handle to an enrolled wait-queue entry. Must be withdrawn via [`WaitQueue::withdraw`] on
/// every exit path of the checkout attempt it was created for, successful or not.
pub(super) struct WaitHandle(Arc<Waiter>);

impl WaitHandle {
    /// Blocks the calling thread until either this handle is signaled or `deadline` passes.
    /// Returns whether it was signaled before the deadline.
    pub(super) fn wait_until(&self, deadline: Instant) -> bool {
        self.0.wait_until(deadline)
    }
}

impl WaitQueue {
    pub(super) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a new entry to the back of the queue. If the queue was empty before this call,
    /// the entry is already at the front and `Enrollment::Immediate` is returned.
    pub(super) fn enroll(&self) -> Enrollment {
        let waiter = Arc::new(Waiter::default());
        let mut entries = self.entries.lock().unwrap();
        let was_empty = entries.is_empty();
        entries.push_back(waiter.clone());
        if was_empty {
            Enrollment::Immediate(WaitHandle(waiter))
        } else {
            Enrollment::Pending(WaitHandle(waiter))
        }
    }

    /// Wakes the entry at the front of the queue, if any. Idempotent: signaling an
    /// already-signaled waiter is harmless.
    pub(super) fn signal_head(&self) {
        let entries = self.entries.lock().unwrap();
        if let Some(head) = entries.front() {
            head.signal();
        }
    }

    /// Removes `handle`'s entry from the queue by identity. Must be called exactly once per
    /// `enroll`, regardless of how the checkout attempt terminated.
    pub(super) fn withdraw(&self, handle: &WaitHandle) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|w| !Arc::ptr_eq(w, &handle.0));
    }

    /// The number of requesters currently enrolled.
    pub(super) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

pub(super) fn deadline_from(start: Instant, timeout: Duration) -> Instant {
    start.checked_add(timeout).unwrap_or(start)
}

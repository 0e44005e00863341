//! Implements the Connection Monitoring and Pooling core: a bounded, fair, generation-aware pool
//! of persistent connections to a single server endpoint.
//!
//! [`ConnectionPool`] is a cheap-to-clone handle; all mutable state lives behind an `Arc` in
//! [`Inner`] and is guarded by a single mutex, as described in the module's concurrency model.

mod background;
mod options;
mod wait_queue;

#[cfg(test)]
mod test;

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Condvar, Mutex},
    time::Instant,
};

pub use options::ConnectionPoolOptions;
use wait_queue::{deadline_from, Enrollment, WaitQueue};

use crate::{
    address::Address,
    connection::{Clock, ConnectionFactory, PoolableConnection, SystemClock},
    error::{Error, Result},
    event::{
        ConnectionCheckedInEvent,
        ConnectionCheckedOutEvent,
        ConnectionCheckoutFailedEvent,
        ConnectionCheckoutFailedReason,
        ConnectionCheckoutStartedEvent,
        ConnectionClosedEvent,
        ConnectionClosedReason,
        EventPublisher,
        NoopEventPublisher,
        PoolClearedEvent,
        PoolClosedEvent,
        PoolCreatedEvent,
    },
};

/// A pool of connections to a single server endpoint.
///
/// Cloning a `ConnectionPool` is cheap: it is a handle to a shared, reference-counted inner
/// state, the same way a `tokio::sync::mpsc::Sender` or an `Arc` itself is cheap to clone.
pub struct ConnectionPool<C, F, Clk = SystemClock>
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
    Clk: Clock,
{
    inner: Arc<Inner<C, F, Clk>>,
}

impl<C, F, Clk> Clone for ConnectionPool<C, F, Clk>
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
    Clk: Clock,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C, F, Clk> std::fmt::Debug for ConnectionPool<C, F, Clk>
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
    Clk: Clock,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("pool_size", &self.pool_size())
            .field("generation", &self.generation())
            .finish()
    }
}

impl<C, F> ConnectionPool<C, F, SystemClock>
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
{
    /// Constructs a pool using the real system clock and discarding all events.
    pub fn new(address: Address, options: ConnectionPoolOptions, factory: F) -> Result<Self> {
        Self::with_clock_and_publisher(
            address,
            options,
            factory,
            SystemClock,
            Arc::new(NoopEventPublisher),
        )
    }

    /// Constructs a pool using the real system clock, publishing lifecycle events to `publisher`.
    pub fn with_publisher(
        address: Address,
        options: ConnectionPoolOptions,
        factory: F,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        Self::with_clock_and_publisher(address, options, factory, SystemClock, publisher)
    }
}

impl<C, F, Clk> ConnectionPool<C, F, Clk>
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
    Clk: Clock,
{
    /// Constructs a pool with an explicit clock and event publisher. Intended for tests that need
    /// deterministic idle-expiry behavior; production callers should use [`Self::new`] or
    /// [`Self::with_publisher`].
    pub fn with_clock_and_publisher(
        address: Address,
        options: ConnectionPoolOptions,
        factory: F,
        clock: Clk,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        let min_size = options.min_pool_size();
        let max_size = options.max_pool_size();
        if min_size > max_size {
            return Err(Error::config(format!(
                "min_pool_size ({}) must not exceed max_pool_size ({})",
                min_size, max_size
            )));
        }

        let mut idle = VecDeque::with_capacity(min_size as usize);
        for _ in 0..min_size {
            let mut conn = factory
                .create(1)
                .map_err(|e| Error::connection_factory(address.clone(), Box::new(e)))?;
            conn.mark_checked_in(clock.now());
            idle.push_back(conn);
        }

        let inner = Arc::new(Inner {
            address,
            options,
            factory,
            clock,
            publisher,
            guarded: Mutex::new(Guarded {
                idle,
                pool_size: min_size,
                generation: 1,
            }),
            available: Condvar::new(),
            wait_queue: WaitQueue::new(),
        });

        inner.publish(|| {
            inner.publisher.handle_pool_created(PoolCreatedEvent {
                address: inner.address.clone(),
                max_pool_size: max_size,
                min_pool_size: min_size,
            })
        });

        if let Some(interval) = inner.options.background_reaper_interval {
            background::spawn(Arc::downgrade(&inner), interval);
        }

        Ok(Self { inner })
    }

    /// Checks out a connection, blocking the calling thread for up to `wait_queue_timeout`.
    pub fn checkout(&self) -> Result<C> {
        let inner = &self.inner;
        inner.publish(|| {
            inner.publisher.handle_checkout_started(ConnectionCheckoutStartedEvent {
                address: inner.address.clone(),
            })
        });

        match inner.acquire_or_create() {
            Ok(conn) => {
                inner.publish(|| {
                    inner.publisher.handle_checked_out(ConnectionCheckedOutEvent {
                        address: inner.address.clone(),
                        connection_id: conn.id(),
                    })
                });
                Ok(conn)
            }
            Err(err) => {
                let reason = if err.is_wait_queue_timeout() {
                    ConnectionCheckoutFailedReason::Timeout
                } else {
                    ConnectionCheckoutFailedReason::ConnectionError
                };
                inner.publish(|| {
                    inner.publisher.handle_checkout_failed(ConnectionCheckoutFailedEvent {
                        address: inner.address.clone(),
                        reason,
                    })
                });
                Err(err)
            }
        }
    }

    /// Checks a connection back into the pool. Infallible: a stale connection is disposed of
    /// instead of being returned to the caller as an error.
    pub fn return_connection(&self, conn: C) {
        let inner = &self.inner;
        inner.publish(|| {
            inner.publisher.handle_checked_in(ConnectionCheckedInEvent {
                address: inner.address.clone(),
                connection_id: conn.id(),
            })
        });
        inner.check_in(conn);
    }

    /// Invalidates every connection created before this call by bumping the pool's generation.
    /// Does not touch the idle stack directly; stale connections are disposed of lazily the next
    /// time they're checked out or checked in.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Closes every idle connection and rebuilds the idle stack back to `min_pool_size` under a
    /// fresh generation. In-flight checked-out connections become stale and are disposed of on
    /// their next check-in.
    pub fn disconnect_all(&self) {
        self.inner.disconnect_all();
    }

    /// Runs one idle-reaping pass: disconnects idle connections older than `max_idle_time`,
    /// reconnecting in place as many as needed to keep `pool_size >= min_pool_size`. A no-op if
    /// `max_idle_time` was not configured.
    pub fn close_stale_sockets(&self) {
        self.inner.close_stale_sockets();
    }

    /// The number of requesters currently enrolled in the wait queue.
    pub fn queue_size(&self) -> usize {
        self.inner.wait_queue.len()
    }

    /// The total number of live connections, idle plus checked out.
    pub fn pool_size(&self) -> u32 {
        self.inner.guarded.lock().unwrap().pool_size
    }

    /// The pool's current generation.
    pub fn generation(&self) -> u64 {
        self.inner.guarded.lock().unwrap().generation
    }

    /// The address this pool's connections connect to.
    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Asserts the pool's size invariants. Always `Ok(())` unless `lint_mode` was enabled at
    /// construction.
    pub fn check_invariants(&self) -> Result<()> {
        self.inner.check_invariants()
    }
}

/// The pool's internal, lock-guarded accounting.
struct Guarded<C> {
    /// Idle connections, most-recently-returned at the front (LIFO).
    idle: VecDeque<C>,
    /// Total live connections, idle plus checked out.
    pool_size: u32,
    /// Monotonically increasing; bumped by `clear` and by `disconnect_all`.
    generation: u64,
}

struct Inner<C, F, Clk> {
    address: Address,
    options: ConnectionPoolOptions,
    factory: F,
    clock: Clk,
    publisher: Arc<dyn EventPublisher>,
    guarded: Mutex<Guarded<C>>,
    /// Broadcasts on every check-in so threads blocked in the checkout loop (step 3c) can
    /// reassess the idle stack.
    available: Condvar,
    wait_queue: WaitQueue,
}

impl<C, F, Clk> Inner<C, F, Clk>
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
    Clk: Clock,
{
    fn acquire_or_create(&self) -> Result<C> {
        let deadline = deadline_from(Instant::now(), self.options.wait_queue_timeout());

        let handle = match self.wait_queue.enroll() {
            Enrollment::Immediate(handle) => handle,
            Enrollment::Pending(handle) => {
                // A timeout here doesn't raise directly: the caller still gets one atomic
                // attempt at the front of the mutex-guarded loop below before we give up.
                handle.wait_until(deadline);
                handle
            }
        };

        let result = self.checkout_locked(deadline);
        self.wait_queue.withdraw(&handle);
        result
    }

    fn checkout_locked(&self, deadline: Instant) -> Result<C> {
        let mut guarded = self.guarded.lock().unwrap();
        loop {
            while let Some(conn) = guarded.idle.pop_front() {
                if conn.generation() != guarded.generation {
                    self.dispose(&mut guarded, conn, ConnectionClosedReason::Stale);
                    continue;
                }
                if self.is_idle(&conn) {
                    self.dispose(&mut guarded, conn, ConnectionClosedReason::Idle);
                    continue;
                }
                return Ok(conn);
            }

            if guarded.pool_size < self.options.max_pool_size() {
                let generation = guarded.generation;
                guarded.pool_size += 1;
                match self.factory.create(generation) {
                    Ok(conn) => return Ok(conn),
                    Err(e) => {
                        guarded.pool_size -= 1;
                        return Err(Error::connection_factory(self.address.clone(), Box::new(e)));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::wait_queue_timeout(self.address.clone(), guarded.pool_size));
            }
            let (new_guarded, _) = self.available.wait_timeout(guarded, deadline - now).unwrap();
            guarded = new_guarded;
        }
    }

    fn check_in(&self, mut conn: C) {
        let mut guarded = self.guarded.lock().unwrap();
        if conn.generation() != guarded.generation {
            self.dispose(&mut guarded, conn, ConnectionClosedReason::Stale);
        } else {
            conn.mark_checked_in(self.clock.now());
            guarded.idle.push_front(conn);
        }
        drop(guarded);

        // The condvar addresses threads already looping in `checkout_locked`; the wait-queue
        // signal releases a thread still sleeping before it ever reached the mutex.
        self.available.notify_all();
        self.wait_queue.signal_head();
    }

    fn clear(&self) {
        let generation = {
            let mut guarded = self.guarded.lock().unwrap();
            guarded.generation += 1;
            guarded.generation
        };
        self.publish(|| {
            self.publisher.handle_pool_cleared(PoolClearedEvent {
                address: self.address.clone(),
                generation,
            })
        });
    }

    fn disconnect_all(&self) {
        let mut guarded = self.guarded.lock().unwrap();
        let idle = std::mem::take(&mut guarded.idle);
        for conn in idle {
            self.dispose(&mut guarded, conn, ConnectionClosedReason::PoolClosed);
        }
        guarded.generation += 1;
        drop(guarded);

        self.publish(|| {
            self.publisher.handle_pool_closed(PoolClosedEvent {
                address: self.address.clone(),
            })
        });

        self.refill_to_min();
    }

    /// Calls an event-publisher closure, catching and logging a panic instead of letting it
    /// unwind through `self.guarded`'s lock and poison it for every other thread.
    fn publish(&self, f: impl FnOnce()) {
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
            tracing::error!(
                address = %self.address,
                panic = %panic_message(&payload),
                "event publisher panicked; event dropped",
            );
        }
    }

    /// Creates connections until `pool_size` reaches `min_pool_size`. Used both right after
    /// `disconnect_all` and by the background maintenance thread. Failures are logged and the
    /// pass is abandoned rather than propagated — a single unreachable endpoint must not stall
    /// the caller or the maintenance thread.
    fn refill_to_min(&self) {
        let min_size = self.options.min_pool_size();
        let mut guarded = self.guarded.lock().unwrap();
        while guarded.pool_size < min_size {
            let generation = guarded.generation;
            match self.factory.create(generation) {
                Ok(mut conn) => {
                    conn.mark_checked_in(self.clock.now());
                    guarded.pool_size += 1;
                    guarded.idle.push_back(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        address = %self.address,
                        error = %e,
                        "failed to refill connection pool to min_pool_size",
                    );
                    break;
                }
            }
        }
    }

    /// No-op if `max_idle_time` was not configured. See the module-level algorithm description
    /// for the two-phase scan-then-mutate structure.
    fn close_stale_sockets(&self) {
        if self.options.max_idle_time.is_none() {
            return;
        }

        // Snapshot just the (id, last_checkin) pairs under the lock — a plain copy, not the idle
        // staleness check itself — then release the lock before evaluating `is_idle_since`
        // against each one, so the pool mutex is never held across the scan.
        let snapshot: Vec<(u64, Option<Instant>)> = {
            let guarded = self.guarded.lock().unwrap();
            guarded
                .idle
                .iter()
                .map(|conn| (conn.id(), conn.last_checkin()))
                .collect()
        };

        let candidates: HashSet<u64> = snapshot
            .into_iter()
            .filter(|(_, last_checkin)| self.is_idle_since(*last_checkin))
            .map(|(id, _)| id)
            .collect();

        if candidates.is_empty() {
            return;
        }

        let mut guarded = self.guarded.lock().unwrap();
        let checked_out = guarded.pool_size.saturating_sub(guarded.idle.len() as u32);
        let min_size_delta = self.options.min_pool_size().saturating_sub(checked_out);

        let mut i = 0;
        while i < guarded.idle.len() {
            if !candidates.contains(&guarded.idle[i].id()) {
                i += 1;
                continue;
            }

            // The candidate may have been checked out between the scan above and this lock
            // acquisition; re-check it's still genuinely idle before disposing of it.
            if !self.is_idle(&guarded.idle[i]) {
                i += 1;
                continue;
            }

            let conn = guarded.idle.remove(i).expect("index in bounds");
            self.dispose(&mut guarded, conn, ConnectionClosedReason::Idle);

            if i < min_size_delta as usize {
                let generation = guarded.generation;
                match self.factory.create(generation) {
                    Ok(mut replacement) => {
                        replacement.mark_checked_in(self.clock.now());
                        guarded.pool_size += 1;
                        guarded.idle.insert(i, replacement);
                        i += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            address = %self.address,
                            error = %e,
                            "failed to reconnect in place while reaping idle connections",
                        );
                        // Swallowed per spec: the slot stays unfilled until the next checkout
                        // or reaper pass tries again.
                    }
                }
            }
        }
    }

    fn check_invariants(&self) -> Result<()> {
        if !self.options.lint_mode {
            return Ok(());
        }
        let guarded = self.guarded.lock().unwrap();
        let max_size = self.options.max_pool_size();
        let min_size = self.options.min_pool_size();

        if guarded.idle.len() as u32 > guarded.pool_size {
            return Err(Error::lint(format!(
                "idle count {} exceeds pool_size {}",
                guarded.idle.len(),
                guarded.pool_size
            )));
        }
        if guarded.pool_size > max_size {
            return Err(Error::lint(format!(
                "pool_size {} exceeds max_pool_size {}",
                guarded.pool_size, max_size
            )));
        }
        if guarded.pool_size < min_size {
            return Err(Error::lint(format!(
                "pool_size {} is below min_pool_size {}",
                guarded.pool_size, min_size
            )));
        }
        Ok(())
    }

    /// Disposes of a connection that's being removed from `idle` (or was never pushed onto it):
    /// disconnects it, decrements `pool_size`, and emits `ConnectionClosed`. Must be called with
    /// `guarded` already locked.
    fn dispose(&self, guarded: &mut Guarded<C>, mut conn: C, reason: ConnectionClosedReason) {
        let id = conn.id();
        conn.disconnect();

        if guarded.pool_size == 0 {
            tracing::error!(
                address = %self.address,
                "pool_size underflowed while closing a connection; this indicates an \
                 accounting bug and has been clamped to 0",
            );
        } else {
            guarded.pool_size -= 1;
        }

        self.publish(|| {
            self.publisher.handle_connection_closed(ConnectionClosedEvent {
                address: self.address.clone(),
                connection_id: id,
                reason,
            })
        });
    }

    fn is_idle(&self, conn: &C) -> bool {
        self.is_idle_since(conn.last_checkin())
    }

    fn is_idle_since(&self, last_checkin: Option<Instant>) -> bool {
        match (self.options.max_idle_time, last_checkin) {
            (Some(max_idle_time), Some(last_checkin)) => {
                self.clock.now().saturating_duration_since(last_checkin) >= max_idle_time
            }
            _ => false,
        }
    }
}

/// Extracts a human-readable message from a caught panic payload, for logging.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

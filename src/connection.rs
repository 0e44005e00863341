//! Contracts for the collaborators the pool does not own: the connections themselves, the
//! factory that builds them, and the clock used to measure wait and idle deadlines.
//!
//! The pool never speaks TCP, TLS, or the wire protocol. It only needs enough of a connection's
//! shape to account for it, decide whether it is stale or idle, and hand it back to the caller.

use std::time::Instant;

/// The subset of a transport-layer connection's shape that the pool relies on.
///
/// Implementations own the actual socket/handshake state; the pool only ever touches the
/// identity, generation, and idle bookkeeping exposed here.
pub trait PoolableConnection: Send + 'static {
    /// A stable identifier for this connection, unique within the pool's lifetime. Used only for
    /// diagnostics and event correlation; the pool does not use it to look connections up.
    fn id(&self) -> u64;

    /// The pool generation this connection was created under. A connection whose generation no
    /// longer matches the pool's current generation is stale and must be disposed of rather than
    /// reused.
    fn generation(&self) -> u64;

    /// The last time this connection was checked back into the pool, or `None` if it has never
    /// been checked in (e.g. it was just created). Used to detect idle expiry.
    fn last_checkin(&self) -> Option<Instant>;

    /// Stamps the time this connection was checked into the pool. Called exactly once per
    /// check-in, immediately before the connection is pushed onto the idle stack.
    fn mark_checked_in(&mut self, at: Instant);

    /// Tears the connection down. Must be idempotent: the pool may call this on a connection that
    /// failed to establish cleanly, and implementations must tolerate being called more than
    /// once.
    fn disconnect(&mut self);
}

/// Produces new connections tagged with the pool's current generation.
///
/// A factory that blocks must honor the same `wait_queue_timeout` the pool was configured with
/// for its own handshake; the pool does not impose a separate deadline on `create`.
pub trait ConnectionFactory<C: PoolableConnection>: Send + Sync + 'static {
    /// The error type returned when establishing a connection fails. Boxed into
    /// [`ErrorKind::ConnectionFactory`](crate::error::ErrorKind::ConnectionFactory) by the pool.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates a new connection stamped with `generation`.
    fn create(&self, generation: u64) -> std::result::Result<C, Self::Error>;
}

/// A monotonic time source, injected so that wait and idle deadlines can be tested without real
/// sleeps.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current instant as observed by this clock.
    fn now(&self) -> Instant;
}

/// The default [`Clock`], backed by [`Instant::now`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

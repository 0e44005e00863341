//! Contains the events and the [`EventPublisher`] trait monitoring subscribers implement to
//! observe a connection pool's lifecycle.
//!
//! The pool only ever publishes events; it has no opinion on how subscribers fan out, buffer, or
//! persist them. Publication is synchronous with the state change it describes and must not
//! block: an [`EventPublisher`] implementation that does expensive work should hand events off to
//! a channel rather than processing them in place.

use crate::address::Address;

/// Event emitted when a connection pool is created.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolCreatedEvent {
    /// The address of the server the pool's connections connect to.
    pub address: Address,
    /// The configured maximum pool size.
    pub max_pool_size: u32,
    /// The configured minimum pool size.
    pub min_pool_size: u32,
}

/// Event emitted when a connection pool's generation is bumped via `clear`.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolClearedEvent {
    /// The address of the server the pool's connections connect to.
    pub address: Address,
    /// The pool generation in effect after the clear.
    pub generation: u64,
}

/// Event emitted when a connection pool is closed via `disconnect_all`, just before it refills
/// back to `min_pool_size`.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct PoolClosedEvent {
    /// The address of the server the pool's connections connect to.
    pub address: Address,
}

/// Event emitted when a thread begins checking out a connection.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckoutStartedEvent {
    /// The address of the server the connection will connect to.
    pub address: Address,
}

/// Event emitted when a connection is successfully checked out.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckedOutEvent {
    /// The address of the server the connection is connected to.
    pub address: Address,
    /// The checked-out connection's id.
    pub connection_id: u64,
}

/// Event emitted when a thread is unable to check out a connection.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckoutFailedEvent {
    /// The address of the server the connection would have connected to.
    pub address: Address,
    /// The reason the checkout failed.
    pub reason: ConnectionCheckoutFailedReason,
}

/// The reasons a connection checkout may fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionCheckoutFailedReason {
    /// `wait_queue_timeout` elapsed before a connection became available.
    Timeout,
    /// The connection factory failed to establish a new connection.
    ConnectionError,
}

/// Event emitted when a connection is checked back into the pool.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionCheckedInEvent {
    /// The address of the server the connection is connected to.
    pub address: Address,
    /// The checked-in connection's id.
    pub connection_id: u64,
}

/// Event emitted whenever the pool disposes of a connection.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct ConnectionClosedEvent {
    /// The address of the server the connection was connected to.
    pub address: Address,
    /// The closed connection's id.
    pub connection_id: u64,
    /// The reason the connection was closed.
    pub reason: ConnectionClosedReason,
}

/// The reasons a connection may be closed by the pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionClosedReason {
    /// The pool's generation advanced past the connection's generation since it was created.
    Stale,
    /// The connection was idle for longer than `max_idle_time`.
    Idle,
    /// The pool itself was closed via `disconnect_all`.
    PoolClosed,
    /// The connection factory or the connection itself reported an error.
    Error,
}

/// Implemented by monitoring subscribers that want to observe a connection pool's lifecycle.
///
/// Every method has a no-op default, so implementations only override the events they care
/// about. All methods are called with the pool's internal mutex already released; a handler may
/// safely call back into the pool (e.g. to read `pool_size()`) without deadlocking.
pub trait EventPublisher: Send + Sync {
    /// Called once, when the pool is constructed.
    fn handle_pool_created(&self, _event: PoolCreatedEvent) {}

    /// Called whenever `clear` bumps the pool's generation.
    fn handle_pool_cleared(&self, _event: PoolClearedEvent) {}

    /// Called once, when `disconnect_all` closes out the pool's idle connections before
    /// rebuilding them.
    fn handle_pool_closed(&self, _event: PoolClosedEvent) {}

    /// Called when a thread begins a `checkout` call.
    fn handle_checkout_started(&self, _event: ConnectionCheckoutStartedEvent) {}

    /// Called when a `checkout` call fails.
    fn handle_checkout_failed(&self, _event: ConnectionCheckoutFailedEvent) {}

    /// Called when a `checkout` call succeeds.
    fn handle_checked_out(&self, _event: ConnectionCheckedOutEvent) {}

    /// Called when a connection is returned via `return_connection`.
    fn handle_checked_in(&self, _event: ConnectionCheckedInEvent) {}

    /// Called whenever the pool disposes of a connection, for any reason.
    fn handle_connection_closed(&self, _event: ConnectionClosedEvent) {}
}

/// An [`EventPublisher`] that discards every event. Used when a caller does not wire up
/// monitoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {}

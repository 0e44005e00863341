//! A bounded, fair, generation-aware pool of connections to a single server endpoint.
//!
//! The pool itself owns no transport: callers plug in a [`connection::PoolableConnection`] type
//! and a [`connection::ConnectionFactory`] that builds them, and the pool handles bounding pool
//! size, queuing requesters fairly when it's exhausted, lazily invalidating connections after a
//! [`cmap::ConnectionPool::clear`], and reaping idle connections in the background.
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::cast_possible_truncation)]
#![warn(clippy::cast_possible_wrap)]

pub mod address;
pub mod cmap;
pub mod connection;
pub mod error;
pub mod event;

pub use crate::{
    address::Address,
    cmap::{ConnectionPool, ConnectionPoolOptions},
    connection::{Clock, ConnectionFactory, PoolableConnection, SystemClock},
    error::{Error, ErrorKind, Result},
};

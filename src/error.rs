//! Contains the `Error` and `Result` types that this crate uses.

use thiserror::Error as ThisError;

use crate::address::Address;

/// The result type for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while operating a connection pool.
#[derive(Debug, ThisError)]
#[error(transparent)]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: ErrorKind,
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        ErrorKind::Config {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn wait_queue_timeout(address: Address, pool_size: u32) -> Self {
        ErrorKind::WaitQueueTimeout { address, pool_size }.into()
    }

    pub(crate) fn lint(message: impl Into<String>) -> Self {
        ErrorKind::Lint {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn connection_factory(
        address: Address,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    ) -> Self {
        ErrorKind::ConnectionFactory { address, source }.into()
    }

    /// Returns `true` if this error indicates that `checkout` timed out waiting for a connection
    /// to become available.
    pub fn is_wait_queue_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::WaitQueueTimeout { .. })
    }

    /// Returns `true` if this error indicates that a pool invariant was violated. Only possible
    /// when the pool was constructed with `lint_mode` enabled.
    pub fn is_lint_failure(&self) -> bool {
        matches!(self.kind, ErrorKind::Lint { .. })
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

/// The kinds of errors this crate's connection pool can produce.
#[derive(Debug, ThisError)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The `wait_queue_timeout` elapsed before a connection became available.
    ///
    /// The pool's state is unchanged by this error; the caller may retry.
    #[error("timed out waiting for a connection to {address} (pool size: {pool_size})")]
    WaitQueueTimeout {
        /// The address of the server the pool connects to.
        address: Address,
        /// The pool's total connection count at the moment the timeout elapsed.
        pool_size: u32,
    },

    /// The pool was constructed with an invalid configuration, e.g. `min_pool_size >
    /// max_pool_size`.
    #[error("invalid connection pool configuration: {message}")]
    Config {
        /// A message describing the invalid configuration.
        message: String,
    },

    /// A pool invariant was violated at a quiescent checkpoint. Only raised when `lint_mode` is
    /// enabled; production pools never construct this variant.
    #[error("connection pool invariant violated: {message}")]
    Lint {
        /// A message describing which invariant was violated.
        message: String,
    },

    /// The [`ConnectionFactory`](crate::connection::ConnectionFactory) failed to produce a
    /// connection during `checkout` or a rebuild. `pool_size` has already been rolled back by the
    /// time this error is returned.
    #[error("failed to establish a connection to {address}: {source}")]
    ConnectionFactory {
        /// The address the factory attempted to connect to.
        address: Address,
        /// The underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

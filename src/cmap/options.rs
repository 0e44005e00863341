use std::time::Duration;

use typed_builder::TypedBuilder;

pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 5;
pub(crate) const DEFAULT_MIN_POOL_SIZE: u32 = 1;
pub(crate) const DEFAULT_WAIT_QUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Options recognized when constructing a [`ConnectionPool`](super::ConnectionPool).
#[derive(Clone, Debug, TypedBuilder)]
pub struct ConnectionPoolOptions {
    /// The maximum number of connections the pool may hold, idle plus checked out. Defaults to
    /// 5. Fixed for the lifetime of the pool; this crate does not support resizing it.
    #[builder(default, setter(strip_option))]
    pub max_pool_size: Option<u32>,

    /// The minimum number of connections the pool keeps live. Enforced eagerly at construction
    /// and after `disconnect_all`. Defaults to 1.
    #[builder(default, setter(strip_option))]
    pub min_pool_size: Option<u32>,

    /// The total deadline `checkout` will wait for a connection before raising
    /// [`ErrorKind::WaitQueueTimeout`](crate::error::ErrorKind::WaitQueueTimeout). Defaults to 1
    /// second. `Some(Duration::ZERO)` makes every checkout a single non-blocking attempt.
    #[builder(default, setter(strip_option))]
    pub wait_queue_timeout: Option<Duration>,

    /// How long a connection may sit idle in the pool before `close_stale_sockets` is eligible to
    /// reap it. `None` (the default) disables idle reaping entirely.
    #[builder(default, setter(strip_option))]
    pub max_idle_time: Option<Duration>,

    /// When set, operations that reach a quiescent point additionally assert the pool's
    /// invariants and return [`ErrorKind::Lint`](crate::error::ErrorKind::Lint) (or, for
    /// infallible operations, log at error level) on violation. Defaults to `false`; production
    /// pools should leave this off.
    #[builder(default)]
    pub lint_mode: bool,

    /// When set, the pool spawns a background maintenance thread at construction that calls
    /// `close_stale_sockets` and refills `min_pool_size` on this interval. `None` (the default)
    /// leaves maintenance entirely to explicit caller-driven calls.
    #[builder(default, setter(strip_option))]
    pub background_reaper_interval: Option<Duration>,
}

impl ConnectionPoolOptions {
    pub(crate) fn max_pool_size(&self) -> u32 {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    pub(crate) fn min_pool_size(&self) -> u32 {
        self.min_pool_size.unwrap_or(DEFAULT_MIN_POOL_SIZE)
    }

    pub(crate) fn wait_queue_timeout(&self) -> Duration {
        self.wait_queue_timeout
            .unwrap_or(DEFAULT_WAIT_QUEUE_TIMEOUT)
    }
}

impl Default for ConnectionPoolOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

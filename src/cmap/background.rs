use std::{sync::Weak, time::Duration};

use super::Inner;
use crate::connection::{Clock, ConnectionFactory, PoolableConnection};

/// Spawns the pool's maintenance thread. A weak reference is used so the thread doesn't keep the
/// pool alive by itself; it exits as soon as the last strong reference to `inner` is dropped.
pub(super) fn spawn<C, F, Clk>(inner: Weak<Inner<C, F, Clk>>, interval: Duration)
where
    C: PoolableConnection,
    F: ConnectionFactory<C>,
    Clk: Clock,
{
    std::thread::spawn(move || loop {
        match inner.upgrade() {
            Some(inner) => {
                // Reap first so a connection that's both stale and idle never counts toward the
                // refill target below.
                inner.close_stale_sockets();
                inner.refill_to_min();
            }
            None => return,
        }
        std::thread::sleep(interval);
    });
}

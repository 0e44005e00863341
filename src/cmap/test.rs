use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use super::*;
use crate::event::{
    ConnectionCheckedInEvent,
    ConnectionCheckedOutEvent,
    ConnectionCheckoutFailedEvent,
    ConnectionClosedEvent,
    PoolClearedEvent,
    PoolClosedEvent,
    PoolCreatedEvent,
};

/// A clock whose `now()` is an explicit offset from a fixed origin, advanced by the test rather
/// than by real time passing.
#[derive(Clone)]
struct FakeClock {
    origin: Instant,
    offset: Arc<AtomicU64>,
}

impl FakeClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(AtomicU64::new(0)),
        }
    }

    fn advance(&self, by: Duration) {
        self.offset
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
struct FakeConnection {
    id: u64,
    generation: u64,
    last_checkin: Option<Instant>,
    disconnected: bool,
}

impl PoolableConnection for FakeConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn last_checkin(&self) -> Option<Instant> {
        self.last_checkin
    }

    fn mark_checked_in(&mut self, at: Instant) {
        self.last_checkin = Some(at);
    }

    fn disconnect(&mut self) {
        self.disconnected = true;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("refused to connect")]
struct FakeConnectError;

struct FakeFactory {
    next_id: AtomicU64,
    fail_next: AtomicBool,
}

impl FakeFactory {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            fail_next: AtomicBool::new(false),
        }
    }

    fn fail_next_create(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl ConnectionFactory<FakeConnection> for FakeFactory {
    type Error = FakeConnectError;

    fn create(&self, generation: u64) -> std::result::Result<FakeConnection, Self::Error> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(FakeConnectError);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            id,
            generation,
            last_checkin: None,
            disconnected: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RecordedEvent {
    PoolCreated(PoolCreatedEvent),
    PoolCleared(PoolClearedEvent),
    PoolClosed(PoolClosedEvent),
    CheckedOut(ConnectionCheckedOutEvent),
    CheckoutFailed(ConnectionCheckoutFailedEvent),
    CheckedIn(ConnectionCheckedInEvent),
    Closed(ConnectionClosedEvent),
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingPublisher {
    fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventPublisher for RecordingPublisher {
    fn handle_pool_created(&self, event: PoolCreatedEvent) {
        self.events.lock().unwrap().push(RecordedEvent::PoolCreated(event));
    }

    fn handle_pool_cleared(&self, event: PoolClearedEvent) {
        self.events.lock().unwrap().push(RecordedEvent::PoolCleared(event));
    }

    fn handle_pool_closed(&self, event: PoolClosedEvent) {
        self.events.lock().unwrap().push(RecordedEvent::PoolClosed(event));
    }

    fn handle_checkout_failed(&self, event: ConnectionCheckoutFailedEvent) {
        self.events.lock().unwrap().push(RecordedEvent::CheckoutFailed(event));
    }

    fn handle_checked_out(&self, event: ConnectionCheckedOutEvent) {
        self.events.lock().unwrap().push(RecordedEvent::CheckedOut(event));
    }

    fn handle_checked_in(&self, event: ConnectionCheckedInEvent) {
        self.events.lock().unwrap().push(RecordedEvent::CheckedIn(event));
    }

    fn handle_connection_closed(&self, event: ConnectionClosedEvent) {
        self.events.lock().unwrap().push(RecordedEvent::Closed(event));
    }
}

fn address() -> Address {
    Address::new("localhost", Some(27017))
}

fn pool(
    options: ConnectionPoolOptions,
) -> (
    ConnectionPool<FakeConnection, FakeFactory, FakeClock>,
    FakeClock,
    Arc<RecordingPublisher>,
) {
    let clock = FakeClock::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let pool = ConnectionPool::with_clock_and_publisher(
        address(),
        options,
        FakeFactory::new(),
        clock.clone(),
        publisher.clone(),
    )
    .unwrap();
    (pool, clock, publisher)
}

#[test]
fn basic_checkout_and_reuse() {
    let (pool, _clock, _publisher) = pool(ConnectionPoolOptions::builder().max_pool_size(2).build());

    let conn = pool.checkout().unwrap();
    let first_id = conn.id();
    pool.return_connection(conn);

    let conn = pool.checkout().unwrap();
    assert_eq!(conn.id(), first_id, "a checked-in connection should be reused, not rebuilt");
    assert_eq!(pool.pool_size(), 1);
}

#[test]
fn grows_up_to_max_then_times_out() {
    let (pool, _clock, _publisher) = pool(
        ConnectionPoolOptions::builder()
            .max_pool_size(2)
            .min_pool_size(0)
            .wait_queue_timeout(Duration::from_millis(50))
            .build(),
    );

    let a = pool.checkout().unwrap();
    let b = pool.checkout().unwrap();
    assert_eq!(pool.pool_size(), 2);

    let err = pool.checkout().unwrap_err();
    assert!(err.is_wait_queue_timeout());

    pool.return_connection(a);
    pool.return_connection(b);
}

#[test]
fn wakes_waiter_on_check_in() {
    let (pool, _clock, _publisher) = pool(
        ConnectionPoolOptions::builder()
            .max_pool_size(1)
            .min_pool_size(0)
            .wait_queue_timeout(Duration::from_secs(5))
            .build(),
    );

    let conn = pool.checkout().unwrap();
    let held_id = conn.id();

    let waiter_pool = pool.clone();
    let waiter = std::thread::spawn(move || waiter_pool.checkout());

    // Give the waiter time to enroll before the check-in signal fires.
    std::thread::sleep(Duration::from_millis(50));
    pool.return_connection(conn);

    let woken = waiter.join().unwrap().unwrap();
    assert_eq!(woken.id(), held_id);
}

#[test]
fn fifo_fairness_between_two_waiters() {
    let (pool, _clock, _publisher) = pool(
        ConnectionPoolOptions::builder()
            .max_pool_size(1)
            .min_pool_size(0)
            .wait_queue_timeout(Duration::from_secs(5))
            .build(),
    );

    let conn = pool.checkout().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));

    let pool_a = pool.clone();
    let order_a = order.clone();
    let waiter_a = std::thread::spawn(move || {
        let conn = pool_a.checkout().unwrap();
        order_a.lock().unwrap().push('a');
        conn
    });
    // Ensure A enrolls strictly before B.
    std::thread::sleep(Duration::from_millis(30));

    let pool_b = pool.clone();
    let order_b = order.clone();
    let waiter_b = std::thread::spawn(move || {
        let conn = pool_b.checkout().unwrap();
        order_b.lock().unwrap().push('b');
        conn
    });
    std::thread::sleep(Duration::from_millis(30));

    pool.return_connection(conn);
    let a = waiter_a.join().unwrap();
    pool.return_connection(a);
    let _b = waiter_b.join().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!['a', 'b'], "the earlier-enrolled waiter must be served first");
}

#[test]
fn clear_invalidates_idle_connections_lazily() {
    let (pool, _clock, publisher) = pool(ConnectionPoolOptions::builder().max_pool_size(2).build());

    let conn = pool.checkout().unwrap();
    pool.return_connection(conn);
    assert_eq!(pool.pool_size(), 1, "the returned connection should still be counted");

    pool.clear();
    assert_eq!(pool.pool_size(), 1, "clear must not touch pool_size directly");

    let conn = pool.checkout().unwrap();
    assert_eq!(conn.id(), 2, "the stale idle connection should be disposed of and a fresh one built");

    let closed = publisher
        .events()
        .into_iter()
        .filter(|e| matches!(e, RecordedEvent::Closed(c) if c.reason == ConnectionClosedReason::Stale))
        .count();
    assert_eq!(closed, 1);
}

#[test]
fn idle_reaping_respects_min_pool_size() {
    let (pool, clock, publisher) = pool(
        ConnectionPoolOptions::builder()
            .min_pool_size(1)
            .max_pool_size(2)
            .max_idle_time(Duration::from_secs(30))
            .build(),
    );

    assert_eq!(pool.pool_size(), 1);
    clock.advance(Duration::from_secs(60));

    pool.close_stale_sockets();

    assert_eq!(pool.pool_size(), 1, "a reconnected-in-place replacement must keep pool_size at min");
    let reasons: Vec<_> = publisher
        .events()
        .into_iter()
        .filter_map(|e| match e {
            RecordedEvent::Closed(c) => Some(c.reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![ConnectionClosedReason::Idle]);
}

#[test]
fn disconnect_all_rebuilds_to_min_under_new_generation() {
    let (pool, _clock, publisher) =
        pool(ConnectionPoolOptions::builder().min_pool_size(2).max_pool_size(4).build());

    assert_eq!(pool.pool_size(), 2);
    let generation_before = pool.generation();

    // Check out one of the two min_pool_size connections so it's in flight, untouched directly
    // by disconnect_all, and only invalidated lazily once it's returned.
    let in_flight = pool.checkout().unwrap();
    assert_eq!(pool.pool_size(), 2, "reusing an already-idle connection doesn't grow pool_size");

    pool.disconnect_all();

    assert_eq!(pool.pool_size(), 2, "disconnect_all rebuilds idle back to min_pool_size");
    assert_eq!(pool.generation(), generation_before + 1);

    let saw_pool_closed = publisher
        .events()
        .into_iter()
        .any(|e| matches!(e, RecordedEvent::PoolClosed(_)));
    assert!(saw_pool_closed);

    pool.return_connection(in_flight);

    assert_eq!(
        pool.pool_size(),
        1,
        "returning a stale in-flight connection disposes of it instead of growing idle"
    );
    let saw_stale_close = publisher
        .events()
        .into_iter()
        .any(|e| matches!(e, RecordedEvent::Closed(c) if c.reason == ConnectionClosedReason::Stale));
    assert!(saw_stale_close);
}

#[test]
fn checkout_failure_from_factory_rolls_back_pool_size() {
    let clock = FakeClock::new();
    let publisher = Arc::new(RecordingPublisher::default());
    let factory = FakeFactory::new();
    factory.fail_next_create();
    let pool = ConnectionPool::with_clock_and_publisher(
        address(),
        ConnectionPoolOptions::builder().min_pool_size(0).max_pool_size(1).build(),
        factory,
        clock,
        publisher.clone(),
    )
    .unwrap();

    let err = pool.checkout().unwrap_err();
    assert!(!err.is_wait_queue_timeout());
    assert_eq!(pool.pool_size(), 0, "a failed create must not leave pool_size incremented");

    let saw_failure = publisher
        .events()
        .into_iter()
        .any(|e| matches!(e, RecordedEvent::CheckoutFailed(_)));
    assert!(saw_failure);
}

#[test]
fn min_pool_size_greater_than_max_is_rejected() {
    let err = ConnectionPool::<FakeConnection, FakeFactory>::new(
        address(),
        ConnectionPoolOptions::builder().min_pool_size(3).max_pool_size(1).build(),
        FakeFactory::new(),
    )
    .unwrap_err();
    assert!(!err.is_wait_queue_timeout());
}

#[test]
fn check_invariants_passes_in_lint_mode_for_a_healthy_pool() {
    let (pool, _clock, _publisher) = pool(
        ConnectionPoolOptions::builder()
            .min_pool_size(1)
            .max_pool_size(3)
            .lint_mode(true)
            .build(),
    );
    pool.check_invariants().unwrap();
}

#[test]
fn check_invariants_is_a_noop_without_lint_mode() {
    let (pool, _clock, _publisher) = pool(ConnectionPoolOptions::builder().max_pool_size(1).build());
    pool.check_invariants().unwrap();
}

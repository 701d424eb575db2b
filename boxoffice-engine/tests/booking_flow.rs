use async_trait::async_trait;
use boxoffice_core::{
    BookingRepository, EventRepository, RepositoryContainer, StoreResult, TicketRepository,
    UserRepository,
};
use boxoffice_engine::{BookingError, BookingProcessor, EngineConfig, PricingMode, Stage};
use boxoffice_shared::{
    BookingOutcome, BookingRequest, BookingStatus, Event, OutcomeResult, Ticket, TicketStatus,
    User,
};
use boxoffice_store::InMemoryStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

struct Fixture {
    store: Arc<InMemoryStore>,
    processor: Arc<BookingProcessor>,
    event: Event,
    tickets: Vec<Uuid>,
    u1: User,
    u2: User,
}

async fn seed(store: &InMemoryStore, seats: i32) -> (Event, Vec<Uuid>, User, User) {
    let event = Event::new(
        "Night Show".to_string(),
        "The Band".to_string(),
        "Arena".to_string(),
        Utc::now(),
        seats,
        80.0,
    );
    EventRepository::create(store, &event).await.unwrap();
    let tickets: Vec<Ticket> = event.issue_tickets();
    store.create_many(&tickets).await.unwrap();

    let u1 = User::new("u1@example.com", "User One");
    let u2 = User::new("u2@example.com", "User Two");
    UserRepository::create(store, &u1).await.unwrap();
    UserRepository::create(store, &u2).await.unwrap();

    (event, tickets.iter().map(|t| t.id).collect(), u1, u2)
}

async fn fixture_with(config: EngineConfig, seats: i32) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let (event, tickets, u1, u2) = seed(&store, seats).await;
    let repos = RepositoryContainer::from_single(store.clone());
    let processor = Arc::new(BookingProcessor::start(config, repos));
    Fixture {
        store,
        processor,
        event,
        tickets,
        u1,
        u2,
    }
}

async fn fixture(seats: i32) -> Fixture {
    fixture_with(EngineConfig::default(), seats).await
}

async fn next_outcome(rx: &mut broadcast::Receiver<BookingOutcome>) -> BookingOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for booking outcome")
        .expect("outcome channel closed")
}

async fn book(fx: &Fixture, user: &User, tickets: Vec<Uuid>) -> BookingOutcome {
    let mut rx = fx.processor.subscribe();
    let request = BookingRequest::new(user.id, fx.event.id, tickets);
    let request_id = request.id.clone();
    fx.processor.submit(request).unwrap();
    let outcome = next_outcome(&mut rx).await;
    assert_eq!(outcome.request_id, request_id);
    outcome
}

fn failure(outcome: &BookingOutcome) -> (&str, &str) {
    match &outcome.result {
        OutcomeResult::Failed { kind, stage, .. } => (kind.as_str(), stage.as_str()),
        other => panic!("expected failure, got {:?}", other),
    }
}

async fn ticket_status(store: &InMemoryStore, id: Uuid) -> TicketStatus {
    TicketRepository::get_by_id(store, id).await.unwrap().status
}

#[tokio::test]
async fn test_scenario_a_books_and_holds_both_tickets() {
    let fx = fixture(2).await;
    let (t1, t2) = (fx.tickets[0], fx.tickets[1]);

    let outcome = book(&fx, &fx.u1, vec![t1, t2]).await;
    let booking_id = outcome.booking_id().expect("booking should succeed");

    let booking = fx.processor.get_booking(booking_id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.user_id, fx.u1.id);
    assert_eq!(booking.ticket_ids, vec![t1, t2]);
    assert!((booking.total_amount - 100.0).abs() < f64::EPSILON);
    assert_eq!(booking.expires_at - booking.created_at, chrono::Duration::minutes(15));

    for ticket in [t1, t2] {
        assert_eq!(fx.processor.ticket_locks().holder(ticket).unwrap().holder, fx.u1.id);
        assert_eq!(ticket_status(&fx.store, ticket).await, TicketStatus::Reserved);
    }
}

#[tokio::test]
async fn test_scenario_b_conflicting_booker_leaves_no_residue() {
    let fx = fixture(2).await;
    let (t1, t2) = (fx.tickets[0], fx.tickets[1]);
    assert!(book(&fx, &fx.u1, vec![t1, t2]).await.is_success());

    let outcome = book(&fx, &fx.u2, vec![t1]).await;
    assert_eq!(failure(&outcome), ("lock_conflict", "lock_tickets"));

    assert_eq!(fx.processor.ticket_locks().holder(t1).unwrap().holder, fx.u1.id);
    for ticket in &fx.tickets {
        let holder = fx.processor.ticket_locks().holder(*ticket).map(|l| l.holder);
        assert_ne!(holder, Some(fx.u2.id));
    }
    assert_eq!(fx.store.booking_count().await, 1);
}

#[tokio::test]
async fn test_scenario_c_reserve_failure_rolls_back() {
    let fx = fixture(2).await;
    let t1 = fx.tickets[0];
    let t99 = Uuid::new_v4();

    let outcome = book(&fx, &fx.u1, vec![t1, t99]).await;
    assert_eq!(failure(&outcome), ("persistence_failure", "reserve_tickets"));

    assert!(!fx.processor.ticket_locks().is_locked(t1));
    assert!(!fx.processor.ticket_locks().is_locked(t99));
    assert_eq!(fx.store.booking_count().await, 0);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Available);
}

#[tokio::test]
async fn test_no_leak_when_a_later_ticket_is_held() {
    let fx = fixture(3).await;
    let (t1, t2, t3) = (fx.tickets[0], fx.tickets[1], fx.tickets[2]);
    let other = Uuid::new_v4();
    assert!(fx.processor.ticket_locks().try_acquire(t3, other));

    let outcome = book(&fx, &fx.u1, vec![t1, t2, t3]).await;
    assert_eq!(failure(&outcome), ("lock_conflict", "lock_tickets"));

    assert!(!fx.processor.ticket_locks().is_locked(t1));
    assert!(!fx.processor.ticket_locks().is_locked(t2));
    assert_eq!(fx.processor.ticket_locks().holder(t3).unwrap().holder, other);
}

#[tokio::test]
async fn test_no_leak_when_booking_insert_fails() {
    let fx = fixture(3).await;
    fx.store.fail_next_create_booking();

    let outcome = book(&fx, &fx.u1, fx.tickets.clone()).await;
    assert_eq!(failure(&outcome), ("persistence_failure", "create_booking"));

    for ticket in &fx.tickets {
        assert!(!fx.processor.ticket_locks().is_locked(*ticket));
        assert_eq!(ticket_status(&fx.store, *ticket).await, TicketStatus::Available);
    }
    assert_eq!(fx.store.booking_count().await, 0);

    // The injected failure fires once; the same request now goes through.
    assert!(book(&fx, &fx.u1, fx.tickets.clone()).await.is_success());
}

#[tokio::test]
async fn test_locks_released_even_when_compensating_delete_fails() {
    let fx = fixture(2).await;
    fx.store.fail_next_reserve();
    fx.store.fail_next_delete_booking();

    let outcome = book(&fx, &fx.u1, fx.tickets.clone()).await;
    assert_eq!(failure(&outcome), ("persistence_failure", "reserve_tickets"));
    for ticket in &fx.tickets {
        assert!(!fx.processor.ticket_locks().is_locked(*ticket));
    }
}

#[tokio::test]
async fn test_resubmitting_a_held_ticket_keeps_the_earlier_hold() {
    let fx = fixture(2).await;
    let (t1, t2) = (fx.tickets[0], fx.tickets[1]);
    let first = book(&fx, &fx.u1, vec![t1]).await.booking_id().unwrap();

    // Same booker, same ticket: the lock refreshes, the store refuses.
    let retry = book(&fx, &fx.u1, vec![t1]).await;
    assert_eq!(failure(&retry), ("persistence_failure", "reserve_tickets"));
    assert_eq!(fx.processor.ticket_locks().holder(t1).unwrap().holder, fx.u1.id);

    // Overlapping request: only the newly taken t2 is given back.
    let overlap = book(&fx, &fx.u1, vec![t1, t2]).await;
    assert_eq!(failure(&overlap), ("persistence_failure", "reserve_tickets"));
    assert_eq!(fx.processor.ticket_locks().holder(t1).unwrap().holder, fx.u1.id);
    assert!(!fx.processor.ticket_locks().is_locked(t2));
    assert_eq!(ticket_status(&fx.store, t2).await, TicketStatus::Available);

    let booking = fx.processor.get_booking(first).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(fx.store.booking_count().await, 1);

    // The earlier hold still blocks everyone else.
    let other = book(&fx, &fx.u2, vec![t1]).await;
    assert_eq!(failure(&other), ("lock_conflict", "lock_tickets"));

    let confirmed = fx.processor.confirm_booking(first, fx.u1.id).await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_stored_pricing_sums_ticket_prices_and_fails_on_unknown_ticket() {
    let config = EngineConfig {
        pricing: PricingMode::Stored,
        ..EngineConfig::default()
    };
    let fx = fixture_with(config, 2).await;

    let outcome = book(&fx, &fx.u1, fx.tickets.clone()).await;
    match outcome.result {
        OutcomeResult::Succeeded { total_amount, .. } => {
            assert!((total_amount - 160.0).abs() < 1e-9)
        }
        other => panic!("expected success, got {:?}", other),
    }

    let stray = Uuid::new_v4();
    let outcome = book(&fx, &fx.u2, vec![stray]).await;
    assert_eq!(failure(&outcome), ("persistence_failure", "price_tickets"));
    assert!(!fx.processor.ticket_locks().is_locked(stray));
}

#[tokio::test]
async fn test_unknown_user_or_event_fails_validation_without_locks() {
    let fx = fixture(1).await;
    let t1 = fx.tickets[0];
    let stranger = User::new("nobody@example.com", "Nobody");

    let outcome = book(&fx, &stranger, vec![t1]).await;
    assert_eq!(failure(&outcome), ("validation_failed", "validate_user"));

    let mut rx = fx.processor.subscribe();
    fx.processor
        .submit(BookingRequest::new(fx.u1.id, Uuid::new_v4(), vec![t1]))
        .unwrap();
    let outcome = next_outcome(&mut rx).await;
    assert_eq!(failure(&outcome), ("validation_failed", "validate_event"));

    assert!(!fx.processor.ticket_locks().is_locked(t1));
}

#[tokio::test]
async fn test_submit_rejects_empty_and_duplicate_ticket_lists() {
    let fx = fixture(1).await;
    let t1 = fx.tickets[0];

    let empty = fx
        .processor
        .submit(BookingRequest::new(fx.u1.id, fx.event.id, vec![]));
    assert!(matches!(empty, Err(BookingError::ValidationFailed(_))));

    let duplicate = fx
        .processor
        .submit(BookingRequest::new(fx.u1.id, fx.event.id, vec![t1, t1]));
    assert!(matches!(duplicate, Err(BookingError::ValidationFailed(_))));
}

#[tokio::test]
async fn test_fifo_per_event_first_submitter_wins() {
    let fx = fixture(1).await;
    let t1 = fx.tickets[0];
    let mut rx = fx.processor.subscribe();

    let first = fx
        .processor
        .submit(BookingRequest::new(fx.u1.id, fx.event.id, vec![t1]).with_id("first"))
        .unwrap();
    let second = fx
        .processor
        .submit(BookingRequest::new(fx.u2.id, fx.event.id, vec![t1]).with_id("second"))
        .unwrap();
    assert_eq!(first.queue, second.queue);

    let a = next_outcome(&mut rx).await;
    let b = next_outcome(&mut rx).await;
    assert_eq!(a.request_id, "first");
    assert!(a.is_success());
    assert_eq!(b.request_id, "second");
    assert_eq!(b.failure_kind(), Some("lock_conflict"));
}

#[tokio::test]
async fn test_concurrent_bookers_only_one_wins() {
    let fx = fixture(2).await;
    let mut rx = fx.processor.subscribe();

    let mut submitted = 0;
    for i in 0..20 {
        let user = User::new(format!("fan{}@example.com", i), "Fan");
        UserRepository::create(fx.store.as_ref(), &user).await.unwrap();
        fx.processor
            .submit(BookingRequest::new(user.id, fx.event.id, fx.tickets.clone()))
            .unwrap();
        submitted += 1;
    }

    let mut successes = 0;
    for _ in 0..submitted {
        if next_outcome(&mut rx).await.is_success() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let stats = fx.processor.stats();
    assert_eq!(stats.total_requests, 20);
    assert_eq!(stats.successful_bookings, 1);
    assert_eq!(stats.failed_bookings, 19);
    assert_eq!(stats.lock_stats.active_locks, 2);
}

/// Parks the first `get_by_id` until released, so a queue's worker can be held
/// mid-request.
struct GatedUsers {
    inner: Arc<InMemoryStore>,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedUsers {
    fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl UserRepository for GatedUsers {
    async fn create(&self, user: &User) -> StoreResult<()> {
        UserRepository::create(self.inner.as_ref(), user).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<User> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        UserRepository::get_by_id(self.inner.as_ref(), id).await
    }

    async fn get_by_email(&self, email: &str) -> StoreResult<User> {
        self.inner.get_by_email(email).await
    }
}

async fn gated_fixture(config: EngineConfig) -> (Fixture, Arc<GatedUsers>) {
    let store = Arc::new(InMemoryStore::new());
    let (event, tickets, u1, u2) = seed(&store, 4).await;
    let gate = Arc::new(GatedUsers::new(store.clone()));
    let repos = RepositoryContainer {
        users: gate.clone(),
        events: store.clone(),
        tickets: store.clone(),
        bookings: store.clone() as Arc<dyn BookingRepository>,
    };
    let processor = Arc::new(BookingProcessor::start(config, repos));
    (
        Fixture {
            store,
            processor,
            event,
            tickets,
            u1,
            u2,
        },
        gate,
    )
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let config = EngineConfig {
        queue_count: 1,
        queue_buffer: 2,
        ..EngineConfig::default()
    };
    let (fx, gate) = gated_fixture(config).await;
    let mut rx = fx.processor.subscribe();
    let request = |ticket: Uuid| BookingRequest::new(fx.u1.id, fx.event.id, vec![ticket]);

    fx.processor.submit(request(fx.tickets[0])).unwrap();
    gate.entered.notified().await;

    // Worker is parked on the first request; two more fill the buffer.
    fx.processor.submit(request(fx.tickets[1])).unwrap();
    fx.processor.submit(request(fx.tickets[2])).unwrap();

    let rejected = tokio::time::timeout(Duration::from_millis(200), async {
        fx.processor.submit(request(fx.tickets[3]))
    })
    .await
    .expect("submit must not block");
    assert_eq!(
        rejected,
        Err(BookingError::AdmissionRejected {
            queue: 0,
            capacity: 2
        })
    );
    assert_eq!(fx.processor.stats().rejected_admissions, 1);
    assert_eq!(fx.processor.stats().queue_stats.total_pending, 2);

    gate.release.notify_one();
    for _ in 0..3 {
        assert!(next_outcome(&mut rx).await.is_success());
    }
    assert!(!fx.processor.ticket_locks().is_locked(fx.tickets[3]));
}

#[tokio::test]
async fn test_shutdown_lets_in_flight_request_finish() {
    let (fx, gate) = gated_fixture(EngineConfig::default()).await;
    let mut rx = fx.processor.subscribe();

    fx.processor
        .submit(BookingRequest::new(fx.u1.id, fx.event.id, vec![fx.tickets[0]]))
        .unwrap();
    gate.entered.notified().await;

    let processor = fx.processor.clone();
    let stopping = tokio::spawn(async move { processor.shutdown().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopping.is_finished());
    assert!(matches!(
        fx.processor
            .submit(BookingRequest::new(fx.u2.id, fx.event.id, vec![fx.tickets[1]])),
        Err(BookingError::ShuttingDown)
    ));

    gate.release.notify_one();
    assert!(next_outcome(&mut rx).await.is_success());
    tokio::time::timeout(Duration::from_secs(5), stopping)
        .await
        .expect("shutdown should complete")
        .unwrap();
}

#[tokio::test]
async fn test_confirm_sells_tickets_and_releases_locks() {
    let fx = fixture(2).await;
    let booking_id = book(&fx, &fx.u1, fx.tickets.clone()).await.booking_id().unwrap();

    let forbidden = fx.processor.confirm_booking(booking_id, fx.u2.id).await;
    assert!(matches!(forbidden, Err(BookingError::Forbidden(_))));

    let booking = fx.processor.confirm_booking(booking_id, fx.u1.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    for ticket in &fx.tickets {
        assert!(!fx.processor.ticket_locks().is_locked(*ticket));
        assert_eq!(ticket_status(&fx.store, *ticket).await, TicketStatus::Sold);
    }
    assert_eq!(fx.processor.event_locks().ref_count(fx.event.id), Some(0));

    let again = fx.processor.confirm_booking(booking_id, fx.u1.id).await;
    assert_eq!(
        again.unwrap_err(),
        BookingError::InvalidTransition {
            from: BookingStatus::Confirmed,
            to: BookingStatus::Confirmed
        }
    );

    // Lock is gone but the store still refuses to resell.
    let outcome = book(&fx, &fx.u2, vec![fx.tickets[0]]).await;
    assert_eq!(failure(&outcome), ("persistence_failure", "reserve_tickets"));
}

#[tokio::test]
async fn test_cancel_returns_tickets_to_the_pool() {
    let fx = fixture(1).await;
    let t1 = fx.tickets[0];
    let booking_id = book(&fx, &fx.u1, vec![t1]).await.booking_id().unwrap();

    let booking = fx.processor.cancel_booking(booking_id, fx.u1.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert!(!fx.processor.ticket_locks().is_locked(t1));
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Available);

    assert!(matches!(
        fx.processor.cancel_booking(booking_id, fx.u1.id).await,
        Err(BookingError::InvalidTransition { .. })
    ));

    assert!(book(&fx, &fx.u2, vec![t1]).await.is_success());
    assert_eq!(fx.processor.list_user_bookings(fx.u1.id).await.unwrap().len(), 1);
}

fn is_lifecycle_failure(result: &Result<boxoffice_shared::Booking, BookingError>) -> bool {
    matches!(
        result,
        Err(BookingError::PersistenceFailure {
            stage: Stage::Lifecycle,
            ..
        })
    )
}

async fn booking_status(fx: &Fixture, booking_id: Uuid) -> BookingStatus {
    fx.processor.get_booking(booking_id).await.unwrap().status
}

#[tokio::test]
async fn test_failed_confirm_leaves_booking_retryable() {
    let fx = fixture(1).await;
    let t1 = fx.tickets[0];
    let booking_id = book(&fx, &fx.u1, vec![t1]).await.booking_id().unwrap();

    // Booking row write fails: nothing has moved yet.
    fx.store.fail_next_update_booking();
    let result = fx.processor.confirm_booking(booking_id, fx.u1.id).await;
    assert!(is_lifecycle_failure(&result));
    assert!(result.unwrap_err().is_retryable());
    assert_eq!(booking_status(&fx, booking_id).await, BookingStatus::Pending);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Reserved);
    assert!(fx.processor.ticket_locks().is_locked(t1));

    // Ticket move fails after the booking row was written: the row goes back.
    fx.store.fail_next_confirm();
    let result = fx.processor.confirm_booking(booking_id, fx.u1.id).await;
    assert!(is_lifecycle_failure(&result));
    assert_eq!(booking_status(&fx, booking_id).await, BookingStatus::Pending);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Reserved);
    assert!(fx.processor.ticket_locks().is_locked(t1));

    let booking = fx.processor.confirm_booking(booking_id, fx.u1.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Sold);
    assert!(!fx.processor.ticket_locks().is_locked(t1));
}

#[tokio::test]
async fn test_failed_cancel_leaves_booking_retryable() {
    let fx = fixture(1).await;
    let t1 = fx.tickets[0];
    let booking_id = book(&fx, &fx.u1, vec![t1]).await.booking_id().unwrap();

    fx.store.fail_next_update_booking();
    let result = fx.processor.cancel_booking(booking_id, fx.u1.id).await;
    assert!(is_lifecycle_failure(&result));
    assert_eq!(booking_status(&fx, booking_id).await, BookingStatus::Pending);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Reserved);

    fx.store.fail_next_release();
    let result = fx.processor.cancel_booking(booking_id, fx.u1.id).await;
    assert!(is_lifecycle_failure(&result));
    assert_eq!(booking_status(&fx, booking_id).await, BookingStatus::Pending);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Reserved);
    assert!(fx.processor.ticket_locks().is_locked(t1));

    let booking = fx.processor.cancel_booking(booking_id, fx.u1.id).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(ticket_status(&fx.store, t1).await, TicketStatus::Available);
    assert!(!fx.processor.ticket_locks().is_locked(t1));
}

#[tokio::test]
async fn test_concurrent_confirm_and_cancel_serialize_per_event() {
    let fx = fixture(2).await;
    let booking_id = book(&fx, &fx.u1, fx.tickets.clone()).await.booking_id().unwrap();

    let (confirm, cancel) = tokio::join!(
        fx.processor.confirm_booking(booking_id, fx.u1.id),
        fx.processor.cancel_booking(booking_id, fx.u1.id),
    );
    assert!(confirm.is_ok() != cancel.is_ok(), "exactly one transition must win");

    let loser = confirm.err().or(cancel.err()).unwrap();
    assert!(matches!(loser, BookingError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_confirm_after_hold_expired() {
    let config = EngineConfig {
        booking_hold: Duration::ZERO,
        ..EngineConfig::default()
    };
    let fx = fixture_with(config, 1).await;
    let booking_id = book(&fx, &fx.u1, fx.tickets.clone()).await.booking_id().unwrap();

    assert_eq!(
        fx.processor.confirm_booking(booking_id, fx.u1.id).await,
        Err(BookingError::Expired(booking_id))
    );
}

#[tokio::test]
async fn test_lifecycle_not_found() {
    let fx = fixture(1).await;
    let missing = Uuid::new_v4();

    assert!(matches!(
        fx.processor.get_booking(missing).await,
        Err(BookingError::NotFound(_))
    ));
    assert!(matches!(
        fx.processor.confirm_booking(missing, fx.u1.id).await,
        Err(BookingError::NotFound(_))
    ));
    assert!(matches!(
        fx.processor.list_user_bookings(Uuid::new_v4()).await,
        Err(BookingError::NotFound(_))
    ));
}

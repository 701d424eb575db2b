use boxoffice_core::{RepositoryContainer, StoreError};
use boxoffice_shared::{Booking, BookingOutcome, BookingRequest, OutcomeResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{to_chrono, EngineConfig, PricingMode};
use crate::error::{BookingError, Stage};
use crate::event_locks::EventLockTable;
use crate::periodic::{shutdown_channel, PeriodicTask, ShutdownSignal, ShutdownTrigger};
use crate::pricing::{FlatRate, PricingRule, StoredPrice};
use crate::queue::AdmissionQueues;
use crate::stats::{BookingStats, ProcessorStats};
use crate::ticket_locks::{Acquired, TicketLockTable};

/// Receipt for an admitted request. The booking itself happens later on the
/// queue's worker; watch `subscribe()` for the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub request_id: String,
    pub queue: usize,
}

struct Background {
    workers: Vec<JoinHandle<()>>,
    ticket_sweep: PeriodicTask,
}

/// The booking engine: admission queues, one worker per queue, and the two
/// lock tables the workers share.
///
/// Construct with `start` inside a tokio runtime and stop with `shutdown`.
pub struct BookingProcessor {
    pub(crate) repos: RepositoryContainer,
    queues: AdmissionQueues,
    pub(crate) ticket_locks: Arc<TicketLockTable>,
    pub(crate) event_locks: Arc<EventLockTable>,
    stats: Arc<BookingStats>,
    outcomes: broadcast::Sender<BookingOutcome>,
    shutdown: ShutdownTrigger,
    background: Mutex<Option<Background>>,
}

impl BookingProcessor {
    /// Starts the engine with the pricing rule named in `config`.
    pub fn start(config: EngineConfig, repos: RepositoryContainer) -> Self {
        let pricing: Arc<dyn PricingRule> = match config.pricing {
            PricingMode::Flat => Arc::new(FlatRate::new(config.unit_price)),
            PricingMode::Stored => Arc::new(StoredPrice::new(repos.tickets.clone())),
        };
        Self::start_with_pricing(config, repos, pricing)
    }

    pub fn start_with_pricing(
        config: EngineConfig,
        repos: RepositoryContainer,
        pricing: Arc<dyn PricingRule>,
    ) -> Self {
        let (queues, receivers) = AdmissionQueues::new(config.queue_count, config.queue_buffer);
        let ticket_locks = Arc::new(TicketLockTable::new(to_chrono(config.ticket_lock_ttl)));
        let event_locks = EventLockTable::start(
            to_chrono(config.event_lock_ttl),
            to_chrono(config.event_lock_max_idle),
            config.sweep_interval,
        );
        let stats = Arc::new(BookingStats::new());
        let (outcomes, _) = broadcast::channel(config.outcome_buffer.max(1));
        let (shutdown, signal) = shutdown_channel();

        let worker = Worker {
            repos: repos.clone(),
            ticket_locks: ticket_locks.clone(),
            pricing,
            stats: stats.clone(),
            outcomes: outcomes.clone(),
            hold: to_chrono(config.booking_hold),
        };

        let workers = receivers
            .into_iter()
            .enumerate()
            .map(|(index, rx)| {
                let worker = worker.clone();
                let signal = signal.clone();
                tokio::spawn(async move { worker.run(index, rx, signal).await })
            })
            .collect();

        let sweep_locks = ticket_locks.clone();
        let ticket_sweep = PeriodicTask::spawn(
            "ticket_lock_sweep",
            config.sweep_interval,
            signal,
            move || {
                let removed = sweep_locks.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired ticket locks");
                }
            },
        );

        info!(
            queues = queues.queue_count(),
            buffer = queues.capacity(),
            pricing = worker.pricing.name(),
            "Booking processor started"
        );

        Self {
            repos,
            queues,
            ticket_locks,
            event_locks,
            stats,
            outcomes,
            shutdown,
            background: Mutex::new(Some(Background {
                workers,
                ticket_sweep,
            })),
        }
    }

    /// Admits a request onto its event's queue. Never waits: a full queue is
    /// an immediate `AdmissionRejected`.
    pub fn submit(&self, request: BookingRequest) -> Result<Admission, BookingError> {
        if self.shutdown.is_triggered() {
            return Err(BookingError::ShuttingDown);
        }
        if request.ticket_ids.is_empty() {
            return Err(BookingError::ValidationFailed(
                "booking request names no tickets".to_string(),
            ));
        }
        if let Some(ticket_id) = request.duplicate_ticket() {
            return Err(BookingError::ValidationFailed(format!(
                "ticket {} requested more than once",
                ticket_id
            )));
        }

        let request_id = request.id.clone();
        let event_id = request.event_id;
        match self.queues.enqueue(request) {
            Ok(queue) => Ok(Admission { request_id, queue }),
            Err(e) => {
                if let BookingError::AdmissionRejected { queue, capacity } = &e {
                    self.stats.record_rejection();
                    warn!(
                        request_id = %request_id,
                        event_id = %event_id,
                        queue = *queue,
                        capacity = *capacity,
                        "Admission rejected: queue full"
                    );
                }
                Err(e)
            }
        }
    }

    /// Outcomes of requests completed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<BookingOutcome> {
        self.outcomes.subscribe()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats.snapshot(
            self.queues.stats(),
            self.ticket_locks.stats(),
            self.event_locks.stats(),
        )
    }

    pub fn ticket_locks(&self) -> &TicketLockTable {
        &self.ticket_locks
    }

    pub fn event_locks(&self) -> &EventLockTable {
        &self.event_locks
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }

    /// Stops the workers and sweeps and waits for them. Requests still queued
    /// are dropped; a request a worker already started runs to completion.
    /// Callers bound the wait with their own timeout.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();

        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(background) = background {
            for (index, handle) in background.workers.into_iter().enumerate() {
                if let Err(e) = handle.await {
                    error!(queue = index, error = %e, "Queue worker ended abnormally");
                }
            }
            background.ticket_sweep.join().await;
        }

        self.event_locks.shutdown().await;
        info!("Booking processor stopped");
    }
}

/// A failed protocol step and where it happened.
struct Failure {
    stage: Stage,
    error: BookingError,
}

impl Failure {
    fn new(stage: Stage, error: BookingError) -> Self {
        Self { stage, error }
    }

    fn store(stage: Stage, source: StoreError) -> Self {
        Self::new(stage, BookingError::persistence(stage, source))
    }
}

/// Everything a queue worker needs. One clone per queue.
#[derive(Clone)]
struct Worker {
    repos: RepositoryContainer,
    ticket_locks: Arc<TicketLockTable>,
    pricing: Arc<dyn PricingRule>,
    stats: Arc<BookingStats>,
    outcomes: broadcast::Sender<BookingOutcome>,
    hold: chrono::Duration,
}

impl Worker {
    async fn run(
        self,
        index: usize,
        mut rx: mpsc::Receiver<BookingRequest>,
        mut shutdown: ShutdownSignal,
    ) {
        debug!(queue = index, "Queue worker started");
        loop {
            // Shutdown is only observed between requests, so a request that
            // has started always finishes its own release path.
            let request = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                next = rx.recv() => match next {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle(index, request).await;
        }
        debug!(queue = index, "Queue worker stopped");
    }

    async fn handle(&self, queue: usize, request: BookingRequest) {
        let started = Instant::now();
        self.stats.record_request();

        let result = match self.process(&request).await {
            Ok(booking) => {
                self.stats.record_success();
                info!(
                    request_id = %request.id,
                    booking_id = %booking.id,
                    booker_id = %request.user_id,
                    event_id = %request.event_id,
                    tickets = request.ticket_ids.len(),
                    queue,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Booking created"
                );
                OutcomeResult::Succeeded {
                    booking_id: booking.id,
                    total_amount: booking.total_amount,
                    expires_at: booking.expires_at.timestamp(),
                }
            }
            Err(Failure { stage, error }) => {
                self.stats.record_failure();
                match &error {
                    BookingError::PersistenceFailure { .. } => error!(
                        request_id = %request.id,
                        booker_id = %request.user_id,
                        event_id = %request.event_id,
                        ticket_ids = ?request.ticket_ids,
                        stage = stage.as_str(),
                        error = %error,
                        "Booking failed"
                    ),
                    _ => warn!(
                        request_id = %request.id,
                        booker_id = %request.user_id,
                        event_id = %request.event_id,
                        ticket_ids = ?request.ticket_ids,
                        stage = stage.as_str(),
                        error = %error,
                        "Booking rejected"
                    ),
                }
                OutcomeResult::Failed {
                    kind: error.kind().to_string(),
                    stage: stage.as_str().to_string(),
                    message: error.to_string(),
                }
            }
        };

        // No subscribers is fine.
        let _ = self.outcomes.send(BookingOutcome {
            request_id: request.id,
            user_id: request.user_id,
            event_id: request.event_id,
            ticket_ids: request.ticket_ids,
            result,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now().timestamp(),
        });
    }

    /// Validate, lock, price, persist, reserve. Every exit after the locks are
    /// taken releases the ones this request took (and the booking record, if
    /// one was written). Locks the booker already held, e.g. for an earlier
    /// pending booking of the same ticket, are only refreshed and stay put.
    async fn process(&self, request: &BookingRequest) -> Result<Booking, Failure> {
        self.repos
            .users
            .get_by_id(request.user_id)
            .await
            .map_err(|e| lookup_failure(Stage::ValidateUser, e))?;
        self.repos
            .events
            .get_by_id(request.event_id)
            .await
            .map_err(|e| lookup_failure(Stage::ValidateEvent, e))?;

        let taken = self.lock_tickets(request)?;

        let total_amount = match self.pricing.price(&request.ticket_ids).await {
            Ok(total) => total,
            Err(e) => {
                self.release_locks(request, &taken, Stage::PriceTickets);
                return Err(Failure::store(Stage::PriceTickets, e));
            }
        };

        let booking = Booking::pending(
            request.user_id,
            request.event_id,
            request.ticket_ids.clone(),
            total_amount,
            self.hold,
        );

        if let Err(e) = self.repos.bookings.create(&booking).await {
            self.release_locks(request, &taken, Stage::CreateBooking);
            return Err(Failure::store(Stage::CreateBooking, e));
        }

        if let Err(e) = self.repos.tickets.reserve_tickets(&request.ticket_ids).await {
            if let Err(delete_err) = self.repos.bookings.delete(booking.id).await {
                error!(
                    request_id = %request.id,
                    booking_id = %booking.id,
                    error = %delete_err,
                    "Compensation failed: could not delete booking record"
                );
            }
            self.release_locks(request, &taken, Stage::ReserveTickets);
            return Err(Failure::store(Stage::ReserveTickets, e));
        }

        Ok(booking)
    }

    /// Try-locks every ticket in request order and returns the ones newly
    /// taken. On the first conflict those are released and nothing further is
    /// attempted.
    fn lock_tickets(&self, request: &BookingRequest) -> Result<Vec<Uuid>, Failure> {
        let mut taken = Vec::with_capacity(request.ticket_ids.len());
        for ticket_id in &request.ticket_ids {
            match self.ticket_locks.acquire(*ticket_id, request.user_id) {
                Some(Acquired::New) => taken.push(*ticket_id),
                Some(Acquired::Refreshed) => {}
                None => {
                    let released = self.ticket_locks.release_all(&taken, request.user_id);
                    debug!(
                        request_id = %request.id,
                        ticket_id = %ticket_id,
                        released,
                        "Backed off after lock conflict"
                    );
                    return Err(Failure::new(
                        Stage::LockTickets,
                        BookingError::LockConflict {
                            ticket_id: *ticket_id,
                        },
                    ));
                }
            }
        }
        Ok(taken)
    }

    fn release_locks(&self, request: &BookingRequest, taken: &[Uuid], stage: Stage) {
        let released = self.ticket_locks.release_all(taken, request.user_id);
        debug!(
            request_id = %request.id,
            stage = stage.as_str(),
            released,
            "Released ticket locks"
        );
    }
}

fn lookup_failure(stage: Stage, source: StoreError) -> Failure {
    match source {
        StoreError::NotFound { .. } => {
            Failure::new(stage, BookingError::ValidationFailed(source.to_string()))
        }
        other => Failure::store(stage, other),
    }
}

use boxoffice_shared::BookingRequest;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::error::BookingError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Queue index for an event. Pure function of the id and the queue count, so
/// every request for one event lands on the same queue for the process lifetime.
pub fn route(event_id: &Uuid, queue_count: usize) -> usize {
    let count = queue_count.max(1) as u64;
    (fnv1a(event_id.as_bytes()) % count) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub index: usize,
    pub length: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSetStats {
    pub total_queues: usize,
    pub total_pending: usize,
    pub queues: Vec<QueueStats>,
}

/// N bounded FIFO queues with event-sticky routing.
///
/// Many producers, one consumer per queue. `enqueue` never waits: a full
/// queue is reported straight back to the submitter.
pub struct AdmissionQueues {
    senders: Vec<mpsc::Sender<BookingRequest>>,
    capacity: usize,
}

impl AdmissionQueues {
    /// Builds the queue set and hands back the receiving ends, one per queue,
    /// in index order. Counts and buffers of zero are bumped to one.
    pub fn new(queue_count: usize, buffer: usize) -> (Self, Vec<mpsc::Receiver<BookingRequest>>) {
        let capacity = buffer.max(1);
        let (senders, receivers) = (0..queue_count.max(1))
            .map(|_| mpsc::channel(capacity))
            .unzip();

        (Self { senders, capacity }, receivers)
    }

    pub fn queue_count(&self) -> usize {
        self.senders.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn route(&self, event_id: &Uuid) -> usize {
        route(event_id, self.senders.len())
    }

    /// Pushes onto the event's queue; returns the queue index it landed on.
    pub fn enqueue(&self, request: BookingRequest) -> Result<usize, BookingError> {
        let index = self.route(&request.event_id);
        let request_id = request.id.clone();
        let event_id = request.event_id;

        match self.senders[index].try_send(request) {
            Ok(()) => {
                debug!(
                    request_id = %request_id,
                    event_id = %event_id,
                    queue = index,
                    "Booking request enqueued"
                );
                Ok(index)
            }
            Err(TrySendError::Full(_)) => Err(BookingError::AdmissionRejected {
                queue: index,
                capacity: self.capacity,
            }),
            Err(TrySendError::Closed(_)) => Err(BookingError::ShuttingDown),
        }
    }

    pub fn pending(&self, index: usize) -> usize {
        self.senders
            .get(index)
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> QueueSetStats {
        let queues: Vec<QueueStats> = (0..self.senders.len())
            .map(|index| QueueStats {
                index,
                length: self.pending(index),
                capacity: self.capacity,
            })
            .collect();

        QueueSetStats {
            total_queues: queues.len(),
            total_pending: queues.iter().map(|q| q.length).sum(),
            queues,
        }
    }
}

//! Booking lifecycle after creation: lookups, confirm and cancel.
//!
//! Confirm and cancel are where a successful booking's ticket locks are given
//! back. Both run under the event's lock so they serialize with each other for
//! the same event.

use boxoffice_core::StoreError;
use boxoffice_shared::{Booking, BookingStatus};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{BookingError, BookingResult, Stage};
use crate::processor::BookingProcessor;

fn store_error(source: StoreError) -> BookingError {
    match source {
        StoreError::NotFound { entity, id } => BookingError::NotFound(format!("{} {}", entity, id)),
        other => BookingError::persistence(Stage::Lifecycle, other),
    }
}

impl BookingProcessor {
    pub async fn get_booking(&self, booking_id: Uuid) -> BookingResult<Booking> {
        self.repos
            .bookings
            .get_by_id(booking_id)
            .await
            .map_err(store_error)
    }

    pub async fn list_user_bookings(&self, user_id: Uuid) -> BookingResult<Vec<Booking>> {
        self.repos.users.get_by_id(user_id).await.map_err(store_error)?;
        self.repos
            .bookings
            .list_by_user(user_id)
            .await
            .map_err(store_error)
    }

    /// pending → confirmed. Sells the tickets and drops the booker's locks on them.
    pub async fn confirm_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
    ) -> BookingResult<Booking> {
        let event_id = self.owned_booking(booking_id, user_id).await?.event_id;
        let _event = self.event_locks.lock(event_id).await;

        // Re-read under the event lock; a concurrent cancel may have won.
        let booking = self.owned_booking(booking_id, user_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(BookingError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Confirmed,
            });
        }
        if booking.is_expired_at(Utc::now()) {
            return Err(BookingError::Expired(booking.id));
        }

        let booking = self.settle(booking, BookingStatus::Confirmed).await?;

        let released = self.ticket_locks.release_all(&booking.ticket_ids, user_id);
        info!(
            booking_id = %booking.id,
            booker_id = %user_id,
            event_id = %booking.event_id,
            released,
            "Booking confirmed"
        );
        Ok(booking)
    }

    /// pending → cancelled. Returns the tickets to the pool.
    pub async fn cancel_booking(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
    ) -> BookingResult<Booking> {
        let event_id = self.owned_booking(booking_id, user_id).await?.event_id;
        let _event = self.event_locks.lock(event_id).await;

        let booking = self.owned_booking(booking_id, user_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(BookingError::InvalidTransition {
                from: booking.status,
                to: BookingStatus::Cancelled,
            });
        }

        let booking = self.settle(booking, BookingStatus::Cancelled).await?;

        let released = self.ticket_locks.release_all(&booking.ticket_ids, user_id);
        info!(
            booking_id = %booking.id,
            booker_id = %user_id,
            event_id = %booking.event_id,
            released,
            "Booking cancelled"
        );
        Ok(booking)
    }

    /// Writes the booking's new status, then moves its tickets to match
    /// (`sold` on confirm, `available` on cancel). If the tickets can't move,
    /// the booking row is put back so the call can be retried as is.
    async fn settle(&self, booking: Booking, to: BookingStatus) -> BookingResult<Booking> {
        let mut settled = booking.clone();
        settled.update_status(to);
        self.repos
            .bookings
            .update(&settled)
            .await
            .map_err(|e| BookingError::persistence(Stage::Lifecycle, e))?;

        let moved = match to {
            BookingStatus::Confirmed => {
                self.repos.tickets.confirm_tickets(&booking.ticket_ids).await
            }
            _ => self.repos.tickets.release_tickets(&booking.ticket_ids).await,
        };

        if let Err(e) = moved {
            if let Err(revert_err) = self.repos.bookings.update(&booking).await {
                error!(
                    booking_id = %booking.id,
                    status = %to,
                    error = %revert_err,
                    "Could not restore booking after ticket update failed"
                );
            }
            return Err(BookingError::persistence(Stage::Lifecycle, e));
        }
        Ok(settled)
    }

    async fn owned_booking(&self, booking_id: Uuid, user_id: Uuid) -> BookingResult<Booking> {
        let booking = self.get_booking(booking_id).await?;
        if booking.user_id != user_id {
            return Err(BookingError::Forbidden(format!(
                "booking {} belongs to another user",
                booking_id
            )));
        }
        Ok(booking)
    }
}

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::admission::stay_price;
use super::conflict::{
    check_capacity, check_no_conflict, now, validate_occupants, validate_phone, validate_span,
};
use super::lifecycle::{check_patch_allowed, check_review_allowed, check_transition};
use super::{Engine, EngineError, RoomGuards, WalCommand};

impl Engine {
    pub async fn change_status(
        &self,
        booking_id: Ulid,
        to: BookingStatus,
        role: ActorRole,
    ) -> Result<Booking, EngineError> {
        self.change_status_at(booking_id, to, role, now()).await
    }

    pub async fn change_status_at(
        &self,
        booking_id: Ulid,
        to: BookingStatus,
        role: ActorRole,
        now: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.enter().await?;
        let mut booking = self.lock_booking(booking_id).await?;
        check_transition(&booking, to, role, now)?;

        // Leaving the active set frees the room, so its index must move too.
        let mut rooms = self.write_rooms(booking.room_id).await?;
        let from = booking.status;
        let next = Booking {
            status: to,
            ..booking.clone()
        };
        self.commit_booking(&mut booking, next, &mut rooms).await?;

        tracing::info!("booking {booking_id}: {from} -> {to}");
        Ok(booking.clone())
    }

    pub async fn update_booking_dates(
        &self,
        booking_id: Ulid,
        check_in: Day,
        check_out: Day,
    ) -> Result<Booking, EngineError> {
        let patch = BookingPatch {
            check_in: Some(check_in),
            check_out: Some(check_out),
            ..Default::default()
        };
        self.update_booking(booking_id, patch).await
    }

    pub async fn mark_paid(&self, booking_id: Ulid, paid: bool) -> Result<Booking, EngineError> {
        let patch = BookingPatch {
            is_paid: Some(paid),
            ..Default::default()
        };
        self.update_booking(booking_id, patch).await
    }

    /// Apply a field-level update as one event.
    ///
    /// A terminal booking accepts the payment flag only. New dates on a booking
    /// with a room are re-checked against that room, excluding the booking
    /// itself. Without an explicit price, a date change reprices at the room
    /// type's current nightly rate.
    pub async fn update_booking(
        &self,
        booking_id: Ulid,
        patch: BookingPatch,
    ) -> Result<Booking, EngineError> {
        if patch.is_empty() {
            return Err(EngineError::Validation("no fields to update".into()));
        }
        if let Some(phone) = &patch.phone {
            validate_phone(phone)?;
        }
        if patch.total_price.is_some_and(|p| p > MAX_PRICE) {
            return Err(EngineError::LimitExceeded("total price too large"));
        }

        let _gate = self.enter().await?;
        let mut booking = self.lock_booking(booking_id).await?;
        check_patch_allowed(&booking, &patch)?;

        let mut next = booking.clone();
        if patch.changes_dates() {
            next.span = validate_span(
                patch.check_in.unwrap_or(booking.span.start),
                patch.check_out.unwrap_or(booking.span.end),
            )?;
        }
        if let Some(phone) = &patch.phone {
            next.phone = phone.clone();
        }
        if patch.adults.is_some() || patch.children.is_some() {
            next.adults = patch.adults.unwrap_or(next.adults);
            next.children = patch.children.unwrap_or(next.children);
            validate_occupants(next.adults, next.children)?;
            let room_type = self
                .get_room_type(&next.room_type_id)
                .ok_or(EngineError::NotFound(next.room_type_id))?;
            check_capacity(&room_type, next.adults, next.children)?;
        }
        if let Some(paid) = patch.is_paid {
            next.is_paid = paid;
        }
        match patch.total_price {
            Some(price) => next.total_price = price,
            None if next.span != booking.span => {
                let room_type = self
                    .get_room_type(&next.room_type_id)
                    .ok_or(EngineError::NotFound(next.room_type_id))?;
                next.total_price = stay_price(&next.span, room_type.price)?;
            }
            None => {}
        }

        let mut rooms = match next.footprint() {
            Some((room_id, span)) if span != booking.span => {
                let rooms = self.write_rooms([room_id]).await?;
                let rs = rooms.get(&room_id).ok_or(EngineError::NotFound(room_id))?;
                check_no_conflict(rs, &span, Some(booking_id))?;
                rooms
            }
            _ => RoomGuards::none(),
        };
        self.commit_booking(&mut booking, next, &mut rooms).await?;

        tracing::info!(
            "booking {booking_id} updated: {}",
            patch.touched_fields().join(", ")
        );
        Ok(booking.clone())
    }

    pub async fn submit_review(
        &self,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Review, EngineError> {
        if !(MIN_RATING..=MAX_RATING).contains(&rating) {
            return Err(EngineError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
        if comment.as_ref().is_some_and(|c| c.len() > MAX_COMMENT_LEN) {
            return Err(EngineError::LimitExceeded("review comment too long"));
        }

        let _gate = self.enter().await?;
        let mut booking = self.lock_booking(booking_id).await?;
        check_review_allowed(&booking)?;

        let review = Review {
            booking_id,
            rating,
            comment,
        };
        let event = Event::ReviewSubmitted {
            review: review.clone(),
        };
        self.wal_append(&event).await?;
        booking.is_reviewed = true;
        self.reviews.insert(booking_id, review.clone());
        Ok(review)
    }

    /// Remove a booking and its review. Frees its room immediately.
    pub async fn delete_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let _gate = self.enter().await?;
        let booking = self.lock_booking(booking_id).await?;
        let mut rooms = self.write_rooms(booking.room_id).await?;

        let event = Event::BookingDeleted { id: booking_id };
        self.wal_append(&event).await?;
        rooms.reindex(Some(&*booking), None);
        self.bookings.remove(&booking_id);
        self.reviews.remove(&booking_id);

        tracing::info!("booking {booking_id} deleted");
        Ok(())
    }

    // ── Compaction ────────────────────────────────────────

    /// Rewrite the WAL as a snapshot of current state.
    ///
    /// Holds the commit gate exclusively: in-flight mutations finish first and new
    /// ones wait, so no event can land in the old log after the snapshot is taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self
            .bounded("compaction could not quiesce writers", self.commit_gate.write())
            .await?;

        let mut events = Vec::new();
        for entry in self.users.iter() {
            events.push(Event::UserRegistered {
                id: entry.id,
                name: entry.name.clone(),
            });
        }
        for entry in self.room_types.iter() {
            events.push(Event::RoomTypeSaved {
                room_type: entry.value().clone(),
            });
        }

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.id,
                room_type_id: guard.room_type_id,
                number: guard.number.clone(),
                active: guard.active,
            });
        }

        for entry in self.images.iter() {
            events.push(Event::ImageAdded {
                image: entry.value().clone(),
            });
        }

        let mut bookings: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut snapshot = Vec::with_capacity(bookings.len());
        for slot in bookings.drain(..) {
            snapshot.push(slot.lock().await.clone());
        }
        snapshot.sort_by_key(|b| b.id);
        for booking in snapshot {
            events.push(Event::BookingWritten { booking });
        }

        for entry in self.reviews.iter() {
            events.push(Event::ReviewSubmitted {
                review: entry.value().clone(),
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

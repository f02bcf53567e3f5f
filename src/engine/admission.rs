use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::limits::{MAX_BOOKINGS_PER_TENANT, MAX_PRICE};
use crate::model::*;
use crate::observability::ADMISSIONS_TOTAL;

use super::conflict::{check_capacity, now, validate_occupants, validate_phone, validate_span};
use super::{Engine, EngineError};

/// `nights × nightly`, refusing anything above `MAX_PRICE`.
pub(super) fn stay_price(span: &Span, nightly: u64) -> Result<u64, EngineError> {
    u64::try_from(span.nights())
        .ok()
        .and_then(|n| n.checked_mul(nightly))
        .filter(|total| *total <= MAX_PRICE)
        .ok_or(EngineError::LimitExceeded("total price overflows"))
}

impl Engine {
    /// Admit a stay request as a `pending` booking with no room bound.
    pub async fn create_booking(
        &self,
        id: Ulid,
        user_id: Ulid,
        request: StayRequest,
    ) -> Result<Admission, EngineError> {
        self.create_booking_at(id, user_id, request, now()).await
    }

    pub async fn create_booking_at(
        &self,
        id: Ulid,
        user_id: Ulid,
        request: StayRequest,
        now: DateTime<Utc>,
    ) -> Result<Admission, EngineError> {
        let result = self.admit(id, user_id, request, now).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(EngineError::CapacityExceeded { .. }) => "over_capacity",
            Err(EngineError::NoAvailability { .. }) => "sold_out",
            Err(_) => "rejected",
        };
        metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        result
    }

    async fn admit(
        &self,
        id: Ulid,
        user_id: Ulid,
        request: StayRequest,
        now: DateTime<Utc>,
    ) -> Result<Admission, EngineError> {
        validate_phone(&request.phone)?;
        validate_occupants(request.adults, request.children)?;
        let span = validate_span(request.check_in, request.check_out)?;
        if span.start < now.date_naive() {
            return Err(EngineError::Validation(format!(
                "check-in date {} is in the past",
                span.start
            )));
        }
        if self.bookings.len() >= MAX_BOOKINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        if !self.users.contains_key(&user_id) {
            return Err(EngineError::NotFound(user_id));
        }
        let room_type = self
            .get_room_type(&request.room_type_id)
            .ok_or(EngineError::NotFound(request.room_type_id))?;
        check_capacity(&room_type, request.adults, request.children)?;

        // Advisory: nothing is reserved until a room is assigned.
        let availability = self.availability_for(room_type.id, span, None).await?;
        if availability.rooms.is_empty() {
            tracing::debug!("no {} rooms free for {span}", room_type.name);
            return Err(EngineError::NoAvailability {
                room_type_id: room_type.id,
            });
        }

        let booking = Booking {
            id,
            user_id,
            room_type_id: room_type.id,
            room_id: None,
            status: BookingStatus::Pending,
            span,
            adults: request.adults,
            children: request.children,
            phone: request.phone,
            total_price: stay_price(&span, room_type.price)?,
            is_paid: false,
            is_reviewed: false,
        };

        let _gate = self.enter().await?;
        // The slot stays locked until the append resolves, so nobody mutates a
        // booking that may still be rolled back.
        let slot = Arc::new(Mutex::new(booking.clone()));
        let _held = slot.clone().lock_owned().await;
        match self.bookings.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(v) => {
                v.insert(slot);
            }
        }
        let event = Event::BookingWritten {
            booking: booking.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.bookings.remove(&id);
            return Err(e);
        }

        tracing::info!(
            "booking {id} admitted: {} x{} nights, total {}",
            room_type.name,
            span.nights(),
            booking.total_price
        );
        Ok(Admission {
            nights: span.nights(),
            available_rooms: availability.count(),
            booking,
        })
    }
}

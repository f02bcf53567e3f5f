use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

use super::availability::available_rooms;
use super::conflict::{now, validate_span};
use super::lifecycle::{check_review_allowed, check_transition};
use super::{Engine, EngineError};

impl Engine {
    /// Rooms of `room_type_id` free for `[check_in, check_out)`.
    /// No today-or-later rule here: reschedule and assignment flows query past stays too.
    pub async fn check_availability(
        &self,
        room_type_id: Ulid,
        check_in: Day,
        check_out: Day,
        exclude_booking_id: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let span = validate_span(check_in, check_out)?;
        if !self.room_types.contains_key(&room_type_id) {
            return Err(EngineError::NotFound(room_type_id));
        }
        self.availability_for(room_type_id, span, exclude_booking_id)
            .await
    }

    pub(super) async fn availability_for(
        &self,
        room_type_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let mut ids = self
            .rooms_by_type
            .get(&room_type_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();
        // Same order writers lock in.
        ids.sort();

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(guard) = self.read_room(id).await? {
                guards.push(guard);
            }
        }
        let rooms = available_rooms(guards.iter().map(|g| &**g), &span, exclude);
        Ok(Availability {
            room_type_id,
            span,
            rooms,
        })
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let slot = self.get_booking_slot(&id).ok_or(EngineError::NotFound(id))?;
        let guard = self.bounded("booking lock timed out", slot.lock()).await?;
        Ok(guard.clone())
    }

    pub async fn booking_detail(
        &self,
        id: Ulid,
        role: ActorRole,
    ) -> Result<BookingDetail, EngineError> {
        self.booking_detail_at(id, role, now()).await
    }

    /// `can_cancel` runs the same guards a cancellation by `role` would at `now`.
    pub async fn booking_detail_at(
        &self,
        id: Ulid,
        role: ActorRole,
        now: DateTime<Utc>,
    ) -> Result<BookingDetail, EngineError> {
        let booking = self.get_booking(id).await?;
        let can_cancel = check_transition(&booking, BookingStatus::Cancelled, role, now).is_ok();
        let can_review = check_review_allowed(&booking).is_ok();
        let days_until_check_in = booking
            .span
            .start
            .signed_duration_since(now.date_naive())
            .num_days();
        Ok(BookingDetail {
            booking,
            can_cancel,
            can_review,
            days_until_check_in,
        })
    }

    /// Bookings matching `filter`, newest first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        let slots: Vec<_> = match filter.id {
            Some(id) => self.get_booking_slot(&id).into_iter().collect(),
            None => self.bookings.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for slot in slots {
            let guard = self.bounded("booking lock timed out", slot.lock()).await?;
            if filter.matches(&guard) {
                out.push(guard.clone());
            }
        }
        out.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(out)
    }

    pub async fn list_rooms(&self, room_type_id: Option<Ulid>) -> Result<Vec<RoomInfo>, EngineError> {
        let mut ids: Vec<Ulid> = match room_type_id {
            Some(rt) => self
                .rooms_by_type
                .get(&rt)
                .map(|ids| ids.value().clone())
                .unwrap_or_default(),
            None => self.rooms.iter().map(|e| *e.key()).collect(),
        };
        ids.sort();
        let mut out = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Some(guard) = self.read_room(id).await? {
                out.push(guard.info());
            }
        }
        out.sort_by(|a, b| {
            a.room_type_id
                .cmp(&b.room_type_id)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(out)
    }

    pub fn list_room_types(&self) -> Vec<RoomType> {
        let mut out: Vec<RoomType> = self.room_types.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|rt| rt.id);
        out
    }

    pub fn list_images(&self, room_type_id: Option<Ulid>) -> Vec<RoomImage> {
        let mut out: Vec<RoomImage> = self
            .images
            .iter()
            .filter(|img| room_type_id.is_none_or(|rt| img.room_type_id == rt))
            .map(|img| img.value().clone())
            .collect();
        out.sort_by_key(|img| img.id);
        out
    }

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    /// User a login name stands for: a registered user id, or else the
    /// oldest user whose name matches case-insensitively.
    pub fn user_for_login(&self, login: &str) -> Option<Ulid> {
        if let Ok(id) = Ulid::from_string(login)
            && self.users.contains_key(&id)
        {
            return Some(id);
        }
        self.users
            .iter()
            .filter(|u| u.name.eq_ignore_ascii_case(login))
            .map(|u| u.id)
            .min()
    }

    pub fn get_review(&self, booking_id: &Ulid) -> Option<Review> {
        self.reviews.get(booking_id).map(|r| r.value().clone())
    }
}

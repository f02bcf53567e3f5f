use ulid::Ulid;

use crate::model::*;

use super::conflict::check_no_conflict;
use super::{Engine, EngineError};

impl Engine {
    /// Bind `room_id` to a booking, or unbind with `None`.
    ///
    /// The target room's write lock is held from the conflict check through the
    /// WAL append, so two assignments racing for overlapping stays on one room
    /// cannot both win.
    pub async fn assign_room(
        &self,
        booking_id: Ulid,
        room_id: Option<Ulid>,
    ) -> Result<Booking, EngineError> {
        let _gate = self.enter().await?;
        let mut booking = self.lock_booking(booking_id).await?;
        if booking.status.is_terminal() {
            return Err(EngineError::TerminalStateViolation {
                status: booking.status,
                fields: vec!["room_id"],
            });
        }
        if booking.room_id == room_id {
            return Ok(booking.clone());
        }

        let mut rooms = self
            .write_rooms(booking.room_id.into_iter().chain(room_id))
            .await?;
        if let Some(room_id) = room_id {
            let rs = rooms.get(&room_id).ok_or(EngineError::NotFound(room_id))?;
            if rs.room_type_id != booking.room_type_id {
                return Err(EngineError::RoomTypeMismatch {
                    room_id,
                    room_type_id: rs.room_type_id,
                    booking_room_type_id: booking.room_type_id,
                });
            }
            if !rs.active {
                return Err(EngineError::RoomInactive(room_id));
            }
            check_no_conflict(rs, &booking.span, Some(booking_id))?;
        }

        let next = Booking {
            room_id,
            ..booking.clone()
        };
        self.commit_booking(&mut booking, next, &mut rooms).await?;

        match room_id {
            Some(room_id) => tracing::info!("booking {booking_id} assigned to room {room_id}"),
            None => tracing::info!("booking {booking_id} unassigned"),
        }
        Ok(booking.clone())
    }
}

//! Command authorization for guest and staff logins.
//!
//! Staff may run anything. A guest login resolves to a registered user and may
//! only book for that user, act on that user's bookings, list them, and read
//! the public catalog. Lifecycle rules on top of that stay in the engine.

use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::ActorRole;
use crate::sql::Command;

/// The login behind a connection, resolved against one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub role: ActorRole,
    /// Registered user a guest login stands for. `None` for staff and for
    /// guests the property does not know.
    pub user_id: Option<Ulid>,
}

impl Principal {
    pub fn staff() -> Self {
        Self {
            role: ActorRole::Staff,
            user_id: None,
        }
    }

    pub fn guest(user_id: Option<Ulid>) -> Self {
        Self {
            role: ActorRole::Guest,
            user_id,
        }
    }

    pub fn resolve(engine: &Engine, login: Option<&str>, staff_users: &[String]) -> Self {
        match role_for(login, staff_users) {
            ActorRole::Staff => Self::staff(),
            ActorRole::Guest => Self::guest(login.and_then(|l| engine.user_for_login(l))),
        }
    }

    fn require_user(&self) -> Result<Ulid, EngineError> {
        self.user_id
            .ok_or(EngineError::Forbidden("login is not a registered user"))
    }
}

/// Staff if the login user is listed in `staff_users`, guest otherwise.
pub fn role_for(user: Option<&str>, staff_users: &[String]) -> ActorRole {
    match user {
        Some(u) if staff_users.iter().any(|s| s == u) => ActorRole::Staff,
        _ => ActorRole::Guest,
    }
}

/// Check `cmd` against `who`. Guest booking listings come back scoped to the
/// guest's own user.
pub async fn authorize(
    engine: &Engine,
    who: &Principal,
    cmd: Command,
) -> Result<Command, EngineError> {
    if who.role == ActorRole::Staff {
        return Ok(cmd);
    }
    match &cmd {
        Command::InsertUser { .. }
        | Command::SelectAvailability { .. }
        | Command::SelectRooms { .. }
        | Command::SelectRoomTypes
        | Command::SelectRoomImages { .. } => {}
        Command::InsertBooking { user_id, .. } => {
            if who.require_user()? != *user_id {
                return Err(EngineError::Forbidden("guests may only book for themselves"));
            }
        }
        Command::SetBookingStatus { id, .. } | Command::SelectBookingDetail { id } => {
            require_owner(engine, who, *id).await?;
        }
        Command::InsertReview { booking_id, .. } => {
            require_owner(engine, who, *booking_id).await?;
        }
        Command::SelectBookings { filter } => {
            let me = who.require_user()?;
            if filter.user_id.is_some_and(|u| u != me) {
                return Err(EngineError::Forbidden("guests may only list their own bookings"));
            }
            let mut filter = filter.clone();
            filter.user_id = Some(me);
            return Ok(Command::SelectBookings { filter });
        }
        Command::InsertRoomType { .. }
        | Command::UpdateRoomType { .. }
        | Command::InsertRoom { .. }
        | Command::SetRoomActive { .. }
        | Command::DeleteRoom { .. }
        | Command::AssignRoom { .. }
        | Command::UpdateBooking { .. }
        | Command::DeleteBooking { .. }
        | Command::InsertRoomImage { .. }
        | Command::SetThumbnail { .. } => {
            return Err(EngineError::Forbidden("staff only"));
        }
    }
    Ok(cmd)
}

async fn require_owner(engine: &Engine, who: &Principal, booking_id: Ulid) -> Result<(), EngineError> {
    let me = who.require_user()?;
    if engine.get_booking(booking_id).await?.user_id != me {
        return Err(EngineError::Forbidden("booking belongs to another guest"));
    }
    Ok(())
}

use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or out-of-range input.
    Validation(String),
    LimitExceeded(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateRoomNumber(String),
    CapacityExceeded {
        max_adults: u32,
        max_children: u32,
    },
    NoAvailability {
        room_type_id: Ulid,
    },
    RoomTypeMismatch {
        room_id: Ulid,
        room_type_id: Ulid,
        booking_room_type_id: Ulid,
    },
    RoomInactive(Ulid),
    RoomConflict {
        room_id: Ulid,
        booking_id: Ulid,
    },
    RoomInUse(Ulid),
    IllegalTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    TerminalStateViolation {
        status: BookingStatus,
        fields: Vec<&'static str>,
    },
    CancellationWindowViolation {
        hours_until_check_in: i64,
    },
    ReviewNotAllowed(&'static str),
    Forbidden(&'static str),
    /// Lock could not be acquired in time. The only retryable kind.
    TransientStorageError(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientStorageError(_))
    }

    /// SQLSTATE reported to pgwire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => "22023",
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) | EngineError::DuplicateRoomNumber(_) => "23505",
            EngineError::RoomConflict { .. } => "23P01",
            EngineError::IllegalTransition { .. }
            | EngineError::TerminalStateViolation { .. }
            | EngineError::CancellationWindowViolation { .. }
            | EngineError::ReviewNotAllowed(_)
            | EngineError::RoomInUse(_) => "55000",
            EngineError::Forbidden(_) => "42501",
            EngineError::TransientStorageError(_) => "40001",
            EngineError::WalError(_) => "58030",
            EngineError::CapacityExceeded { .. }
            | EngineError::NoAvailability { .. }
            | EngineError::RoomTypeMismatch { .. }
            | EngineError::RoomInactive(_) => "P0001",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateRoomNumber(n) => write!(f, "room number already taken: {n}"),
            EngineError::CapacityExceeded {
                max_adults,
                max_children,
            } => write!(
                f,
                "room capacity exceeded: maximum {max_adults} adults, {max_children} children"
            ),
            EngineError::NoAvailability { room_type_id } => {
                write!(f, "no rooms of type {room_type_id} available for the selected dates")
            }
            EngineError::RoomTypeMismatch {
                room_id,
                room_type_id,
                booking_room_type_id,
            } => write!(
                f,
                "room {room_id} is of type {room_type_id}, booking is for type {booking_room_type_id}"
            ),
            EngineError::RoomInactive(id) => write!(f, "room {id} is not active"),
            EngineError::RoomConflict {
                room_id,
                booking_id,
            } => write!(
                f,
                "room {room_id} is not available for the selected dates: conflicts with booking {booking_id}"
            ),
            EngineError::RoomInUse(id) => write!(f, "room {id} still has bookings"),
            EngineError::IllegalTransition { from, to } => {
                write!(f, "illegal status transition: {from} -> {to}")
            }
            EngineError::TerminalStateViolation { status, fields } => write!(
                f,
                "cannot update {} on a {status} booking",
                fields.join(", ")
            ),
            EngineError::CancellationWindowViolation {
                hours_until_check_in,
            } => write!(
                f,
                "confirmed booking can only be cancelled at least 24 hours before check-in ({hours_until_check_in}h left)"
            ),
            EngineError::ReviewNotAllowed(msg) => write!(f, "review not allowed: {msg}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::TransientStorageError(msg) => {
                write!(f, "transient storage error, retry: {msg}")
            }
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

use ulid::Ulid;

use crate::model::*;

use super::conflict::first_conflict;

// ── Availability Resolver ────────────────────────────────────────

/// Rooms of one type that can take `span`.
///
/// A room qualifies when it is active and no active booking bound to it
/// overlaps `span`. `exclude` is not counted against itself, which lets a
/// booking that is being rescheduled or reassigned see its own room as free.
/// The caller passes every room of the type; the result is ordered by room
/// number, then id.
pub fn available_rooms<'a>(
    rooms: impl IntoIterator<Item = &'a RoomState>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Vec<RoomInfo> {
    let mut free: Vec<RoomInfo> = rooms
        .into_iter()
        .filter(|rs| rs.active)
        .filter(|rs| first_conflict(rs, span, exclude).is_none())
        .map(RoomState::info)
        .collect();
    free.sort_by(|a, b| a.number.cmp(&b.number).then(a.id.cmp(&b.id)));
    free
}

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar day. The whole engine works at day granularity.
pub type Day = NaiveDate;

/// The one conflict predicate: half-open `[a_start, a_end)` against `[b_start, b_end)`.
/// A checkout on day N leaves day N free for the next check-in.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

/// Half-open stay `[start, end)`: `start` is the check-in day, `end` the check-out day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Day,
    pub end: Day,
}

impl Span {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless check-out is strictly after check-in.
    pub fn try_new(start: Day, end: Day) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Booking status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    Completed,
    Cancelled,
}

/// Statuses that occupy a room. Every conflict check scopes to exactly this set.
pub const ACTIVE_STATUSES: [BookingStatus; 3] = [
    BookingStatus::Pending,
    BookingStatus::Confirmed,
    BookingStatus::CheckedIn,
];

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CheckedIn => "checked-in",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_active(&self) -> bool {
        ACTIVE_STATUSES.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "checked-in" | "checked_in" => Ok(BookingStatus::CheckedIn),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Guest,
    Staff,
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub name: String,
    /// Price per night, whole currency units.
    pub price: u64,
    pub max_adults: u32,
    pub max_children: u32,
    /// Informational inventory count. Scarcity is enforced per physical room.
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_type_id: Ulid,
    pub room_id: Option<Ulid>,
    pub status: BookingStatus,
    pub span: Span,
    pub adults: u32,
    pub children: u32,
    pub phone: String,
    pub total_price: u64,
    pub is_paid: bool,
    pub is_reviewed: bool,
}

impl Booking {
    pub fn nights(&self) -> i64 {
        self.span.nights()
    }

    /// The (room, span) this booking occupies, if any. Only active bookings occupy a room.
    pub fn footprint(&self) -> Option<(Ulid, Span)> {
        match self.room_id {
            Some(room_id) if self.status.is_active() => Some((room_id, self.span)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub booking_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomImage {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub path: String,
    pub is_thumbnail: bool,
}

/// Transient admission input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StayRequest {
    pub room_type_id: Ulid,
    pub check_in: Day,
    pub check_out: Day,
    pub adults: u32,
    pub children: u32,
    pub phone: String,
}

/// Room type update. Existing bookings keep the price they were admitted at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomTypePatch {
    pub name: Option<String>,
    pub price: Option<u64>,
    pub max_adults: Option<u32>,
    pub max_children: Option<u32>,
    pub quantity: Option<u32>,
}

impl RoomTypePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, rt: &mut RoomType) {
        if let Some(name) = &self.name {
            rt.name = name.clone();
        }
        if let Some(price) = self.price {
            rt.price = price;
        }
        if let Some(n) = self.max_adults {
            rt.max_adults = n;
        }
        if let Some(n) = self.max_children {
            rt.max_children = n;
        }
        if let Some(n) = self.quantity {
            rt.quantity = n;
        }
    }
}

/// Field-level booking update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub check_in: Option<Day>,
    pub check_out: Option<Day>,
    pub phone: Option<String>,
    pub adults: Option<u32>,
    pub children: Option<u32>,
    pub total_price: Option<u64>,
    pub is_paid: Option<bool>,
}

impl BookingPatch {
    pub fn is_empty(&self) -> bool {
        self.touched_fields().is_empty()
    }

    pub fn changes_dates(&self) -> bool {
        self.check_in.is_some() || self.check_out.is_some()
    }

    pub fn touched_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.check_in.is_some() {
            fields.push("check_in");
        }
        if self.check_out.is_some() {
            fields.push("check_out");
        }
        if self.phone.is_some() {
            fields.push("phone");
        }
        if self.adults.is_some() {
            fields.push("adults");
        }
        if self.children.is_some() {
            fields.push("children");
        }
        if self.total_price.is_some() {
            fields.push("total_price");
        }
        if self.is_paid.is_some() {
            fields.push("is_paid");
        }
        fields
    }

    /// Fields that a terminal booking no longer accepts (everything but the payment flag).
    pub fn protected_fields(&self) -> Vec<&'static str> {
        self.touched_fields()
            .into_iter()
            .filter(|f| *f != "is_paid")
            .collect()
    }
}

// ── Room state ───────────────────────────────────────────────────

/// An active booking's footprint on a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub booking_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub number: String,
    pub active: bool,
    /// Footprints of active bookings bound to this room, sorted by `span.start`.
    pub intervals: Vec<Interval>,
    /// Every booking bound to this room, whatever its status.
    pub bookings: HashSet<Ulid>,
}

impl RoomState {
    pub fn new(id: Ulid, room_type_id: Ulid, number: String, active: bool) -> Self {
        Self {
            id,
            room_type_id,
            number,
            active,
            intervals: Vec::new(),
            bookings: HashSet::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove a booking's interval.
    pub fn remove_interval(&mut self, booking_id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.booking_id == booking_id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.overlaps(query))
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            room_type_id: self.room_type_id,
            number: self.number.clone(),
            active: self.active,
        }
    }
}

/// The WAL record format. One event per mutation, so every mutation is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
    },
    RoomTypeSaved {
        room_type: RoomType,
    },
    RoomCreated {
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        active: bool,
    },
    RoomActiveSet {
        id: Ulid,
        active: bool,
    },
    RoomDeleted {
        id: Ulid,
    },
    /// Full booking record after the mutation. Covers admission, assignment,
    /// status changes and field updates.
    BookingWritten {
        booking: Booking,
    },
    BookingDeleted {
        id: Ulid,
    },
    ReviewSubmitted {
        review: Review,
    },
    ImageAdded {
        image: RoomImage,
    },
    ThumbnailSet {
        id: Ulid,
        room_type_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub number: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub room_type_id: Ulid,
    pub span: Span,
    pub rooms: Vec<RoomInfo>,
}

impl Availability {
    pub fn count(&self) -> usize {
        self.rooms.len()
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub booking: Booking,
    pub nights: i64,
    /// Rooms free at admission time. Informational only, nothing is reserved.
    pub available_rooms: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub id: Option<Ulid>,
    pub user_id: Option<Ulid>,
    pub room_id: Option<Ulid>,
    pub room_type_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    /// Check-in on or after this day.
    pub check_in_from: Option<Day>,
    /// Check-out on or before this day.
    pub check_out_until: Option<Day>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.id.is_none_or(|id| b.id == id)
            && self.user_id.is_none_or(|id| b.user_id == id)
            && self.room_id.is_none_or(|id| b.room_id == Some(id))
            && self.room_type_id.is_none_or(|id| b.room_type_id == id)
            && self.status.is_none_or(|s| b.status == s)
            && self.check_in_from.is_none_or(|day| b.span.start >= day)
            && self.check_out_until.is_none_or(|day| b.span.end <= day)
    }
}

/// A booking together with what its holder may do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetail {
    pub booking: Booking,
    pub can_cancel: bool,
    pub can_review: bool,
    /// Calendar days from today to check-in, negative once it has passed.
    pub days_until_check_in: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn span(a: &str, b: &str) -> Span {
        Span::new(d(a), d(b))
    }

    fn interval(a: &str, b: &str) -> Interval {
        Interval {
            booking_id: Ulid::new(),
            span: span(a, b),
        }
    }

    #[test]
    fn span_basics() {
        let s = span("2025-03-01", "2025-03-04");
        assert_eq!(s.nights(), 3);
        assert!(s.overlaps(&span("2025-03-03", "2025-03-04")));
        assert!(!s.overlaps(&span("2025-03-04", "2025-03-05"))); // half-open
        assert_eq!(s.to_string(), "[2025-03-01, 2025-03-04)");
    }

    #[test]
    fn try_new_rejects_empty_and_inverted() {
        assert!(Span::try_new(d("2025-03-01"), d("2025-03-01")).is_none());
        assert!(Span::try_new(d("2025-03-02"), d("2025-03-01")).is_none());
        assert!(Span::try_new(d("2025-03-01"), d("2025-03-02")).is_some());
    }

    #[test]
    fn span_overlap() {
        let a = span("2025-03-01", "2025-03-04");
        let b = span("2025-03-03", "2025-03-05");
        let c = span("2025-03-04", "2025-03-06");
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // checkout day = check-in day
    }

    #[test]
    fn overlap_is_symmetric() {
        let days = ["2025-01-01", "2025-01-02", "2025-01-03", "2025-01-04", "2025-01-05"];
        for a0 in 0..days.len() {
            for a1 in (a0 + 1)..days.len() {
                for b0 in 0..days.len() {
                    for b1 in (b0 + 1)..days.len() {
                        let a = span(days[a0], days[a1]);
                        let b = span(days[b0], days[b1]);
                        assert_eq!(a.overlaps(&b), b.overlaps(&a), "{a} vs {b}");
                    }
                }
                let a = span(days[a0], days[a1]);
                assert!(a.overlaps(&a), "{a} must overlap itself");
            }
        }
    }

    #[test]
    fn nested_ranges_overlap() {
        let outer = span("2025-04-01", "2025-04-10");
        let inner = span("2025-04-03", "2025-04-05");
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn overlaps_works_on_plain_integers() {
        assert!(overlaps(1, 3, 2, 4));
        assert!(!overlaps(1, 3, 3, 5));
    }

    #[test]
    fn status_round_trip_and_sets() {
        for s in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::CheckedIn,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<BookingStatus>().unwrap(), s);
            assert_ne!(s.is_active(), s.is_terminal());
        }
        assert!("checked-out".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn interval_ordering() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), true);
        rs.insert_interval(interval("2025-03-10", "2025-03-12"));
        rs.insert_interval(interval("2025-03-01", "2025-03-03"));
        rs.insert_interval(interval("2025-03-05", "2025-03-07"));
        assert_eq!(rs.intervals[0].span.start, d("2025-03-01"));
        assert_eq!(rs.intervals[1].span.start, d("2025-03-05"));
        assert_eq!(rs.intervals[2].span.start, d("2025-03-10"));
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), true);
        let a = interval("2025-03-01", "2025-03-02");
        let b = interval("2025-03-02", "2025-03-03");
        let c = interval("2025-03-03", "2025-03-04");
        for i in [a, b, c] {
            rs.insert_interval(i);
        }
        assert_eq!(rs.remove_interval(b.booking_id), Some(b));
        assert_eq!(rs.intervals, vec![a, c]);
        assert!(rs.remove_interval(Ulid::new()).is_none());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), true);
        rs.insert_interval(interval("2025-01-01", "2025-01-05"));
        let hit = interval("2025-02-08", "2025-02-12");
        rs.insert_interval(hit);
        rs.insert_interval(interval("2025-03-01", "2025-03-05"));

        let query = span("2025-02-10", "2025-02-20");
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits, vec![&hit]);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), true);
        rs.insert_interval(interval("2025-04-01", "2025-04-03"));
        let before = span("2025-03-28", "2025-04-01");
        let after = span("2025-04-03", "2025-04-05");
        assert_eq!(rs.overlapping(&before).count(), 0);
        assert_eq!(rs.overlapping(&after).count(), 0);
    }

    #[test]
    fn footprint_only_for_active_bound_bookings() {
        let mut b = Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            room_type_id: Ulid::new(),
            room_id: None,
            status: BookingStatus::Pending,
            span: span("2025-03-01", "2025-03-04"),
            adults: 2,
            children: 0,
            phone: "555-0100".into(),
            total_price: 300,
            is_paid: false,
            is_reviewed: false,
        };
        assert_eq!(b.footprint(), None);
        let room = Ulid::new();
        b.room_id = Some(room);
        assert_eq!(b.footprint(), Some((room, b.span)));
        b.status = BookingStatus::Cancelled;
        assert_eq!(b.footprint(), None);
    }

    #[test]
    fn patch_field_tracking() {
        let patch = BookingPatch {
            is_paid: Some(true),
            phone: Some("555".into()),
            ..Default::default()
        };
        assert_eq!(patch.touched_fields(), vec!["phone", "is_paid"]);
        assert_eq!(patch.protected_fields(), vec!["phone"]);
        assert!(!patch.changes_dates());
        assert!(BookingPatch::default().is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated {
            id: Ulid::new(),
            room_type_id: Ulid::new(),
            number: "101".into(),
            active: true,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

use chrono::{DateTime, NaiveTime, Utc};

use crate::limits::CANCELLATION_NOTICE_HOURS;
use crate::model::*;

use super::EngineError;

/// Legal next statuses. Terminal statuses have none.
pub fn successors(from: BookingStatus) -> &'static [BookingStatus] {
    use BookingStatus::*;
    match from {
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[CheckedIn, Cancelled],
        CheckedIn => &[Completed],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    successors(from).contains(&to)
}

/// Check-in happens at 00:00 UTC of the check-in day.
pub(crate) fn check_in_instant(day: Day) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

/// Whole hours from `now` until check-in, negative once check-in has passed.
pub(crate) fn hours_until_check_in(span: &Span, now: DateTime<Utc>) -> i64 {
    check_in_instant(span.start)
        .signed_duration_since(now)
        .num_hours()
}

/// Every guard a status change must pass, evaluated at `now`.
pub(crate) fn check_transition(
    booking: &Booking,
    to: BookingStatus,
    role: ActorRole,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if role == ActorRole::Guest && to != BookingStatus::Cancelled {
        return Err(EngineError::Forbidden("guests may only cancel bookings"));
    }
    let from = booking.status;
    if from.is_terminal() {
        return Err(EngineError::TerminalStateViolation {
            status: from,
            fields: vec!["status"],
        });
    }
    if !can_transition(from, to) {
        return Err(EngineError::IllegalTransition { from, to });
    }
    if from == BookingStatus::Confirmed && to == BookingStatus::Cancelled {
        let hours = hours_until_check_in(&booking.span, now);
        if hours < CANCELLATION_NOTICE_HOURS {
            return Err(EngineError::CancellationWindowViolation {
                hours_until_check_in: hours,
            });
        }
    }
    if to == BookingStatus::CheckedIn && booking.room_id.is_none() {
        return Err(EngineError::Validation(
            "cannot check in a booking without an assigned room".into(),
        ));
    }
    Ok(())
}

/// Terminal bookings accept payment-flag updates only; anything else rejects the whole patch.
pub(crate) fn check_patch_allowed(booking: &Booking, patch: &BookingPatch) -> Result<(), EngineError> {
    if !booking.status.is_terminal() {
        return Ok(());
    }
    let fields = patch.protected_fields();
    if fields.is_empty() {
        Ok(())
    } else {
        Err(EngineError::TerminalStateViolation {
            status: booking.status,
            fields,
        })
    }
}

pub(crate) fn check_review_allowed(booking: &Booking) -> Result<(), EngineError> {
    if booking.status != BookingStatus::Completed {
        return Err(EngineError::ReviewNotAllowed("booking is not completed"));
    }
    if booking.is_reviewed {
        return Err(EngineError::ReviewNotAllowed("booking already reviewed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};
    use ulid::Ulid;

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn booking(status: BookingStatus, check_in: &str, check_out: &str) -> Booking {
        Booking {
            id: Ulid::new(),
            user_id: Ulid::new(),
            room_type_id: Ulid::new(),
            room_id: Some(Ulid::new()),
            status,
            span: Span::new(d(check_in), d(check_out)),
            adults: 2,
            children: 0,
            phone: "555-0100".into(),
            total_price: 300,
            is_paid: false,
            is_reviewed: false,
        }
    }

    const ALL: [BookingStatus; 5] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::CheckedIn,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
    ];

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        let legal = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, CheckedIn),
            (Confirmed, Cancelled),
            (CheckedIn, Completed),
        ];
        for from in ALL {
            for to in ALL {
                assert_eq!(
                    can_transition(from, to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
        assert!(successors(Completed).is_empty());
        assert!(successors(Cancelled).is_empty());
    }

    #[test]
    fn check_in_is_midnight_utc() {
        let instant = check_in_instant(d("2025-06-10"));
        assert_eq!(instant.to_rfc3339(), "2025-06-10T00:00:00+00:00");
        let now = instant - TimeDelta::hours(30);
        assert_eq!(
            hours_until_check_in(&Span::new(d("2025-06-10"), d("2025-06-11")), now),
            30
        );
    }

    #[test]
    fn confirmed_cancellation_needs_notice() {
        let b = booking(BookingStatus::Confirmed, "2025-06-10", "2025-06-12");
        let check_in = check_in_instant(b.span.start);

        let early = check_in - TimeDelta::hours(48);
        assert!(check_transition(&b, BookingStatus::Cancelled, ActorRole::Guest, early).is_ok());

        let exactly = check_in - TimeDelta::hours(24);
        assert!(check_transition(&b, BookingStatus::Cancelled, ActorRole::Guest, exactly).is_ok());

        let late = check_in - TimeDelta::hours(10);
        assert_eq!(
            check_transition(&b, BookingStatus::Cancelled, ActorRole::Staff, late),
            Err(EngineError::CancellationWindowViolation {
                hours_until_check_in: 10
            })
        );
    }

    #[test]
    fn pending_cancellation_is_always_allowed() {
        let b = booking(BookingStatus::Pending, "2025-06-10", "2025-06-12");
        let late = check_in_instant(b.span.start) - TimeDelta::hours(1);
        assert!(check_transition(&b, BookingStatus::Cancelled, ActorRole::Guest, late).is_ok());
    }

    #[test]
    fn guest_may_only_cancel() {
        let b = booking(BookingStatus::Pending, "2025-06-10", "2025-06-12");
        let now = check_in_instant(b.span.start) - TimeDelta::days(10);
        assert!(matches!(
            check_transition(&b, BookingStatus::Confirmed, ActorRole::Guest, now),
            Err(EngineError::Forbidden(_))
        ));
        assert!(check_transition(&b, BookingStatus::Confirmed, ActorRole::Staff, now).is_ok());
    }

    #[test]
    fn terminal_and_illegal_edges() {
        let now = check_in_instant(d("2025-06-10")) - TimeDelta::days(10);
        let done = booking(BookingStatus::Completed, "2025-06-10", "2025-06-12");
        assert!(matches!(
            check_transition(&done, BookingStatus::Cancelled, ActorRole::Staff, now),
            Err(EngineError::TerminalStateViolation { .. })
        ));
        let pending = booking(BookingStatus::Pending, "2025-06-10", "2025-06-12");
        assert_eq!(
            check_transition(&pending, BookingStatus::Completed, ActorRole::Staff, now),
            Err(EngineError::IllegalTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Completed
            })
        );
    }

    #[test]
    fn check_in_requires_room() {
        let mut b = booking(BookingStatus::Confirmed, "2025-06-10", "2025-06-12");
        b.room_id = None;
        let now = check_in_instant(b.span.start);
        assert!(matches!(
            check_transition(&b, BookingStatus::CheckedIn, ActorRole::Staff, now),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn terminal_patch_only_payment() {
        let b = booking(BookingStatus::Cancelled, "2025-06-10", "2025-06-12");
        let pay = BookingPatch {
            is_paid: Some(true),
            ..Default::default()
        };
        assert!(check_patch_allowed(&b, &pay).is_ok());
        let mixed = BookingPatch {
            is_paid: Some(true),
            phone: Some("555".into()),
            ..Default::default()
        };
        assert_eq!(
            check_patch_allowed(&b, &mixed),
            Err(EngineError::TerminalStateViolation {
                status: BookingStatus::Cancelled,
                fields: vec!["phone"]
            })
        );
        let live = booking(BookingStatus::Pending, "2025-06-10", "2025-06-12");
        assert!(check_patch_allowed(&live, &mixed).is_ok());
    }

    #[test]
    fn review_rules() {
        let mut b = booking(BookingStatus::Completed, "2025-06-10", "2025-06-12");
        assert!(check_review_allowed(&b).is_ok());
        b.is_reviewed = true;
        assert!(check_review_allowed(&b).is_err());
        let live = booking(BookingStatus::CheckedIn, "2025-06-10", "2025-06-12");
        assert!(check_review_allowed(&live).is_err());
    }
}

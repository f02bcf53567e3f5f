use chrono::{DateTime, Datelike, Utc};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_span(check_in: Day, check_out: Day) -> Result<Span, EngineError> {
    use crate::limits::*;
    for day in [check_in, check_out] {
        if day.year() < MIN_VALID_YEAR || day.year() > MAX_VALID_YEAR {
            return Err(EngineError::LimitExceeded("date out of range"));
        }
    }
    let span = Span::try_new(check_in, check_out).ok_or_else(|| {
        EngineError::Validation(format!(
            "check-out date {check_out} must be after check-in date {check_in}"
        ))
    })?;
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(span)
}

pub(crate) fn validate_occupants(adults: u32, children: u32) -> Result<(), EngineError> {
    use crate::limits::*;
    if !(MIN_ADULTS..=MAX_ADULTS).contains(&adults) {
        return Err(EngineError::Validation(format!(
            "adults must be between {MIN_ADULTS} and {MAX_ADULTS}"
        )));
    }
    if children > MAX_CHILDREN {
        return Err(EngineError::Validation(format!(
            "children must be at most {MAX_CHILDREN}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_phone(phone: &str) -> Result<(), EngineError> {
    if phone.trim().is_empty() {
        return Err(EngineError::Validation("phone is required".into()));
    }
    if phone.len() > crate::limits::MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone too long"));
    }
    Ok(())
}

pub(crate) fn check_capacity(rt: &RoomType, adults: u32, children: u32) -> Result<(), EngineError> {
    if adults > rt.max_adults || children > rt.max_children {
        return Err(EngineError::CapacityExceeded {
            max_adults: rt.max_adults,
            max_children: rt.max_children,
        });
    }
    Ok(())
}

/// First active booking on this room overlapping `span`, other than `exclude`.
/// Only active footprints are indexed, so cancelled and completed stays never match.
pub(crate) fn first_conflict(rs: &RoomState, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
    rs.overlapping(span)
        .find(|i| Some(i.booking_id) != exclude)
        .map(|i| i.booking_id)
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(rs, span, exclude) {
        Some(booking_id) => {
            metrics::counter!(crate::observability::ROOM_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::RoomConflict {
                room_id: rs.id,
                booking_id,
            })
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> Day {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn room_with(spans: &[(&str, &str)]) -> (RoomState, Vec<Ulid>) {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), true);
        let ids = spans
            .iter()
            .map(|(a, b)| {
                let id = Ulid::new();
                rs.insert_interval(Interval {
                    booking_id: id,
                    span: Span::new(d(a), d(b)),
                });
                id
            })
            .collect();
        (rs, ids)
    }

    #[test]
    fn validate_span_rules() {
        assert_eq!(
            validate_span(d("2025-01-10"), d("2025-01-12")).unwrap().nights(),
            2
        );
        assert!(matches!(
            validate_span(d("2025-01-10"), d("2025-01-10")),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_span(d("2025-01-10"), d("2025-01-09")),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_span(d("1999-12-30"), d("2000-01-02")),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(d("2025-01-01"), d("2026-06-01")),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn occupant_and_phone_bounds() {
        assert!(validate_occupants(1, 0).is_ok());
        assert!(validate_occupants(10, 10).is_ok());
        assert!(validate_occupants(0, 1).is_err());
        assert!(validate_occupants(11, 0).is_err());
        assert!(validate_occupants(2, 11).is_err());
        assert!(validate_phone("555-0100").is_ok());
        assert!(validate_phone("  ").is_err());
        assert!(validate_phone(&"9".repeat(21)).is_err());
    }

    #[test]
    fn capacity_against_room_type() {
        let rt = RoomType {
            id: Ulid::new(),
            name: "Double".into(),
            price: 100,
            max_adults: 2,
            max_children: 1,
            quantity: 1,
        };
        assert!(check_capacity(&rt, 2, 1).is_ok());
        assert_eq!(
            check_capacity(&rt, 3, 0),
            Err(EngineError::CapacityExceeded {
                max_adults: 2,
                max_children: 1
            })
        );
        assert!(check_capacity(&rt, 1, 2).is_err());
    }

    #[test]
    fn conflict_found_and_excluded() {
        let (rs, ids) = room_with(&[("2025-01-10", "2025-01-12")]);
        let query = Span::new(d("2025-01-11"), d("2025-01-13"));
        assert_eq!(first_conflict(&rs, &query, None), Some(ids[0]));
        assert_eq!(first_conflict(&rs, &query, Some(ids[0])), None);
        assert!(matches!(
            check_no_conflict(&rs, &query, None),
            Err(EngineError::RoomConflict { booking_id, .. }) if booking_id == ids[0]
        ));
    }

    #[test]
    fn back_to_back_stays_do_not_conflict() {
        let (rs, _) = room_with(&[("2025-01-10", "2025-01-12")]);
        let next = Span::new(d("2025-01-12"), d("2025-01-14"));
        let prev = Span::new(d("2025-01-08"), d("2025-01-10"));
        assert!(check_no_conflict(&rs, &next, None).is_ok());
        assert!(check_no_conflict(&rs, &prev, None).is_ok());
    }
}

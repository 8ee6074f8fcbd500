use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, ValidationError};

/// Reject a request before anything is touched. Checks run in a fixed
/// order and the first failure wins.
pub fn validate_request(req: &ReservationRequest, now: Ms) -> Result<(), EngineError> {
    if req.start <= now {
        return Err(ValidationError::StartNotInFuture.into());
    }
    if req.end <= req.start {
        return Err(ValidationError::EndBeforeStart.into());
    }
    let minutes = (req.end - req.start) / MINUTE_MS;
    if minutes < MIN_RESERVATION_MINUTES {
        return Err(ValidationError::DurationTooShort {
            minutes,
            min: MIN_RESERVATION_MINUTES,
        }
        .into());
    }
    if (req.end - req.start) > MAX_RESERVATION_MINUTES * MINUTE_MS {
        return Err(ValidationError::DurationTooLong {
            minutes,
            max: MAX_RESERVATION_MINUTES,
        }
        .into());
    }
    if req.vehicle.license_plate.trim().is_empty() {
        return Err(ValidationError::MissingLicensePlate.into());
    }

    if req.vehicle.license_plate.len() > MAX_PLATE_LEN {
        return Err(EngineError::LimitExceeded("license plate too long"));
    }
    if req.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if req.requester_id.is_empty() || req.requester_id.len() > MAX_REQUESTER_ID_LEN {
        return Err(EngineError::LimitExceeded("requester id length"));
    }
    Ok(())
}

pub(crate) fn check_no_conflict(
    sched: &SpotSchedule,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match sched.find_conflict(span, exclude) {
        Some(with) => Err(EngineError::Conflict {
            spot_id: sched.spot_id.clone(),
            with,
        }),
        None => Ok(()),
    }
}

impl Engine {
    /// Does `[start, end)` on `spot_id` overlap a confirmed or active reservation?
    pub async fn has_conflict(
        &self,
        spot_id: &str,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> bool {
        if end <= start {
            return false;
        }
        let Some(sched) = self.store.existing_schedule(spot_id) else {
            return false;
        };
        let guard = sched.read().await;
        guard.find_conflict(&Span::new(start, end), exclude).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: Ms, end: Ms, plate: &str) -> ReservationRequest {
        ReservationRequest {
            requester_id: "u1".into(),
            spot_id: None,
            spot_type: SpotType::Regular,
            features: FeatureSet::new(),
            start,
            end,
            vehicle: VehicleInfo::plate(plate),
            notes: None,
            allow_waitlist: false,
            membership: None,
            discount_code: None,
        }
    }

    fn code(r: Result<(), EngineError>) -> &'static str {
        r.unwrap_err().code()
    }

    #[test]
    fn accepts_a_well_formed_request() {
        assert!(validate_request(&request(HOUR_MS, 3 * HOUR_MS, "ABC123"), 0).is_ok());
    }

    #[test]
    fn start_must_be_strictly_future() {
        let now = HOUR_MS;
        assert_eq!(code(validate_request(&request(now, now + HOUR_MS, "X1"), now)), "START_NOT_IN_FUTURE");
    }

    #[test]
    fn end_after_start() {
        assert_eq!(
            code(validate_request(&request(2 * HOUR_MS, HOUR_MS, "X1"), 0)),
            "END_BEFORE_START"
        );
        assert_eq!(
            code(validate_request(&request(HOUR_MS, HOUR_MS, "X1"), 0)),
            "END_BEFORE_START"
        );
    }

    #[test]
    fn duration_bounds() {
        let start = HOUR_MS;
        assert_eq!(
            code(validate_request(&request(start, start + 15 * MINUTE_MS, "X1"), 0)),
            "DURATION_TOO_SHORT"
        );
        assert_eq!(
            code(validate_request(&request(start, start + 50 * HOUR_MS, "X1"), 0)),
            "DURATION_TOO_LONG"
        );
        assert!(validate_request(&request(start, start + 30 * MINUTE_MS, "X1"), 0).is_ok());
        assert!(validate_request(&request(start, start + 24 * HOUR_MS, "X1"), 0).is_ok());
        assert_eq!(
            code(validate_request(&request(start, start + 24 * HOUR_MS + 1, "X1"), 0)),
            "DURATION_TOO_LONG"
        );
    }

    #[test]
    fn plate_required() {
        assert_eq!(
            code(validate_request(&request(HOUR_MS, 2 * HOUR_MS, "   "), 0)),
            "MISSING_LICENSE_PLATE"
        );
    }

    #[test]
    fn first_failing_check_wins() {
        // Past start and too short: the start check reports first.
        let now = 10 * HOUR_MS;
        let r = request(HOUR_MS, HOUR_MS + MINUTE_MS, "");
        assert_eq!(code(validate_request(&r, now)), "START_NOT_IN_FUTURE");
    }

    #[test]
    fn limits_enforced_after_validation() {
        let r = request(HOUR_MS, 2 * HOUR_MS, "ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        assert_eq!(code(validate_request(&r, 0)), "LIMIT_EXCEEDED");
    }
}

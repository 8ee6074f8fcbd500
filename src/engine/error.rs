use ulid::Ulid;

use crate::directory::UpstreamError;
use crate::model::{ReservationStatus, SpotId};
use crate::pricing::PricingError;

/// Request rejected before anything was touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    StartNotInFuture,
    EndBeforeStart,
    DurationTooShort { minutes: i64, min: i64 },
    DurationTooLong { minutes: i64, max: i64 },
    MissingLicensePlate,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::StartNotInFuture => "START_NOT_IN_FUTURE",
            ValidationError::EndBeforeStart => "END_BEFORE_START",
            ValidationError::DurationTooShort { .. } => "DURATION_TOO_SHORT",
            ValidationError::DurationTooLong { .. } => "DURATION_TOO_LONG",
            ValidationError::MissingLicensePlate => "MISSING_LICENSE_PLATE",
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::StartNotInFuture => write!(f, "start time must be in the future"),
            ValidationError::EndBeforeStart => write!(f, "end time must be after start time"),
            ValidationError::DurationTooShort { minutes, min } => {
                write!(f, "duration of {minutes} minutes is below the {min} minute minimum")
            }
            ValidationError::DurationTooLong { minutes, max } => {
                write!(f, "duration of {minutes} minutes exceeds the {max} minute maximum")
            }
            ValidationError::MissingLicensePlate => write!(f, "vehicle license plate is required"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    NotFound(String),
    Unauthorized(Ulid),
    /// Spot was taken by another reservation at commit time.
    Conflict { spot_id: SpotId, with: Ulid },
    /// Status changed under us, or the transition is not in the table.
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// No spot free and waitlisting not requested.
    Unavailable,
    /// Check-in attempted before the window opens or after the reservation ended.
    CheckInWindow { id: Ulid, opens: i64, closes: i64 },
    LimitExceeded(&'static str),
    /// A collaborator failed. The detail is for logs; `Display` stays generic.
    Upstream(String),
    WalError(String),
}

impl EngineError {
    /// Stable code for callers; messages may change, codes do not.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(v) => v.code(),
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::Unavailable => "UNAVAILABLE",
            EngineError::CheckInWindow { .. } => "CHECK_IN_WINDOW",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Upstream(_) => "UPSTREAM_FAILURE",
            EngineError::WalError(_) => "PERSISTENCE_FAILURE",
        }
    }

    pub fn not_found(id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(id.to_string())
    }

    /// Internal detail behind a generic message, for logging only.
    pub fn detail(&self) -> Option<&str> {
        match self {
            EngineError::Upstream(d) | EngineError::WalError(d) => Some(d),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(v) => write!(f, "invalid request: {v}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Unauthorized(id) => {
                write!(f, "not authorized to modify reservation {id}")
            }
            EngineError::Conflict { spot_id, with } => {
                write!(f, "spot {spot_id} is already reserved by {with}")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "reservation {id} cannot move from {from} to {to}")
            }
            EngineError::Unavailable => write!(f, "no matching spot is available for the requested window"),
            EngineError::CheckInWindow { id, opens, closes } => {
                write!(f, "reservation {id} can only be checked in between {opens} and {closes}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Upstream(_) => write!(f, "a required service is unavailable, try again later"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ValidationError> for EngineError {
    fn from(v: ValidationError) -> Self {
        EngineError::Validation(v)
    }
}

impl From<UpstreamError> for EngineError {
    fn from(e: UpstreamError) -> Self {
        EngineError::Upstream(e.to_string())
    }
}

impl From<PricingError> for EngineError {
    fn from(e: PricingError) -> Self {
        EngineError::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EngineError::from(ValidationError::DurationTooShort { minutes: 15, min: 30 }).code(),
            "DURATION_TOO_SHORT"
        );
        assert_eq!(EngineError::Unavailable.code(), "UNAVAILABLE");
        assert_eq!(EngineError::not_found("x").code(), "NOT_FOUND");
    }

    #[test]
    fn upstream_detail_stays_out_of_the_message() {
        let e: EngineError = PricingError::Upstream(UpstreamError::new("rate table", "timeout")).into();
        assert_eq!(e.code(), "UPSTREAM_FAILURE");
        assert!(!e.to_string().contains("timeout"));
        assert_eq!(
            e.detail(),
            Some("failed to calculate pricing: rate table unavailable: timeout")
        );
        assert_eq!(EngineError::Unavailable.detail(), None);
    }
}

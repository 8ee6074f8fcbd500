use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::pricing::PricingQuote;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;

/// Spots are owned by the resource directory; their ids are opaque strings.
pub type SpotId = String;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_ms() / MINUTE_MS
    }

    /// Touching endpoints do not overlap: `[10, 14)` and `[14, 16)` are disjoint.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Spots ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpotType {
    Compact,
    #[serde(alias = "STANDARD")]
    Regular,
    #[serde(alias = "OVERSIZED")]
    Large,
    Handicap,
}

impl SpotType {
    pub const ALL: [SpotType; 4] = [
        SpotType::Compact,
        SpotType::Regular,
        SpotType::Large,
        SpotType::Handicap,
    ];

    /// Broader types a request for `self` may fall back to, in search order.
    /// A compact car fits a regular or large spot; handicap spots never substitute.
    pub fn fallbacks(self) -> &'static [SpotType] {
        match self {
            SpotType::Compact => &[SpotType::Regular, SpotType::Large],
            SpotType::Regular => &[SpotType::Large],
            SpotType::Large | SpotType::Handicap => &[],
        }
    }

    /// True if a spot of type `self` can serve a request for `requested`.
    pub fn serves(self, requested: SpotType) -> bool {
        self == requested || requested.fallbacks().contains(&self)
    }
}

impl fmt::Display for SpotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpotType::Compact => "COMPACT",
            SpotType::Regular => "REGULAR",
            SpotType::Large => "LARGE",
            SpotType::Handicap => "HANDICAP",
        };
        f.write_str(s)
    }
}

impl FromStr for SpotType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COMPACT" => Ok(SpotType::Compact),
            "REGULAR" | "STANDARD" => Ok(SpotType::Regular),
            "LARGE" | "OVERSIZED" => Ok(SpotType::Large),
            "HANDICAP" => Ok(SpotType::Handicap),
            other => Err(format!("unknown spot type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    EvCharging,
    Covered,
    Security,
    Valet,
}

pub type FeatureSet = BTreeSet<Feature>;

/// A parking spot as reported by the resource directory. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spot {
    pub id: SpotId,
    pub spot_type: SpotType,
    #[serde(default)]
    pub features: FeatureSet,
    #[serde(default = "default_zone")]
    pub zone: String,
    /// Sensor-reported occupancy right now; unrelated to future reservations.
    #[serde(default)]
    pub occupied: bool,
}

fn default_zone() -> String {
    "main".to_string()
}

impl Spot {
    pub fn matches(&self, spot_type: SpotType, features: &FeatureSet) -> bool {
        self.spot_type.serves(spot_type) && features.is_subset(&self.features)
    }
}

// ── Customers & requests ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipTier {
    Basic,
    Premium,
    Vip,
    Corporate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub license_plate: String,
    pub make: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
}

impl VehicleInfo {
    pub fn plate(license_plate: impl Into<String>) -> Self {
        Self {
            license_plate: license_plate.into(),
            make: None,
            model: None,
            color: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub requester_id: String,
    pub spot_id: Option<SpotId>,
    pub spot_type: SpotType,
    pub features: FeatureSet,
    pub start: Ms,
    pub end: Ms,
    pub vehicle: VehicleInfo,
    pub notes: Option<String>,
    pub allow_waitlist: bool,
    pub membership: Option<MembershipTier>,
    pub discount_code: Option<String>,
}

/// Who is acting on a reservation. Operators may act on any reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Requester(String),
    Operator,
}

impl Actor {
    pub fn may_act_for(&self, requester_id: &str) -> bool {
        match self {
            Actor::Requester(id) => id == requester_id,
            Actor::Operator => true,
        }
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Waitlisted,
    Confirmed,
    Active,
    Completed,
    Cancelled,
    NoShow,
    Expired,
    Dismissed,
}

impl ReservationStatus {
    /// Only these statuses occupy a spot's schedule.
    pub fn is_blocking(self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReservationStatus::Completed
                | ReservationStatus::Cancelled
                | ReservationStatus::NoShow
                | ReservationStatus::Expired
                | ReservationStatus::Dismissed
        )
    }

    pub fn can_transition_to(self, to: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, to),
            (Waitlisted, Confirmed | Cancelled | Dismissed)
                | (Confirmed, Active | Cancelled | NoShow | Expired)
                | (Active, Completed | Cancelled | NoShow | Expired)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Waitlisted => "WAITLISTED",
            ReservationStatus::Confirmed => "CONFIRMED",
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Completed => "COMPLETED",
            ReservationStatus::Cancelled => "CANCELLED",
            ReservationStatus::NoShow => "NO_SHOW",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Dismissed => "DISMISSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    /// Monotonic creation sequence; breaks ties between equal `created_at`.
    pub seq: u64,
    pub requester_id: String,
    /// `None` while waitlisted.
    pub spot_id: Option<SpotId>,
    /// Snapshot of the requested (or, once placed, the assigned) spot type.
    pub spot_type: SpotType,
    pub features: FeatureSet,
    pub span: Span,
    pub status: ReservationStatus,
    pub vehicle: VehicleInfo,
    pub notes: Option<String>,
    pub membership: Option<MembershipTier>,
    pub discount_code: Option<String>,
    /// Rate snapshot taken when the spot was assigned.
    pub quote: Option<PricingQuote>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub checked_in_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
    pub refund_amount: Option<f64>,
    /// Rank at the time the entry joined the waitlist.
    pub waitlist_position: Option<u32>,
}

impl Reservation {
    /// Amount that was committed for this reservation (zero until a spot is assigned).
    pub fn charged_amount(&self) -> f64 {
        match (&self.quote, self.status) {
            (Some(q), ReservationStatus::Confirmed | ReservationStatus::Active) => q.total_estimate,
            _ => 0.0,
        }
    }

    /// FIFO order key for waitlist ranking.
    pub fn queue_key(&self) -> (Ms, u64) {
        (self.created_at, self.seq)
    }
}

/// A confirmed or active reservation occupying a spot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub reservation_id: Ulid,
    pub span: Span,
}

/// Conflict index for one spot: blocking reservations sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct SpotSchedule {
    pub spot_id: SpotId,
    pub intervals: Vec<Interval>,
}

impl SpotSchedule {
    pub fn new(spot_id: SpotId) -> Self {
        Self {
            spot_id,
            intervals: Vec::new(),
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

    pub fn remove_interval(&mut self, reservation_id: Ulid) -> Option<Interval> {
        let pos = self
            .intervals
            .iter()
            .position(|i| i.reservation_id == reservation_id)?;
        Some(self.intervals.remove(pos))
    }

    /// Intervals whose span overlaps the query window.
    /// Everything at index >= right_bound starts at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// First blocking reservation overlapping `span`, ignoring `exclude`.
    pub fn find_conflict(&self, span: &Span, exclude: Option<Ulid>) -> Option<Ulid> {
        self.overlapping(span)
            .find(|i| Some(i.reservation_id) != exclude)
            .map(|i| i.reservation_id)
    }
}

// ── Log records ──────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// New reservation (confirmed or waitlisted). Also the compaction snapshot record.
    ReservationCreated { reservation: Reservation },
    ReservationPromoted {
        id: Ulid,
        spot_id: SpotId,
        spot_type: SpotType,
        quote: PricingQuote,
        at: Ms,
    },
    StatusChanged {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
        at: Ms,
        reason: Option<String>,
        refund: Option<f64>,
    },
}

impl Event {
    pub fn reservation_id(&self) -> Ulid {
        match self {
            Event::ReservationCreated { reservation } => reservation.id,
            Event::ReservationPromoted { id, .. } | Event::StatusChanged { id, .. } => *id,
        }
    }
}

// ── Operation results ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationStatus {
    Confirmed,
    Waitlisted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    pub status: AllocationStatus,
    pub reservation_id: Ulid,
    pub spot_id: Option<SpotId>,
    pub waitlist_position: Option<u32>,
    pub quote: Option<PricingQuote>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CancelOutcome {
    pub reservation_id: Ulid,
    pub refund_amount: f64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitlistEntry {
    pub reservation_id: Ulid,
    pub requester_id: String,
    pub spot_type: SpotType,
    pub features: FeatureSet,
    pub span: Span,
    pub created_at: Ms,
    /// 1-indexed rank within the group.
    pub position: u32,
}

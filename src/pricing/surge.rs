use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::model::{Feature, FeatureSet, Ms};

/// Demand amplifiers. Each factor is clamped to `[1.0, max_multiplier]`,
/// the product of all factors is clamped to the same range.
#[derive(Debug, Clone, PartialEq)]
pub struct SurgePolicy {
    /// Local `[start_hour, end_hour)`.
    pub morning_peak: (u32, u32),
    pub evening_peak: (u32, u32),
    pub peak_factor: f64,
    pub weekend_factor: f64,
    /// Weekend evening window with elevated leisure demand.
    pub event_window: (u32, u32),
    pub event_factor: f64,
    pub ev_premium: f64,
    /// Below this occupancy ratio there is no occupancy surge.
    pub occupancy_low: f64,
    /// Above this ratio the factor climbs steeply toward `max_multiplier`.
    pub occupancy_high: f64,
    /// Occupancy factor reached at `occupancy_high`.
    pub occupancy_mid_factor: f64,
    pub max_multiplier: f64,
}

impl Default for SurgePolicy {
    fn default() -> Self {
        Self {
            morning_peak: (7, 9),
            evening_peak: (17, 19),
            peak_factor: 1.5,
            weekend_factor: 1.2,
            event_window: (20, 23),
            event_factor: 1.2,
            ev_premium: 1.2,
            occupancy_low: 0.5,
            occupancy_high: 0.8,
            occupancy_mid_factor: 1.2,
            max_multiplier: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SurgeReason {
    PeakHours,
    Weekend,
    WeekendEvent,
    EvCharging,
    HighOccupancy,
}

impl SurgeReason {
    pub fn label(self) -> &'static str {
        match self {
            SurgeReason::PeakHours => "peak hours",
            SurgeReason::Weekend => "weekend",
            SurgeReason::WeekendEvent => "weekend evening event",
            SurgeReason::EvCharging => "ev charging",
            SurgeReason::HighOccupancy => "high occupancy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgeFactor {
    pub reason: SurgeReason,
    pub factor: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurgeBreakdown {
    pub multiplier: f64,
    pub factors: Vec<SurgeFactor>,
}

impl SurgeBreakdown {
    pub fn reason(&self) -> String {
        if self.factors.is_empty() {
            return "normal demand".to_string();
        }
        self.factors
            .iter()
            .map(|f| f.reason.label())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Facility wall-clock time for a timestamp.
pub fn local_time(at: Ms, utc_offset_minutes: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
    DateTime::<Utc>::from_timestamp_millis(at).map(|t| t.with_timezone(&offset))
}

fn in_window(hour: u32, (start, end): (u32, u32)) -> bool {
    start <= hour && hour < end
}

impl SurgePolicy {
    fn clamp(&self, factor: f64) -> f64 {
        factor.clamp(1.0, self.max_multiplier)
    }

    /// Piecewise-linear: 1.0 below `occupancy_low`, up to `occupancy_mid_factor`
    /// at `occupancy_high`, then up to `max_multiplier` at full occupancy.
    pub fn occupancy_factor(&self, ratio: f64) -> f64 {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        let factor = if ratio < self.occupancy_low {
            1.0
        } else if ratio < self.occupancy_high {
            let t = (ratio - self.occupancy_low) / (self.occupancy_high - self.occupancy_low);
            1.0 + t * (self.occupancy_mid_factor - 1.0)
        } else {
            let t = (ratio - self.occupancy_high) / (1.0 - self.occupancy_high);
            self.occupancy_mid_factor + t * (self.max_multiplier - self.occupancy_mid_factor)
        };
        self.clamp(factor)
    }

    pub fn evaluate(
        &self,
        local: Option<&DateTime<FixedOffset>>,
        features: &FeatureSet,
        occupancy: f64,
    ) -> SurgeBreakdown {
        let mut factors = Vec::new();

        if let Some(t) = local {
            let hour = t.hour();
            if in_window(hour, self.morning_peak) || in_window(hour, self.evening_peak) {
                factors.push(SurgeFactor {
                    reason: SurgeReason::PeakHours,
                    factor: self.clamp(self.peak_factor),
                });
            }
            if matches!(t.weekday(), Weekday::Sat | Weekday::Sun) {
                factors.push(SurgeFactor {
                    reason: SurgeReason::Weekend,
                    factor: self.clamp(self.weekend_factor),
                });
                if in_window(hour, self.event_window) {
                    factors.push(SurgeFactor {
                        reason: SurgeReason::WeekendEvent,
                        factor: self.clamp(self.event_factor),
                    });
                }
            }
        }

        if features.contains(&Feature::EvCharging) {
            factors.push(SurgeFactor {
                reason: SurgeReason::EvCharging,
                factor: self.clamp(self.ev_premium),
            });
        }

        let occ = self.occupancy_factor(occupancy);
        if occ > 1.0 {
            factors.push(SurgeFactor {
                reason: SurgeReason::HighOccupancy,
                factor: occ,
            });
        }

        let product: f64 = factors.iter().map(|f| f.factor).product();
        SurgeBreakdown {
            multiplier: self.clamp(product),
            factors,
        }
    }
}

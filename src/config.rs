use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::FixedOffset;

use crate::model::{Ms, HOUR_MS, MINUTE_MS};
use crate::pricing::{PricingPolicy, SurgePolicy};

/// Two-tier refund schedule, computed against the quoted total.
///
/// - more than `full_refund_notice_ms` before start: full refund
/// - inside the notice window: `late_floor + (1 - late_floor) * notice / window`
/// - at or after start: `after_start_fraction`
#[derive(Debug, Clone, PartialEq)]
pub struct RefundPolicy {
    pub full_refund_notice_ms: Ms,
    pub late_floor: f64,
    pub after_start_fraction: f64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_refund_notice_ms: 2 * HOUR_MS,
            late_floor: 0.5,
            after_start_fraction: 0.0,
        }
    }
}

impl RefundPolicy {
    pub fn fraction(&self, notice_ms: Ms) -> f64 {
        let fraction = if notice_ms > self.full_refund_notice_ms {
            1.0
        } else if notice_ms > 0 {
            let window = self.full_refund_notice_ms.max(1) as f64;
            self.late_floor + (1.0 - self.late_floor) * (notice_ms as f64 / window)
        } else {
            self.after_start_fraction
        };
        fraction.clamp(0.0, 1.0)
    }

    /// Refund for `charged`, never negative and never above `charged`.
    pub fn refund(&self, charged: f64, notice_ms: Ms) -> f64 {
        let charged = charged.max(0.0);
        let amount = crate::pricing::round2(charged * self.fraction(notice_ms));
        amount.clamp(0.0, charged)
    }
}

/// Policies the engine enforces.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub refund: RefundPolicy,
    pub pricing: PricingPolicy,
    /// A confirmed reservation not checked in this long after start is a no-show.
    pub no_show_grace_ms: Ms,
    /// How early before start a check-in is accepted.
    pub check_in_early_ms: Ms,
    /// Try to promote waitlisted entries right after a cancellation frees a spot.
    pub promote_on_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refund: RefundPolicy::default(),
            pricing: PricingPolicy::default(),
            no_show_grace_ms: 30 * MINUTE_MS,
            check_in_early_ms: 15 * MINUTE_MS,
            promote_on_cancel: true,
        }
    }
}

/// Process configuration, read from `SPOTRES_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub spots_file: Option<PathBuf>,
    pub discounts_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub no_show_sweep_secs: u64,
    pub expiry_sweep_secs: u64,
    pub compact_threshold: u64,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value } => write!(f, "invalid value for {key}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

const UTC_OFFSET_KEY: &str = "SPOTRES_UTC_OFFSET_MINUTES";

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Facility offset from UTC. Must be a whole-minute offset strictly inside
/// one day, or no local wall-clock time can be computed for surge rules.
pub fn parse_utc_offset(raw: Option<&str>) -> Result<i32, ConfigError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    let invalid = || ConfigError::Invalid {
        key: UTC_OFFSET_KEY,
        value: raw.to_string(),
    };
    let minutes: i32 = raw.trim().parse().map_err(|_| invalid())?;
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .map(|_| minutes)
        .ok_or_else(invalid)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        let refund = RefundPolicy {
            full_refund_notice_ms: env_parse::<i64>("SPOTRES_FULL_REFUND_NOTICE_MINUTES")
                .map(|m| m * MINUTE_MS)
                .unwrap_or(defaults.refund.full_refund_notice_ms),
            late_floor: env_parse::<f64>("SPOTRES_LATE_REFUND_FLOOR_PERCENT")
                .map(|p| (p / 100.0).clamp(0.0, 1.0))
                .unwrap_or(defaults.refund.late_floor),
            after_start_fraction: defaults.refund.after_start_fraction,
        };
        let pricing = PricingPolicy {
            surge: SurgePolicy::default(),
            utc_offset_minutes: parse_utc_offset(std::env::var(UTC_OFFSET_KEY).ok().as_deref())?,
            quote_validity_ms: defaults.pricing.quote_validity_ms,
        };
        let engine = EngineConfig {
            refund,
            pricing,
            no_show_grace_ms: env_parse::<i64>("SPOTRES_NO_SHOW_GRACE_MINUTES")
                .map(|m| m * MINUTE_MS)
                .unwrap_or(defaults.no_show_grace_ms),
            ..defaults
        };

        Ok(Self {
            data_dir: std::env::var("SPOTRES_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            spots_file: std::env::var("SPOTRES_SPOTS_FILE").ok().map(PathBuf::from),
            discounts_file: std::env::var("SPOTRES_DISCOUNTS_FILE").ok().map(PathBuf::from),
            metrics_port: env_parse("SPOTRES_METRICS_PORT"),
            no_show_sweep_secs: env_parse("SPOTRES_NO_SHOW_SWEEP_SECS").unwrap_or(300),
            expiry_sweep_secs: env_parse("SPOTRES_EXPIRY_SWEEP_SECS").unwrap_or(1800),
            compact_threshold: env_parse("SPOTRES_COMPACT_THRESHOLD").unwrap_or(1000),
            engine,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

//! Dynamic pricing: base rate × surge multiplier, then membership and
//! discount-code reductions, floored at zero.
//!
//! [`compute_quote`] is the pure core. [`PricingEngine`] gathers its inputs
//! (base rate, occupancy, discount code) from the collaborators and
//! propagates their failures instead of falling back to defaults.

mod discount;
mod membership;
mod surge;

pub use discount::{
    DiscountCode, DiscountKind, DiscountRegistry, DiscountValidation, InMemoryDiscountRegistry,
};
pub use membership::{membership_benefits, MembershipBenefits};
pub use surge::{local_time, SurgeBreakdown, SurgeFactor, SurgePolicy, SurgeReason};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::directory::{OccupancyScope, ResourceDirectory, UpstreamError};
use crate::limits::PRICING_LADDER_MINUTES;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateBasis {
    Hourly,
    Daily,
    Monthly,
}

impl RateBasis {
    pub fn hours(self) -> f64 {
        match self {
            RateBasis::Hourly => 1.0,
            RateBasis::Daily => 24.0,
            RateBasis::Monthly => 720.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingContext {
    pub spot_type: SpotType,
    pub features: FeatureSet,
    pub basis: RateBasis,
    pub start: Ms,
    pub duration_minutes: i64,
    pub requester_id: Option<String>,
    pub membership: Option<MembershipTier>,
    pub discount_code: Option<String>,
}

impl PricingContext {
    pub fn hourly(spot_type: SpotType, start: Ms, duration_minutes: i64) -> Self {
        Self {
            spot_type,
            features: FeatureSet::new(),
            basis: RateBasis::Hourly,
            start,
            duration_minutes,
            requester_id: None,
            membership: None,
            discount_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: f64,
    pub discounts: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingQuote {
    pub spot_type: SpotType,
    pub base_rate: f64,
    pub surge_multiplier: f64,
    pub surge_factors: Vec<SurgeFactor>,
    pub surge_rate: f64,
    pub membership_discount: f64,
    pub code_discount: f64,
    /// Per-hour rate after discounts, never negative.
    pub final_rate: f64,
    pub basis: RateBasis,
    pub basis_rate: f64,
    pub duration_minutes: i64,
    pub total_estimate: f64,
    pub quoted_at: Ms,
    pub valid_until: Ms,
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingOption {
    pub duration_minutes: i64,
    pub quote: PricingQuote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SurgeInfo {
    pub zone: String,
    pub occupancy: f64,
    pub multiplier: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingError {
    Upstream(UpstreamError),
}

impl fmt::Display for PricingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PricingError::Upstream(e) => write!(f, "failed to calculate pricing: {e}"),
        }
    }
}

impl std::error::Error for PricingError {}

impl From<UpstreamError> for PricingError {
    fn from(e: UpstreamError) -> Self {
        PricingError::Upstream(e)
    }
}

/// Source of base hourly rates per spot type.
#[async_trait]
pub trait RateTable: Send + Sync {
    async fn base_rate(&self, spot_type: SpotType) -> Result<f64, UpstreamError>;
}

pub struct StaticRateTable {
    rates: HashMap<SpotType, f64>,
}

impl Default for StaticRateTable {
    fn default() -> Self {
        Self::new([
            (SpotType::Compact, 4.00),
            (SpotType::Regular, 5.00),
            (SpotType::Large, 7.50),
            (SpotType::Handicap, 5.00),
        ])
    }
}

impl StaticRateTable {
    pub fn new(rates: impl IntoIterator<Item = (SpotType, f64)>) -> Self {
        Self {
            rates: rates.into_iter().collect(),
        }
    }
}

#[async_trait]
impl RateTable for StaticRateTable {
    async fn base_rate(&self, spot_type: SpotType) -> Result<f64, UpstreamError> {
        self.rates
            .get(&spot_type)
            .copied()
            .ok_or_else(|| UpstreamError::new("rate table", format!("no rate for {spot_type}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub surge: SurgePolicy,
    pub utc_offset_minutes: i32,
    pub quote_validity_ms: Ms,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            surge: SurgePolicy::default(),
            utc_offset_minutes: 0,
            quote_validity_ms: 15 * MINUTE_MS,
        }
    }
}

/// Everything a quote depends on besides the context. Snapshot once,
/// reuse across a duration ladder so the hourly rate cannot drift.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteInputs {
    pub base_rate: f64,
    pub occupancy: f64,
    /// Only set when the code exists and is usable now.
    pub discount: Option<DiscountCode>,
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Pure quote computation.
pub fn compute_quote(
    ctx: &PricingContext,
    inputs: &QuoteInputs,
    policy: &PricingPolicy,
    now: Ms,
) -> PricingQuote {
    let local = local_time(ctx.start, policy.utc_offset_minutes);
    let surge = policy
        .surge
        .evaluate(local.as_ref(), &ctx.features, inputs.occupancy);

    let base_rate = inputs.base_rate.max(0.0);
    let surge_rate = round2(base_rate * surge.multiplier);

    let membership_discount = ctx
        .membership
        .map(|tier| round2(surge_rate * membership_benefits(tier).discount_percent / 100.0))
        .unwrap_or(0.0);
    let code_discount = inputs
        .discount
        .as_ref()
        .map(|code| round2(code.amount(surge_rate)))
        .unwrap_or(0.0);

    let final_rate = round2((surge_rate - membership_discount - code_discount).max(0.0));

    let hours = ctx.duration_minutes.max(0) as f64 / 60.0;
    let subtotal = round2(surge_rate * hours);
    let total = round2(final_rate * hours).max(0.0);

    PricingQuote {
        spot_type: ctx.spot_type,
        base_rate,
        surge_multiplier: surge.multiplier,
        surge_factors: surge.factors,
        surge_rate,
        membership_discount,
        code_discount,
        final_rate,
        basis: ctx.basis,
        basis_rate: round2(final_rate * ctx.basis.hours()),
        duration_minutes: ctx.duration_minutes,
        total_estimate: total,
        quoted_at: now,
        valid_until: now + policy.quote_validity_ms,
        breakdown: PriceBreakdown {
            subtotal,
            discounts: round2((subtotal - total).max(0.0)),
            total,
        },
    }
}

pub struct PricingEngine {
    rates: Arc<dyn RateTable>,
    discounts: Arc<dyn DiscountRegistry>,
    directory: Arc<dyn ResourceDirectory>,
    clock: Arc<dyn Clock>,
    policy: PricingPolicy,
}

impl PricingEngine {
    pub fn new(
        rates: Arc<dyn RateTable>,
        discounts: Arc<dyn DiscountRegistry>,
        directory: Arc<dyn ResourceDirectory>,
        clock: Arc<dyn Clock>,
        policy: PricingPolicy,
    ) -> Self {
        Self {
            rates,
            discounts,
            directory,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    /// Resolve a code for the pricing path: unknown, inactive or expired codes
    /// silently contribute nothing. Registry failures still propagate.
    async fn usable_discount(&self, code: Option<&str>, now: Ms) -> Result<Option<DiscountCode>, PricingError> {
        let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
            return Ok(None);
        };
        let resolved = self.discounts.resolve(code).await?;
        Ok(resolved.filter(|c| c.check(now).is_ok()))
    }

    pub async fn snapshot_inputs(&self, ctx: &PricingContext, now: Ms) -> Result<QuoteInputs, PricingError> {
        let base_rate = self.rates.base_rate(ctx.spot_type).await?;
        let occupancy = self
            .directory
            .current_occupancy_ratio(&OccupancyScope::Type(ctx.spot_type))
            .await?;
        let discount = self.usable_discount(ctx.discount_code.as_deref(), now).await?;
        Ok(QuoteInputs {
            base_rate,
            occupancy,
            discount,
        })
    }

    pub async fn quote(&self, ctx: &PricingContext) -> Result<PricingQuote, PricingError> {
        let now = self.clock.now_ms();
        let inputs = self.snapshot_inputs(ctx, now).await?;
        Ok(compute_quote(ctx, &inputs, &self.policy, now))
    }

    /// Quotes for the fixed duration ladder. `ctx.duration_minutes` is ignored;
    /// all entries share one input snapshot, so `final_rate` is identical.
    pub async fn pricing_options(&self, ctx: &PricingContext) -> Result<Vec<PricingOption>, PricingError> {
        let now = self.clock.now_ms();
        let inputs = self.snapshot_inputs(ctx, now).await?;
        Ok(PRICING_LADDER_MINUTES
            .iter()
            .map(|&minutes| {
                let ctx = PricingContext {
                    duration_minutes: minutes,
                    ..ctx.clone()
                };
                PricingOption {
                    duration_minutes: minutes,
                    quote: compute_quote(&ctx, &inputs, &self.policy, now),
                }
            })
            .collect())
    }

    /// Live surge state per facility zone, for a plain spot starting now.
    pub async fn current_surge_info(&self) -> Result<Vec<SurgeInfo>, PricingError> {
        let now = self.clock.now_ms();
        let local = local_time(now, self.policy.utc_offset_minutes);
        let mut infos = Vec::new();
        for zone in self.directory.zones().await? {
            let occupancy = self
                .directory
                .current_occupancy_ratio(&OccupancyScope::Zone(zone.clone()))
                .await?;
            let surge = self
                .policy
                .surge
                .evaluate(local.as_ref(), &FeatureSet::new(), occupancy);
            metrics::gauge!(crate::observability::SURGE_MULTIPLIER, "zone" => zone.clone())
                .set(surge.multiplier);
            infos.push(SurgeInfo {
                reason: surge.reason(),
                zone,
                occupancy,
                multiplier: surge.multiplier,
            });
        }
        Ok(infos)
    }

    /// Explicit existence/expiry check for UI feedback.
    pub async fn validate_discount_code(&self, code: &str) -> Result<DiscountValidation, PricingError> {
        if code.trim().is_empty() {
            return Ok(DiscountValidation {
                valid: false,
                reason: Some("discount code is empty".into()),
            });
        }
        let now = self.clock.now_ms();
        let validation = match self.discounts.resolve(code).await? {
            None => DiscountValidation {
                valid: false,
                reason: Some("discount code not found".into()),
            },
            Some(found) => match found.check(now) {
                Ok(()) => DiscountValidation {
                    valid: true,
                    reason: None,
                },
                Err(reason) => DiscountValidation {
                    valid: false,
                    reason: Some(reason.into()),
                },
            },
        };
        Ok(validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryDirectory;
    use chrono::{FixedOffset, TimeZone};

    fn ts(y: i32, m: u32, d: u32, h: u32) -> Ms {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn inputs(base: f64) -> QuoteInputs {
        QuoteInputs {
            base_rate: base,
            occupancy: 0.0,
            discount: None,
        }
    }

    fn spot(id: &str, spot_type: SpotType, zone: &str, occupied: bool) -> Spot {
        Spot {
            id: id.into(),
            spot_type,
            features: FeatureSet::new(),
            zone: zone.into(),
            occupied,
        }
    }

    struct BrokenRates;

    #[async_trait]
    impl RateTable for BrokenRates {
        async fn base_rate(&self, _: SpotType) -> Result<f64, UpstreamError> {
            Err(UpstreamError::new("rate table", "timeout"))
        }
    }

    fn engine_with(
        rates: Arc<dyn RateTable>,
        codes: Vec<DiscountCode>,
        directory: InMemoryDirectory,
        now: Ms,
    ) -> PricingEngine {
        PricingEngine::new(
            rates,
            Arc::new(InMemoryDiscountRegistry::with_codes(codes)),
            Arc::new(directory),
            Arc::new(ManualClock::new(now)),
            PricingPolicy::default(),
        )
    }

    fn percent_code(code: &str, pct: f64) -> DiscountCode {
        DiscountCode {
            code: code.into(),
            kind: DiscountKind::Percent(pct),
            max_discount: None,
            valid_from: None,
            valid_until: None,
            active: true,
        }
    }

    #[test]
    fn friday_morning_premium_example() {
        let mut ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 15, 8), 120);
        ctx.membership = Some(MembershipTier::Premium);
        let q = compute_quote(&ctx, &inputs(5.0), &PricingPolicy::default(), 0);
        assert!(approx(q.surge_multiplier, 1.5));
        assert!(approx(q.surge_rate, 7.5));
        assert!(approx(q.membership_discount, 0.75));
        assert!(approx(q.final_rate, 6.75));
        assert!(approx(q.total_estimate, 13.5));
        assert!(approx(q.breakdown.subtotal, 15.0));
        assert!(approx(q.breakdown.discounts, 1.5));
        assert!(approx(q.breakdown.total, 13.5));
    }

    #[test]
    fn discounts_both_computed_against_surge_rate() {
        let mut ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 13, 12), 60);
        ctx.membership = Some(MembershipTier::Vip);
        let mut inp = inputs(10.0);
        inp.discount = Some(percent_code("TEN", 10.0));
        let q = compute_quote(&ctx, &inp, &PricingPolicy::default(), 0);
        // 20% of 10 and 10% of 10, not 10% of 8.
        assert!(approx(q.membership_discount, 2.0));
        assert!(approx(q.code_discount, 1.0));
        assert!(approx(q.final_rate, 7.0));
    }

    #[test]
    fn oversized_discount_floors_at_zero() {
        let mut ctx = PricingContext::hourly(SpotType::Compact, ts(2027, 1, 13, 12), 180);
        ctx.membership = Some(MembershipTier::Corporate);
        let mut inp = inputs(4.0);
        inp.discount = Some(DiscountCode {
            kind: DiscountKind::Fixed(50.0),
            ..percent_code("HUGE", 0.0)
        });
        let q = compute_quote(&ctx, &inp, &PricingPolicy::default(), 0);
        assert_eq!(q.final_rate, 0.0);
        assert_eq!(q.total_estimate, 0.0);
        assert!(q.breakdown.discounts >= 0.0);
    }

    #[test]
    fn basis_rate_scales_final_rate() {
        let mut ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 13, 12), 60);
        ctx.basis = RateBasis::Daily;
        let q = compute_quote(&ctx, &inputs(5.0), &PricingPolicy::default(), 0);
        assert!(approx(q.basis_rate, 120.0));
    }

    #[test]
    fn quote_validity_deadline() {
        let ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 13, 12), 60);
        let q = compute_quote(&ctx, &inputs(5.0), &PricingPolicy::default(), 1_000);
        assert_eq!(q.quoted_at, 1_000);
        assert_eq!(q.valid_until, 1_000 + 15 * MINUTE_MS);
    }

    #[tokio::test]
    async fn pricing_options_share_final_rate() {
        let dir = InMemoryDirectory::with_spots([
            spot("R-1", SpotType::Regular, "main", true),
            spot("R-2", SpotType::Regular, "main", false),
            spot("R-3", SpotType::Regular, "main", true),
        ]);
        let engine = engine_with(Arc::new(StaticRateTable::default()), vec![], dir, 0);
        let mut ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 16, 18), 0);
        ctx.features.insert(Feature::EvCharging);
        ctx.membership = Some(MembershipTier::Premium);

        let options = engine.pricing_options(&ctx).await.unwrap();
        let durations: Vec<i64> = options.iter().map(|o| o.duration_minutes).collect();
        assert_eq!(durations, vec![60, 120, 240, 480, 1440]);

        let rate = options[0].quote.final_rate;
        assert!(options.iter().all(|o| o.quote.final_rate == rate));
        for pair in options.windows(2) {
            assert!(pair[1].quote.total_estimate > pair[0].quote.total_estimate);
        }
    }

    #[tokio::test]
    async fn unknown_or_expired_code_is_ignored_when_pricing() {
        let mut expired = percent_code("OLD", 50.0);
        expired.valid_until = Some(10);
        let engine = engine_with(
            Arc::new(StaticRateTable::default()),
            vec![expired],
            InMemoryDirectory::new(),
            1_000,
        );
        let mut ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 13, 12), 60);
        ctx.discount_code = Some("NOPE".into());
        let q = engine.quote(&ctx).await.unwrap();
        assert_eq!(q.code_discount, 0.0);

        ctx.discount_code = Some("old".into());
        let q = engine.quote(&ctx).await.unwrap();
        assert_eq!(q.code_discount, 0.0);
        assert!(approx(q.final_rate, 5.0));
    }

    #[tokio::test]
    async fn validate_discount_code_reports_reason() {
        let mut expired = percent_code("OLD", 50.0);
        expired.valid_until = Some(10);
        let engine = engine_with(
            Arc::new(StaticRateTable::default()),
            vec![expired, percent_code("GOOD", 5.0)],
            InMemoryDirectory::new(),
            1_000,
        );
        let ok = engine.validate_discount_code("good").await.unwrap();
        assert!(ok.valid);
        assert!(ok.reason.is_none());

        let old = engine.validate_discount_code("OLD").await.unwrap();
        assert!(!old.valid);
        assert_eq!(old.reason.as_deref(), Some("discount code has expired"));

        let missing = engine.validate_discount_code("MISSING").await.unwrap();
        assert_eq!(missing.reason.as_deref(), Some("discount code not found"));

        let empty = engine.validate_discount_code("  ").await.unwrap();
        assert!(!empty.valid);
    }

    #[tokio::test]
    async fn rate_table_failure_propagates() {
        let engine = engine_with(Arc::new(BrokenRates), vec![], InMemoryDirectory::new(), 0);
        let ctx = PricingContext::hourly(SpotType::Regular, ts(2027, 1, 13, 12), 60);
        let err = engine.quote(&ctx).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to calculate pricing"));
    }

    #[tokio::test]
    async fn surge_info_per_zone_within_bounds() {
        let dir = InMemoryDirectory::with_spots([
            spot("N-1", SpotType::Regular, "north", true),
            spot("N-2", SpotType::Regular, "north", true),
            spot("S-1", SpotType::Regular, "south", false),
        ]);
        // Wednesday noon: only occupancy matters.
        let engine = engine_with(
            Arc::new(StaticRateTable::default()),
            vec![],
            dir,
            ts(2027, 1, 13, 12),
        );
        let info = engine.current_surge_info().await.unwrap();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].zone, "north");
        assert!(approx(info[0].multiplier, 3.0));
        assert_eq!(info[0].reason, "high occupancy");
        assert_eq!(info[1].zone, "south");
        assert_eq!(info[1].multiplier, 1.0);
        assert!(info.iter().all(|i| (1.0..=3.0).contains(&i.multiplier)));
    }
}

use crate::model::MembershipTier;

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipBenefits {
    pub tier: MembershipTier,
    /// Percentage taken off the surge-adjusted rate.
    pub discount_percent: f64,
    pub priority_booking: bool,
    pub free_hours_per_month: u32,
    pub features: &'static [&'static str],
}

pub fn membership_benefits(tier: MembershipTier) -> MembershipBenefits {
    match tier {
        MembershipTier::Basic => MembershipBenefits {
            tier,
            discount_percent: 0.0,
            priority_booking: false,
            free_hours_per_month: 0,
            features: &["standard_booking"],
        },
        MembershipTier::Premium => MembershipBenefits {
            tier,
            discount_percent: 10.0,
            priority_booking: true,
            free_hours_per_month: 2,
            features: &["standard_booking", "extended_cancellation"],
        },
        MembershipTier::Vip => MembershipBenefits {
            tier,
            discount_percent: 20.0,
            priority_booking: true,
            free_hours_per_month: 5,
            features: &["standard_booking", "extended_cancellation", "valet", "reserved_zone"],
        },
        MembershipTier::Corporate => MembershipBenefits {
            tier,
            discount_percent: 25.0,
            priority_booking: true,
            free_hours_per_month: 10,
            features: &["standard_booking", "monthly_invoicing", "fleet_management"],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discount_percentages() {
        assert_eq!(membership_benefits(MembershipTier::Basic).discount_percent, 0.0);
        assert_eq!(membership_benefits(MembershipTier::Premium).discount_percent, 10.0);
        assert_eq!(membership_benefits(MembershipTier::Vip).discount_percent, 20.0);
        assert_eq!(membership_benefits(MembershipTier::Corporate).discount_percent, 25.0);
    }

    #[test]
    fn basic_has_no_priority() {
        let basic = membership_benefits(MembershipTier::Basic);
        assert!(!basic.priority_booking);
        assert_eq!(basic.free_hours_per_month, 0);
        assert!(membership_benefits(MembershipTier::Vip).features.contains(&"valet"));
    }
}

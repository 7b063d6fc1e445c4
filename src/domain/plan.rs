use super::subscription::PlanType;
use rust_decimal::Decimal;
use serde::Serialize;

/// A tier offered to patients. Read-only reference data.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct Plan {
    pub plan: PlanType,
    pub name: &'static str,
    pub price: Decimal,
    pub currency: &'static str,
    pub duration_days: u32,
    pub features: &'static [&'static str],
    pub description: &'static str,
}

pub fn catalogue() -> [Plan; 3] {
    [
        Plan {
            plan: PlanType::Basic,
            name: "Basic Plan",
            price: Decimal::from(25_000),
            currency: "XOF",
            duration_days: 30,
            features: &[
                "3 consultations per month",
                "Basic medical follow-up",
                "Access to medical records",
            ],
            description: "Suited to regular medical follow-up",
        },
        Plan {
            plan: PlanType::Premium,
            name: "Premium Plan",
            price: Decimal::from(45_000),
            currency: "XOF",
            duration_days: 30,
            features: &[
                "Unlimited consultations",
                "Advanced medical follow-up",
                "Access to specialists",
                "Laboratory tests included",
                "24/7 phone support",
            ],
            description: "Comprehensive care",
        },
        Plan {
            plan: PlanType::Vip,
            name: "VIP Plan",
            price: Decimal::from(75_000),
            currency: "XOF",
            duration_days: 30,
            features: &[
                "Everything in Premium",
                "Home consultations",
                "Dedicated personal physician",
                "Priority emergencies",
                "Specialised examinations included",
                "Medical concierge",
            ],
            description: "Premium service with personal support",
        },
    ]
}

pub fn plan(plan_type: PlanType) -> Plan {
    // The catalogue has exactly one entry per tier.
    let [basic, premium, vip] = catalogue();
    match plan_type {
        PlanType::Basic => basic,
        PlanType::Premium => premium,
        PlanType::Vip => vip,
    }
}

use super::money::{Amount, Currency};
use super::patient::PatientId;
use crate::error::{BillingError, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type SubscriptionId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Basic,
    Premium,
    Vip,
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanType::Basic => "basic",
            PlanType::Premium => "premium",
            PlanType::Vip => "vip",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A patient's entitlement window for one plan.
///
/// State machine: `Pending -> Active -> Expired`, and `Pending | Active ->
/// Cancelled`. Nothing leaves `Expired` or `Cancelled`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub plan: PlanType,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub price: Amount,
    pub currency: Currency,
    pub duration_days: u32,
    pub description: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub patient_id: PatientId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Window end for a subscription starting at `start`.
pub fn window_end(start: DateTime<Utc>, duration_days: u32) -> Result<DateTime<Utc>> {
    if duration_days == 0 {
        return Err(BillingError::ValidationError(
            "Duration must be at least one day".to_string(),
        ));
    }
    Ok(start + Duration::days(i64::from(duration_days)))
}

impl Subscription {
    /// `true` when the subscription currently grants access to services.
    pub fn is_entitled(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date > now
    }

    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SubscriptionStatus::Pending {
            return Err(BillingError::InvalidState(format!(
                "Only pending subscriptions can be activated (subscription {} is {})",
                self.id, self.status
            )));
        }
        self.status = SubscriptionStatus::Active;
        self.updated_at = now;
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SubscriptionStatus::Active {
            return Err(BillingError::InvalidState(format!(
                "Only active subscriptions can expire (subscription {} is {})",
                self.id, self.status
            )));
        }
        self.status = SubscriptionStatus::Expired;
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            SubscriptionStatus::Pending | SubscriptionStatus::Active => {
                self.status = SubscriptionStatus::Cancelled;
                self.updated_at = now;
                Ok(())
            }
            SubscriptionStatus::Cancelled => Err(BillingError::InvalidState(format!(
                "Subscription {} is already cancelled",
                self.id
            ))),
            SubscriptionStatus::Expired => Err(BillingError::InvalidState(format!(
                "Subscription {} has expired and cannot be cancelled",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct PlanBreakdown {
    pub count: u64,
    pub total_revenue: Decimal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct SubscriptionStats {
    pub total_subscriptions: u64,
    pub active_subscriptions: u64,
    /// Prices of active subscriptions created in the current calendar month.
    pub monthly_revenue: Decimal,
    pub by_status: BTreeMap<SubscriptionStatus, u64>,
    pub by_plan: BTreeMap<PlanType, PlanBreakdown>,
}

impl SubscriptionStats {
    pub fn from_subscriptions<'a>(
        subscriptions: impl IntoIterator<Item = &'a Subscription>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut stats = SubscriptionStats::default();
        for sub in subscriptions {
            stats.total_subscriptions += 1;
            *stats.by_status.entry(sub.status).or_default() += 1;

            let plan = stats.by_plan.entry(sub.plan).or_default();
            plan.count += 1;
            plan.total_revenue += sub.price.value();

            if sub.status == SubscriptionStatus::Active {
                stats.active_subscriptions += 1;
                if sub.created_at.year() == now.year() && sub.created_at.month() == now.month() {
                    stats.monthly_revenue += sub.price.value();
                }
            }
        }
        stats
    }
}

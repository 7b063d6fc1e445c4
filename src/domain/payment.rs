use super::money::{Amount, Currency};
use super::patient::{PatientId, StaffId};
use super::subscription::SubscriptionId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

pub type PaymentId = u64;

/// Opaque key-value data attached to a payment. The ledger stores it without
/// looking inside.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    /// Maps the gateway's free-text status onto the ledger vocabulary.
    /// Anything unrecognised is treated as still pending.
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "completed" | "accepted" => PaymentStatus::Completed,
            "failed" | "declined" => PaymentStatus::Failed,
            "cancelled" | "canceled" => PaymentStatus::Cancelled,
            _ => PaymentStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for PaymentStatus {
    type Err = crate::error::BillingError;

    /// Parses the ledger's own vocabulary. Provider strings go through
    /// [`PaymentStatus::from_provider`] instead.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            "cancelled" => Ok(PaymentStatus::Cancelled),
            other => Err(crate::error::BillingError::ValidationError(format!(
                "Unknown payment status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    MobileMoney,
    Gateway,
}

impl PaymentMethod {
    /// Every method except cash is collected through the hosted checkout.
    pub fn requires_gateway(self) -> bool {
        !matches!(self, PaymentMethod::Cash)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::MobileMoney => "mobile_money",
            PaymentMethod::Gateway => "gateway",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Subscription,
    Consultation,
    Treatment,
    #[default]
    Other,
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentType::Subscription => "subscription",
            PaymentType::Consultation => "consultation",
            PaymentType::Treatment => "treatment",
            PaymentType::Other => "other",
        };
        f.write_str(s)
    }
}

static LAST_ISSUED_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Generates a transaction identifier of the form `TXN-<millis>-<SUFFIX>`.
///
/// The millisecond component never goes backwards within the process (it is
/// bumped past the last issued value if the clock stalls), and the suffix is
/// the first eight hex digits of a random UUID.
pub fn generate_transaction_id() -> String {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_ISSUED_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    let millis = now.max(previous + 1);
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_ascii_uppercase();
    format!("TXN-{}-{}", millis, suffix)
}

/// A financial record. Never deleted once stored.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Payment {
    pub id: PaymentId,
    pub transaction_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub r#type: PaymentType,
    pub status: PaymentStatus,
    pub description: String,
    /// Identifier assigned by the payment gateway, once known.
    pub gateway_id: Option<String>,
    pub external_reference: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub patient_id: PatientId,
    pub created_by: StaffId,
    pub subscription_id: Option<SubscriptionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Reads a string entry from the metadata map.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Count and summed amount for one slice of the ledger.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct Breakdown {
    pub count: u64,
    pub total_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct PaymentStats {
    pub total_payments: u64,
    /// Sum of completed payment amounts.
    pub total_revenue: Decimal,
    pub by_status: BTreeMap<PaymentStatus, Breakdown>,
    pub by_method: BTreeMap<PaymentMethod, Breakdown>,
}

impl PaymentStats {
    pub fn from_payments<'a>(payments: impl IntoIterator<Item = &'a Payment>) -> Self {
        let mut stats = PaymentStats::default();
        for payment in payments {
            let amount = payment.amount.value();
            stats.total_payments += 1;
            if payment.status == PaymentStatus::Completed {
                stats.total_revenue += amount;
            }

            let status = stats.by_status.entry(payment.status).or_default();
            status.count += 1;
            status.total_amount += amount;

            let method = stats.by_method.entry(payment.method).or_default();
            method.count += 1;
            method.total_amount += amount;
        }
        stats
    }
}

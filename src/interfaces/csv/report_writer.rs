use crate::domain::payment::Payment;
use crate::domain::plan::Plan;
use crate::domain::subscription::Subscription;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: u64,
    transaction_id: &'a str,
    patient: u64,
    r#type: String,
    method: String,
    amount: String,
    currency: &'a str,
    status: String,
    subscription: Option<u64>,
    gateway_id: Option<&'a str>,
}

#[derive(Serialize)]
struct SubscriptionRow<'a> {
    id: u64,
    patient: u64,
    plan: String,
    status: String,
    start_date: String,
    end_date: String,
    price: String,
    currency: &'a str,
}

#[derive(Serialize)]
struct PlanRow<'a> {
    plan: String,
    name: &'a str,
    price: String,
    currency: &'a str,
    duration_days: u32,
    features: String,
}

/// Writes ledger and subscription reports as CSV.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments(&mut self, payments: &[Payment]) -> Result<()> {
        for payment in payments {
            self.writer.serialize(PaymentRow {
                id: payment.id,
                transaction_id: &payment.transaction_id,
                patient: payment.patient_id,
                r#type: payment.r#type.to_string(),
                method: payment.method.to_string(),
                amount: payment.amount.to_string(),
                currency: payment.currency.as_str(),
                status: payment.status.to_string(),
                subscription: payment.subscription_id,
                gateway_id: payment.gateway_id.as_deref(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Features are joined with `;` to keep one plan per row.
    pub fn write_plans(&mut self, plans: &[Plan]) -> Result<()> {
        for plan in plans {
            self.writer.serialize(PlanRow {
                plan: plan.plan.to_string(),
                name: plan.name,
                price: plan.price.normalize().to_string(),
                currency: plan.currency,
                duration_days: plan.duration_days,
                features: plan.features.join(";"),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_subscriptions(&mut self, subscriptions: &[Subscription]) -> Result<()> {
        for subscription in subscriptions {
            self.writer.serialize(SubscriptionRow {
                id: subscription.id,
                patient: subscription.patient_id,
                plan: subscription.plan.to_string(),
                status: subscription.status.to_string(),
                start_date: subscription.start_date.to_rfc3339(),
                end_date: subscription.end_date.to_rfc3339(),
                price: subscription.price.to_string(),
                currency: subscription.currency.as_str(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

use crate::domain::money::{Amount, Currency};
use crate::domain::patient::{PatientId, StaffId};
use crate::domain::payment::{
    Metadata, Payment, PaymentId, PaymentMethod, PaymentStats, PaymentStatus, PaymentType,
    generate_transaction_id,
};
use crate::domain::ports::{PaymentStoreBox, SharedPatientDirectory};
use crate::domain::subscription::SubscriptionId;
use crate::error::{BillingError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

/// Everything needed to open a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub patient_id: PatientId,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub r#type: PaymentType,
    pub description: String,
    pub subscription_id: Option<SubscriptionId>,
    pub external_reference: Option<String>,
    pub metadata: Metadata,
    pub created_by: StaffId,
}

/// The authoritative store for payment records.
///
/// Generates transaction identifiers and applies status transitions. It does
/// not decide whether a transition is allowed after a terminal status; that
/// policy belongs to reconciliation so that administrative corrections stay
/// possible.
pub struct TransactionLedger {
    payments: PaymentStoreBox,
    patients: SharedPatientDirectory,
}

impl TransactionLedger {
    pub fn new(payments: PaymentStoreBox, patients: SharedPatientDirectory) -> Self {
        Self { payments, patients }
    }

    /// Opens a payment. Cash is settled on the spot; every other method starts
    /// out pending.
    pub async fn open(&self, request: NewPayment) -> Result<Payment> {
        let amount = Amount::new(request.amount)?;
        if request.r#type == PaymentType::Subscription && request.subscription_id.is_none() {
            return Err(BillingError::ValidationError(
                "Subscription payments must reference a subscription".to_string(),
            ));
        }
        if !self.patients.exists(request.patient_id).await? {
            return Err(BillingError::not_found("Patient", request.patient_id));
        }

        let status = match request.method {
            PaymentMethod::Cash => PaymentStatus::Completed,
            _ => PaymentStatus::Pending,
        };
        let now = Utc::now();
        let payment = Payment {
            id: self.payments.next_id().await?,
            transaction_id: generate_transaction_id(),
            amount,
            currency: request.currency,
            method: request.method,
            r#type: request.r#type,
            status,
            description: request.description,
            gateway_id: None,
            external_reference: request.external_reference,
            metadata: request.metadata,
            patient_id: request.patient_id,
            created_by: request.created_by,
            subscription_id: request.subscription_id,
            created_at: now,
            updated_at: now,
        };
        self.payments.store(payment.clone()).await?;

        info!(
            payment_id = payment.id,
            transaction_id = %payment.transaction_id,
            patient_id = payment.patient_id,
            amount = %payment.amount,
            method = %payment.method,
            status = %payment.status,
            "Payment opened"
        );
        Ok(payment)
    }

    /// Moves a payment to `status`, recording the gateway reference when one
    /// is supplied.
    pub async fn transition(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        gateway_reference: Option<String>,
    ) -> Result<Payment> {
        let mut payment = self.find_by_id(id).await?;
        let previous = payment.status;

        payment.status = status;
        if let Some(reference) = gateway_reference {
            payment.gateway_id = Some(reference);
        }
        payment.updated_at = Utc::now();
        self.payments.store(payment.clone()).await?;

        info!(
            payment_id = id,
            transaction_id = %payment.transaction_id,
            from = %previous,
            to = %status,
            "Payment status updated"
        );
        Ok(payment)
    }

    /// Merges `metadata` into the payment's map and records a gateway id.
    /// The keys are not interpreted here.
    pub async fn annotate(
        &self,
        id: PaymentId,
        metadata: Metadata,
        gateway_id: Option<String>,
    ) -> Result<Payment> {
        let mut payment = self.find_by_id(id).await?;
        payment.metadata.extend(metadata);
        if gateway_id.is_some() {
            payment.gateway_id = gateway_id;
        }
        payment.updated_at = Utc::now();
        self.payments.store(payment.clone()).await?;
        Ok(payment)
    }

    pub async fn find_by_id(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Payment", id))
    }

    pub async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Payment> {
        self.payments
            .get_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| BillingError::not_found("Transaction", transaction_id))
    }

    /// Payments funding the subscription, oldest first.
    pub async fn for_subscription(&self, subscription_id: SubscriptionId) -> Result<Vec<Payment>> {
        self.payments.get_by_subscription(subscription_id).await
    }

    pub async fn all(&self) -> Result<Vec<Payment>> {
        self.payments.get_all().await
    }

    pub async fn stats(&self) -> Result<PaymentStats> {
        let payments = self.payments.get_all().await?;
        Ok(PaymentStats::from_payments(&payments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patient::Patient;
    use crate::infrastructure::in_memory::{InMemoryPatientDirectory, InMemoryPaymentStore};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn ledger() -> TransactionLedger {
        let patients = InMemoryPatientDirectory::new();
        patients.register(Patient::new(1, "Awa", "Diallo")).await;
        TransactionLedger::new(Box::new(InMemoryPaymentStore::new()), Arc::new(patients))
    }

    fn consultation(amount: Decimal, method: PaymentMethod) -> NewPayment {
        NewPayment {
            patient_id: 1,
            amount,
            currency: Currency::new("XOF").unwrap(),
            method,
            r#type: PaymentType::Consultation,
            description: "Consultation".to_string(),
            subscription_id: None,
            external_reference: Some("REF-2024-001".to_string()),
            metadata: Metadata::new(),
            created_by: 9,
        }
    }

    #[tokio::test]
    async fn test_cash_payment_is_completed_immediately() {
        let ledger = ledger().await;
        let payment = ledger
            .open(consultation(dec!(150), PaymentMethod::Cash))
            .await
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.amount.value(), dec!(150));
        assert_eq!(payment.created_by, 9);
        assert!(payment.transaction_id.starts_with("TXN-"));
    }

    #[tokio::test]
    async fn test_non_cash_payment_starts_pending() {
        let ledger = ledger().await;
        let payment = ledger
            .open(consultation(dec!(150), PaymentMethod::Card))
            .await
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let ledger = ledger().await;
        for amount in [dec!(0), dec!(-10)] {
            let result = ledger.open(consultation(amount, PaymentMethod::Cash)).await;
            assert!(matches!(result, Err(BillingError::ValidationError(_))));
        }
        assert!(ledger.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_patient_is_not_found() {
        let ledger = ledger().await;
        let mut request = consultation(dec!(150), PaymentMethod::Cash);
        request.patient_id = 42;
        assert!(matches!(
            ledger.open(request).await,
            Err(BillingError::NotFound { entity: "Patient", .. })
        ));
    }

    #[tokio::test]
    async fn test_subscription_payment_requires_link() {
        let ledger = ledger().await;
        let mut request = consultation(dec!(25000), PaymentMethod::Gateway);
        request.r#type = PaymentType::Subscription;
        assert!(matches!(
            ledger.open(request).await,
            Err(BillingError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_transition_records_gateway_reference() {
        let ledger = ledger().await;
        let payment = ledger
            .open(consultation(dec!(150), PaymentMethod::MobileMoney))
            .await
            .unwrap();

        let updated = ledger
            .transition(payment.id, PaymentStatus::Completed, Some("CP-1".to_string()))
            .await
            .unwrap();
        assert_eq!(updated.status, PaymentStatus::Completed);
        assert_eq!(updated.gateway_id.as_deref(), Some("CP-1"));
        assert_eq!(updated.transaction_id, payment.transaction_id);

        // Administrative correction is allowed at this level.
        let corrected = ledger
            .transition(payment.id, PaymentStatus::Cancelled, None)
            .await
            .unwrap();
        assert_eq!(corrected.status, PaymentStatus::Cancelled);
        assert_eq!(corrected.gateway_id.as_deref(), Some("CP-1"));

        assert!(matches!(
            ledger.transition(999, PaymentStatus::Completed, None).await,
            Err(BillingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_transaction_id() {
        let ledger = ledger().await;
        let payment = ledger
            .open(consultation(dec!(150), PaymentMethod::Cash))
            .await
            .unwrap();

        let found = ledger
            .find_by_transaction_id(&payment.transaction_id)
            .await
            .unwrap();
        assert_eq!(found.id, payment.id);
        assert!(matches!(
            ledger.find_by_transaction_id("TXN-0-MISSING").await,
            Err(BillingError::NotFound { entity: "Transaction", .. })
        ));
    }

    #[tokio::test]
    async fn test_annotate_merges_metadata() {
        let ledger = ledger().await;
        let mut request = consultation(dec!(150), PaymentMethod::Card);
        request
            .metadata
            .insert("doctor_id".to_string(), serde_json::json!(5));
        let payment = ledger.open(request).await.unwrap();

        let mut extra = Metadata::new();
        extra.insert("checkout_url".to_string(), serde_json::json!("http://x/1"));
        let annotated = ledger
            .annotate(payment.id, extra, Some("SIM-1".to_string()))
            .await
            .unwrap();

        assert_eq!(annotated.metadata.len(), 2);
        assert_eq!(annotated.metadata_str("checkout_url"), Some("http://x/1"));
        assert_eq!(annotated.gateway_id.as_deref(), Some("SIM-1"));
    }

    #[tokio::test]
    async fn test_for_subscription() {
        let ledger = ledger().await;
        let mut request = consultation(dec!(25000), PaymentMethod::Card);
        request.r#type = PaymentType::Subscription;
        request.subscription_id = Some(3);
        let first = ledger.open(request.clone()).await.unwrap();
        ledger
            .open(consultation(dec!(150), PaymentMethod::Cash))
            .await
            .unwrap();
        let second = ledger.open(request).await.unwrap();

        let linked = ledger.for_subscription(3).await.unwrap();
        assert_eq!(
            linked.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![first.id, second.id]
        );
        assert!(ledger.for_subscription(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let ledger = ledger().await;
        ledger
            .open(consultation(dec!(150), PaymentMethod::Cash))
            .await
            .unwrap();
        ledger
            .open(consultation(dec!(50), PaymentMethod::Cash))
            .await
            .unwrap();
        let card = ledger
            .open(consultation(dec!(300), PaymentMethod::Card))
            .await
            .unwrap();
        ledger
            .transition(card.id, PaymentStatus::Failed, None)
            .await
            .unwrap();

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total_payments, 3);
        assert_eq!(stats.total_revenue, dec!(200));
        assert_eq!(stats.by_status[&PaymentStatus::Completed].count, 2);
        assert_eq!(stats.by_status[&PaymentStatus::Failed].total_amount, dec!(300));
        assert_eq!(stats.by_method[&PaymentMethod::Cash].total_amount, dec!(200));
        assert_eq!(stats.by_method[&PaymentMethod::Card].count, 1);
    }
}

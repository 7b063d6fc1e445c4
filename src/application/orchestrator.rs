use super::ledger::{NewPayment, TransactionLedger};
use super::lifecycle::{NewSubscription, SubscriptionLifecycle};
use super::locks::KeyedLocks;
use crate::domain::money::Currency;
use crate::domain::patient::{PatientId, StaffId};
use crate::domain::payment::{
    Metadata, Payment, PaymentId, PaymentMethod, PaymentStats, PaymentStatus, PaymentType,
};
use crate::domain::plan;
use crate::domain::ports::{CheckoutRequest, Customer, PaymentGatewayBox, SharedPatientDirectory};
use crate::domain::subscription::{
    PlanType, Subscription, SubscriptionId, SubscriptionStats, SubscriptionStatus,
};
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Metadata key holding the hosted checkout link.
pub const META_CHECKOUT_URL: &str = "checkout_url";
pub const META_SUBSCRIPTION_TYPE: &str = "subscription_type";
pub const META_FEATURES: &str = "features";
pub const META_IS_RENEWAL: &str = "is_renewal";
pub const META_PREVIOUS_SUBSCRIPTION_ID: &str = "previous_subscription_id";

#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub patient_id: PatientId,
    pub plan: PlanType,
    pub price: Decimal,
    pub currency: Currency,
    pub duration_days: u32,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub method: PaymentMethod,
}

impl SubscriptionRequest {
    /// A request priced from the plan catalogue.
    pub fn from_catalogue(patient_id: PatientId, plan: PlanType, method: PaymentMethod) -> Result<Self> {
        let entry = plan::plan(plan);
        Ok(Self {
            patient_id,
            plan,
            price: entry.price,
            currency: Currency::new(entry.currency)?,
            duration_days: entry.duration_days,
            description: Some(entry.description.to_string()),
            features: entry.features.iter().map(|f| f.to_string()).collect(),
            method,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RenewalRequest {
    pub duration_days: Option<u32>,
    pub price: Option<Decimal>,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub patient_id: PatientId,
    pub amount: Decimal,
    pub currency: Currency,
    pub method: PaymentMethod,
    pub r#type: PaymentType,
    pub description: String,
    pub external_reference: Option<String>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct SubscriptionCheckout {
    pub subscription: Subscription,
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentCheckout {
    pub payment: Payment,
    pub checkout_url: Option<String>,
}

/// Coordinates the ledger, the subscription lifecycle and the gateway.
///
/// Neither the ledger nor the lifecycle manager knows about the other; this
/// is the only place where a payment outcome turns into an entitlement.
pub struct BillingOrchestrator {
    ledger: Arc<TransactionLedger>,
    lifecycle: Arc<SubscriptionLifecycle>,
    gateway: PaymentGatewayBox,
    patients: SharedPatientDirectory,
    reconciliations: KeyedLocks<String>,
    fundings: KeyedLocks<SubscriptionId>,
}

impl BillingOrchestrator {
    pub fn new(
        ledger: Arc<TransactionLedger>,
        lifecycle: Arc<SubscriptionLifecycle>,
        gateway: PaymentGatewayBox,
        patients: SharedPatientDirectory,
    ) -> Self {
        Self {
            ledger,
            lifecycle,
            gateway,
            patients,
            reconciliations: KeyedLocks::default(),
            fundings: KeyedLocks::default(),
        }
    }

    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    pub fn lifecycle(&self) -> &Arc<SubscriptionLifecycle> {
        &self.lifecycle
    }

    /// Creates a pending subscription and the payment that funds it.
    ///
    /// On gateway failure the payment is marked failed, the subscription is
    /// left pending for a retry, and `GatewayFailure` is returned.
    pub async fn create_subscription_with_payment(
        &self,
        request: SubscriptionRequest,
        staff_id: StaffId,
    ) -> Result<SubscriptionCheckout> {
        let subscription = self
            .lifecycle
            .create(NewSubscription {
                patient_id: request.patient_id,
                plan: request.plan,
                price: request.price,
                currency: request.currency,
                duration_days: request.duration_days,
                description: request.description,
                features: request.features,
            })
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert(META_SUBSCRIPTION_TYPE.to_string(), json!(subscription.plan));
        metadata.insert(META_FEATURES.to_string(), json!(subscription.features));
        let description = format!(
            "{} subscription - {}",
            subscription.plan,
            subscription.description.as_deref().unwrap_or_default()
        );

        self.fund(subscription, request.method, description, metadata, staff_id)
            .await
    }

    /// Renews `id` and opens the payment for the new subscription record.
    pub async fn renew_subscription_with_payment(
        &self,
        id: SubscriptionId,
        request: RenewalRequest,
        staff_id: StaffId,
    ) -> Result<SubscriptionCheckout> {
        let renewal = self
            .lifecycle
            .renew(id, request.duration_days, request.price)
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert(META_SUBSCRIPTION_TYPE.to_string(), json!(renewal.plan));
        metadata.insert(META_IS_RENEWAL.to_string(), json!(true));
        metadata.insert(META_PREVIOUS_SUBSCRIPTION_ID.to_string(), json!(id));
        let description = format!("{} subscription renewal", renewal.plan);

        self.fund(renewal, request.method, description, metadata, staff_id)
            .await
    }

    /// Issues a fresh payment for a subscription that is still pending, e.g.
    /// after the gateway failed on the first attempt.
    ///
    /// Refused while an earlier payment for the subscription is pending or
    /// completed.
    pub async fn retry_subscription_payment(
        &self,
        id: SubscriptionId,
        method: PaymentMethod,
        staff_id: StaffId,
    ) -> Result<SubscriptionCheckout> {
        let subscription = self.lifecycle.find_by_id(id).await?;
        if subscription.status != SubscriptionStatus::Pending {
            return Err(BillingError::InvalidState(format!(
                "Subscription {} is {}, only pending subscriptions can be paid",
                id, subscription.status
            )));
        }

        let mut metadata = Metadata::new();
        metadata.insert(META_SUBSCRIPTION_TYPE.to_string(), json!(subscription.plan));
        let description = format!("{} subscription - payment retry", subscription.plan);

        self.fund(subscription, method, description, metadata, staff_id)
            .await
    }

    async fn fund(
        &self,
        subscription: Subscription,
        method: PaymentMethod,
        description: String,
        metadata: Metadata,
        staff_id: StaffId,
    ) -> Result<SubscriptionCheckout> {
        let _guard = self.fundings.acquire(subscription.id).await;
        let linked = self.ledger.for_subscription(subscription.id).await?;
        if let Some(live) = linked
            .iter()
            .find(|p| matches!(p.status, PaymentStatus::Pending | PaymentStatus::Completed))
        {
            return Err(BillingError::InvalidState(format!(
                "Subscription {} already has {} payment {}",
                subscription.id, live.status, live.transaction_id
            )));
        }

        let payment = self
            .ledger
            .open(NewPayment {
                patient_id: subscription.patient_id,
                amount: subscription.price.value(),
                currency: subscription.currency.clone(),
                method,
                r#type: PaymentType::Subscription,
                description,
                subscription_id: Some(subscription.id),
                external_reference: None,
                metadata,
                created_by: staff_id,
            })
            .await?;

        let (payment, checkout_url) = self.collect(payment).await?;

        let subscription = if payment.status == PaymentStatus::Completed {
            self.lifecycle.confirm_activation(subscription.id).await?
        } else {
            subscription
        };

        Ok(SubscriptionCheckout {
            subscription,
            payment,
            checkout_url,
        })
    }

    /// Opens a standalone payment (consultation, treatment, other).
    pub async fn create_payment(
        &self,
        request: PaymentRequest,
        staff_id: StaffId,
    ) -> Result<PaymentCheckout> {
        if request.r#type == PaymentType::Subscription {
            return Err(BillingError::ValidationError(
                "Subscription payments are opened through the subscription flow".to_string(),
            ));
        }

        let payment = self
            .ledger
            .open(NewPayment {
                patient_id: request.patient_id,
                amount: request.amount,
                currency: request.currency,
                method: request.method,
                r#type: request.r#type,
                description: request.description,
                subscription_id: None,
                external_reference: request.external_reference,
                metadata: request.metadata,
                created_by: staff_id,
            })
            .await?;

        let (payment, checkout_url) = self.collect(payment).await?;
        Ok(PaymentCheckout {
            payment,
            checkout_url,
        })
    }

    /// Hands a freshly opened payment to the gateway when its method needs
    /// one. Cash payments pass through untouched.
    async fn collect(&self, payment: Payment) -> Result<(Payment, Option<String>)> {
        if !payment.method.requires_gateway() {
            return Ok((payment, None));
        }

        let customer = self
            .patients
            .get(payment.patient_id)
            .await?
            .map(|patient| Customer::from(&patient));
        let outcome = self
            .gateway
            .initiate(&CheckoutRequest {
                transaction_id: payment.transaction_id.clone(),
                amount: payment.amount,
                currency: payment.currency.clone(),
                description: payment.description.clone(),
                customer,
            })
            .await;

        // Callbacks for this transaction may already be arriving.
        let _guard = self
            .reconciliations
            .acquire(payment.transaction_id.clone())
            .await;
        match outcome.checkout_url {
            Some(url) if outcome.success => {
                let mut metadata = Metadata::new();
                metadata.insert(META_CHECKOUT_URL.to_string(), json!(url));
                let payment = self
                    .ledger
                    .annotate(payment.id, metadata, outcome.gateway_reference)
                    .await?;
                info!(
                    transaction_id = %payment.transaction_id,
                    checkout_url = %url,
                    "Checkout initiated"
                );
                Ok((payment, Some(url)))
            }
            _ => {
                let reason = outcome
                    .error_message
                    .unwrap_or_else(|| "Gateway returned no checkout URL".to_string());
                warn!(
                    transaction_id = %payment.transaction_id,
                    payment_id = payment.id,
                    %reason,
                    "Checkout initiation failed, marking payment as failed"
                );
                let current = self.ledger.find_by_id(payment.id).await?;
                if current.status == PaymentStatus::Pending {
                    self.ledger
                        .transition(payment.id, PaymentStatus::Failed, None)
                        .await?;
                }
                Err(BillingError::GatewayFailure(format!(
                    "Could not initiate payment {}: {}",
                    payment.transaction_id, reason
                )))
            }
        }
    }

    /// Applies an asynchronous gateway outcome to the payment and, for a
    /// completed subscription payment, to the subscription it funds.
    ///
    /// Safe to call repeatedly with the same arguments. Once a payment is in
    /// a terminal status a different status is rejected; corrections go
    /// through [`override_payment_status`](Self::override_payment_status).
    /// A completed payment whose subscription loses to another entitled
    /// subscription is still returned; the conflict is only logged.
    pub async fn reconcile(
        &self,
        transaction_id: &str,
        provider_status: &str,
        gateway_reference: Option<String>,
    ) -> Result<Payment> {
        let _guard = self
            .reconciliations
            .acquire(transaction_id.to_string())
            .await;
        let payment = self.ledger.find_by_transaction_id(transaction_id).await?;
        let status = PaymentStatus::from_provider(provider_status);

        let payment = if payment.status.is_terminal() {
            if payment.status != status {
                return Err(BillingError::InvalidState(format!(
                    "Payment {} is already {}, refusing to move it to {}",
                    transaction_id, payment.status, status
                )));
            }
            debug!(%transaction_id, %status, "Duplicate callback, payment unchanged");
            payment
        } else {
            self.ledger
                .transition(payment.id, status, gateway_reference)
                .await?
        };

        self.grant_entitlement(&payment).await?;
        Ok(payment)
    }

    async fn grant_entitlement(&self, payment: &Payment) -> Result<()> {
        let Some(subscription_id) = payment.subscription_id else {
            return Ok(());
        };
        if payment.r#type != PaymentType::Subscription || payment.status != PaymentStatus::Completed
        {
            return Ok(());
        }

        let subscription = self.lifecycle.find_by_id(subscription_id).await?;
        match subscription.status {
            SubscriptionStatus::Pending | SubscriptionStatus::Active => {
                match self.lifecycle.confirm_activation(subscription_id).await {
                    Ok(_) => {}
                    // The payment stays recorded; activation needs an operator.
                    Err(BillingError::Conflict(reason)) => {
                        warn!(
                            transaction_id = %payment.transaction_id,
                            subscription_id,
                            %reason,
                            "Completed payment could not activate its subscription"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
                warn!(
                    transaction_id = %payment.transaction_id,
                    subscription_id,
                    status = %subscription.status,
                    "Completed payment for a subscription that can no longer be activated"
                );
            }
        }
        Ok(())
    }

    /// Asks the gateway for the payment's status and reconciles with it.
    pub async fn verify_payment(&self, transaction_id: &str) -> Result<Payment> {
        let verification = self.gateway.verify(transaction_id).await;
        if !verification.verified {
            return Err(BillingError::GatewayFailure(format!(
                "Could not verify payment {} (gateway status {})",
                transaction_id, verification.status
            )));
        }
        self.reconcile(transaction_id, &verification.status, None)
            .await
    }

    /// Administrative correction. Bypasses the terminal-status rule.
    pub async fn override_payment_status(
        &self,
        id: PaymentId,
        status: PaymentStatus,
        gateway_reference: Option<String>,
    ) -> Result<Payment> {
        let before = self.ledger.find_by_id(id).await?;
        let _guard = self
            .reconciliations
            .acquire(before.transaction_id.clone())
            .await;
        let payment = self.ledger.transition(id, status, gateway_reference).await?;
        warn!(
            payment_id = id,
            from = %before.status,
            to = %status,
            "Payment status overridden"
        );
        self.grant_entitlement(&payment).await?;
        Ok(payment)
    }

    /// Checks an inbound callback's signature against the gateway's scheme.
    pub fn authenticate_callback(&self, signature: &str, payload: &[u8]) -> bool {
        self.gateway.validate_inbound_signature(signature, payload)
    }

    pub async fn payment_stats(&self) -> Result<PaymentStats> {
        self.ledger.stats().await
    }

    pub async fn subscription_stats(&self) -> Result<SubscriptionStats> {
        self.lifecycle.stats().await
    }
}

use super::money::{Amount, Currency};
use super::patient::{Patient, PatientId};
use super::payment::{Payment, PaymentId};
use super::subscription::{Subscription, SubscriptionId};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Reserves the next internal payment id.
    async fn next_id(&self) -> Result<PaymentId>;
    async fn store(&self, payment: Payment) -> Result<()>;
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;
    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>>;
    /// Every payment linked to the subscription, ordered by id.
    async fn get_by_subscription(&self, subscription_id: SubscriptionId) -> Result<Vec<Payment>>;
    async fn get_all(&self) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Reserves the next internal subscription id.
    async fn next_id(&self) -> Result<SubscriptionId>;
    async fn store(&self, subscription: Subscription) -> Result<()>;
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>>;
    async fn get_by_patient(&self, patient_id: PatientId) -> Result<Vec<Subscription>>;
    async fn get_all(&self) -> Result<Vec<Subscription>>;
}

/// Read access to the patient records owned by the surrounding service.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    async fn exists(&self, patient_id: PatientId) -> Result<bool>;
    async fn get(&self, patient_id: PatientId) -> Result<Option<Patient>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: Option<String>,
}

impl From<&Patient> for Customer {
    fn from(patient: &Patient) -> Self {
        Self {
            name: patient.full_name(),
            email: patient.email.clone(),
        }
    }
}

/// A payment intent handed to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub transaction_id: String,
    pub amount: Amount,
    pub currency: Currency,
    pub description: String,
    pub customer: Option<Customer>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CheckoutOutcome {
    pub success: bool,
    pub checkout_url: Option<String>,
    pub gateway_reference: Option<String>,
    pub error_message: Option<String>,
}

impl CheckoutOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub status: String,
    pub verified: bool,
}

/// The external payment provider.
///
/// Implementations never return errors: transport or provider failures are
/// reported inside the outcome so the caller decides how to react.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(&self, request: &CheckoutRequest) -> CheckoutOutcome;
    async fn verify(&self, transaction_id: &str) -> Verification;
    fn validate_inbound_signature(&self, signature: &str, payload: &[u8]) -> bool;
}

pub type PaymentStoreBox = Box<dyn PaymentStore>;
pub type SubscriptionStoreBox = Box<dyn SubscriptionStore>;
/// Shared by the ledger and the lifecycle manager.
pub type SharedPatientDirectory = Arc<dyn PatientDirectory>;
pub type PaymentGatewayBox = Box<dyn PaymentGateway>;

use crate::domain::patient::{Patient, PatientId};
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{PatientDirectory, PaymentStore, SubscriptionStore};
use crate::domain::subscription::{Subscription, SubscriptionId};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct PaymentTable {
    by_id: HashMap<PaymentId, Payment>,
    by_transaction_id: HashMap<String, PaymentId>,
}

/// A thread-safe in-memory payment store.
///
/// Keeps a secondary index on `transaction_id` so webhook lookups do not scan
/// the table. `Clone` shares the underlying table.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn next_id(&self) -> Result<PaymentId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn store(&self, payment: Payment) -> Result<()> {
        let mut table = self.table.write().await;
        table
            .by_transaction_id
            .insert(payment.transaction_id.clone(), payment.id);
        table.by_id.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let table = self.table.read().await;
        Ok(table
            .by_transaction_id
            .get(transaction_id)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn get_by_subscription(&self, subscription_id: SubscriptionId) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        let mut payments: Vec<Payment> = table
            .by_id
            .values()
            .filter(|p| p.subscription_id == Some(subscription_id))
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        let table = self.table.read().await;
        let mut payments: Vec<Payment> = table.by_id.values().cloned().collect();
        payments.sort_by_key(|p| p.id);
        Ok(payments)
    }
}

/// A thread-safe in-memory subscription store.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<SubscriptionId, Subscription>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemorySubscriptionStore {
    /// Creates a new, empty in-memory subscription store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn next_id(&self) -> Result<SubscriptionId> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn store(&self, subscription: Subscription) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.get(&id).cloned())
    }

    async fn get_by_patient(&self, patient_id: PatientId) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut owned: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.id);
        Ok(owned)
    }

    async fn get_all(&self) -> Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut all: Vec<Subscription> = subscriptions.values().cloned().collect();
        all.sort_by_key(|s| s.id);
        Ok(all)
    }
}

/// Patient directory backed by a map. Stands in for the patient service in the
/// CLI and in tests.
#[derive(Default, Clone)]
pub struct InMemoryPatientDirectory {
    patients: Arc<RwLock<HashMap<PatientId, Patient>>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, patient: Patient) {
        let mut patients = self.patients.write().await;
        patients.insert(patient.id, patient);
    }
}

#[async_trait]
impl PatientDirectory for InMemoryPatientDirectory {
    async fn exists(&self, patient_id: PatientId) -> Result<bool> {
        let patients = self.patients.read().await;
        Ok(patients.contains_key(&patient_id))
    }

    async fn get(&self, patient_id: PatientId) -> Result<Option<Patient>> {
        let patients = self.patients.read().await;
        Ok(patients.get(&patient_id).cloned())
    }
}

use crate::domain::patient::PatientId;
use crate::domain::payment::{Payment, PaymentId};
use crate::domain::ports::{PaymentStore, SubscriptionStore};
use crate::domain::subscription::{Subscription, SubscriptionId};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Column Family for payment records, keyed by internal id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping transaction ids to internal payment ids.
pub const CF_PAYMENT_INDEX: &str = "payment_index";
/// Column Family for subscription records, keyed by internal id.
pub const CF_SUBSCRIPTIONS: &str = "subscriptions";
/// Column Family for id sequences.
pub const CF_META: &str = "meta";

const PAYMENT_SEQUENCE: &[u8] = b"payment_seq";
const SUBSCRIPTION_SEQUENCE: &[u8] = b"subscription_seq";

fn internal(message: impl Into<String>) -> BillingError {
    BillingError::InternalError(Box::new(std::io::Error::other(message.into())))
}

/// A persistent store implementation using RocksDB.
///
/// Payments and subscriptions live in separate Column Families; a third one
/// indexes payments by transaction id and a fourth holds the id sequences.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    sequence_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating the
    /// column families on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let families = [CF_PAYMENTS, CF_PAYMENT_INDEX, CF_SUBSCRIPTIONS, CF_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, families)?;

        Ok(Self {
            db: Arc::new(db),
            sequence_lock: Arc::new(Mutex::new(())),
        })
    }

    fn handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| internal(format!("{} column family not found", name)))
    }

    fn next_in_sequence(&self, key: &[u8]) -> Result<u64> {
        let _guard = self
            .sequence_lock
            .lock()
            .map_err(|_| internal("Sequence lock poisoned"))?;
        let meta = self.handle(CF_META)?;

        let current = match self.db.get_cf(meta, key)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| internal("Corrupted sequence value"))?;
                u64::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.db.put_cf(meta, key, next.to_be_bytes())?;
        Ok(next)
    }

    fn put_json<T: Serialize>(&self, cf_name: &str, key: u64, value: &T) -> Result<()> {
        let cf = self.handle(cf_name)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(cf, key.to_be_bytes(), bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, cf_name: &str, key: u64) -> Result<Option<T>> {
        let cf = self.handle(cf_name)?;
        match self.db.get_cf(cf, key.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_json<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.handle(cf_name)?;
        let mut records = Vec::new();
        // Big-endian keys make iteration order match id order.
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            records.push(serde_json::from_slice(&value)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn next_id(&self) -> Result<PaymentId> {
        self.next_in_sequence(PAYMENT_SEQUENCE)
    }

    async fn store(&self, payment: Payment) -> Result<()> {
        self.put_json(CF_PAYMENTS, payment.id, &payment)?;
        let index = self.handle(CF_PAYMENT_INDEX)?;
        self.db.put_cf(
            index,
            payment.transaction_id.as_bytes(),
            payment.id.to_be_bytes(),
        )?;
        Ok(())
    }

    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        self.get_json(CF_PAYMENTS, id)
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let index = self.handle(CF_PAYMENT_INDEX)?;
        let Some(bytes) = self.db.get_pinned_cf(index, transaction_id.as_bytes())? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .as_ref()
            .try_into()
            .map_err(|_| internal("Corrupted payment index entry"))?;
        self.get_json(CF_PAYMENTS, u64::from_be_bytes(raw))
    }

    async fn get_by_subscription(&self, subscription_id: SubscriptionId) -> Result<Vec<Payment>> {
        let all: Vec<Payment> = self.scan_json(CF_PAYMENTS)?;
        Ok(all
            .into_iter()
            .filter(|p| p.subscription_id == Some(subscription_id))
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Payment>> {
        self.scan_json(CF_PAYMENTS)
    }
}

#[async_trait]
impl SubscriptionStore for RocksDBStore {
    async fn next_id(&self) -> Result<SubscriptionId> {
        self.next_in_sequence(SUBSCRIPTION_SEQUENCE)
    }

    async fn store(&self, subscription: Subscription) -> Result<()> {
        self.put_json(CF_SUBSCRIPTIONS, subscription.id, &subscription)
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        self.get_json(CF_SUBSCRIPTIONS, id)
    }

    async fn get_by_patient(&self, patient_id: PatientId) -> Result<Vec<Subscription>> {
        let all: Vec<Subscription> = self.scan_json(CF_SUBSCRIPTIONS)?;
        Ok(all
            .into_iter()
            .filter(|s| s.patient_id == patient_id)
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<Subscription>> {
        self.scan_json(CF_SUBSCRIPTIONS)
    }
}

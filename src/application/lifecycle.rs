use super::locks::KeyedLocks;
use crate::domain::money::{Amount, Currency};
use crate::domain::patient::PatientId;
use crate::domain::ports::{SharedPatientDirectory, SubscriptionStoreBox};
use crate::domain::subscription::{
    PlanType, Subscription, SubscriptionId, SubscriptionStats, SubscriptionStatus, window_end,
};
use crate::error::{BillingError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub patient_id: PatientId,
    pub plan: PlanType,
    pub price: Decimal,
    pub currency: Currency,
    pub duration_days: u32,
    pub description: Option<String>,
    pub features: Vec<String>,
}

/// Owns subscription records and their state machine.
///
/// Guarantees that a patient never holds two subscriptions that are both
/// active with an end date in the future.
pub struct SubscriptionLifecycle {
    subscriptions: SubscriptionStoreBox,
    patients: SharedPatientDirectory,
    locks: KeyedLocks<PatientId>,
}

impl SubscriptionLifecycle {
    pub fn new(subscriptions: SubscriptionStoreBox, patients: SharedPatientDirectory) -> Self {
        Self {
            subscriptions,
            patients,
            locks: KeyedLocks::default(),
        }
    }

    /// Creates a pending subscription starting now.
    pub async fn create(&self, request: NewSubscription) -> Result<Subscription> {
        let price = Amount::new(request.price)?;
        let now = Utc::now();
        let end_date = window_end(now, request.duration_days)?;

        if !self.patients.exists(request.patient_id).await? {
            return Err(BillingError::not_found("Patient", request.patient_id));
        }

        let _guard = self.locks.acquire(request.patient_id).await;
        if let Some(active) = self.entitled(request.patient_id, now).await? {
            return Err(BillingError::Conflict(format!(
                "Patient {} already has active subscription {}",
                request.patient_id, active.id
            )));
        }

        let subscription = Subscription {
            id: self.subscriptions.next_id().await?,
            plan: request.plan,
            status: SubscriptionStatus::Pending,
            start_date: now,
            end_date,
            price,
            currency: request.currency,
            duration_days: request.duration_days,
            description: request.description,
            features: request.features,
            patient_id: request.patient_id,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.store(subscription.clone()).await?;

        info!(
            subscription_id = subscription.id,
            patient_id = subscription.patient_id,
            plan = %subscription.plan,
            "Subscription created"
        );
        Ok(subscription)
    }

    /// Activates a pending subscription.
    pub async fn activate(&self, id: SubscriptionId) -> Result<Subscription> {
        let patient_id = self.find_by_id(id).await?.patient_id;
        let _guard = self.locks.acquire(patient_id).await;
        let subscription = self.find_by_id(id).await?;
        self.activate_locked(subscription).await
    }

    /// Like [`activate`](Self::activate), but an already active subscription
    /// is returned unchanged instead of being an error.
    pub async fn confirm_activation(&self, id: SubscriptionId) -> Result<Subscription> {
        let patient_id = self.find_by_id(id).await?.patient_id;
        let _guard = self.locks.acquire(patient_id).await;
        let subscription = self.find_by_id(id).await?;
        if subscription.status == SubscriptionStatus::Active {
            debug!(subscription_id = id, "Subscription already active");
            return Ok(subscription);
        }
        self.activate_locked(subscription).await
    }

    async fn activate_locked(&self, mut subscription: Subscription) -> Result<Subscription> {
        let now = Utc::now();
        if subscription.status == SubscriptionStatus::Pending
            && let Some(other) = self.entitled(subscription.patient_id, now).await?
            && other.id != subscription.id
        {
            return Err(BillingError::Conflict(format!(
                "Patient {} already has active subscription {}",
                subscription.patient_id, other.id
            )));
        }

        subscription.activate(now)?;
        self.subscriptions.store(subscription.clone()).await?;
        info!(
            subscription_id = subscription.id,
            patient_id = subscription.patient_id,
            "Subscription activated"
        );
        Ok(subscription)
    }

    /// Chains a new pending subscription after `id`.
    ///
    /// The new window starts where an active, unexpired source ends, or now
    /// otherwise. An active source is expired in the same step.
    pub async fn renew(
        &self,
        id: SubscriptionId,
        duration_days: Option<u32>,
        price: Option<Decimal>,
    ) -> Result<Subscription> {
        let patient_id = self.find_by_id(id).await?.patient_id;
        let _guard = self.locks.acquire(patient_id).await;
        let mut current = self.find_by_id(id).await?;

        if current.status == SubscriptionStatus::Cancelled {
            return Err(BillingError::InvalidState(format!(
                "Cannot renew cancelled subscription {}",
                id
            )));
        }

        let now = Utc::now();
        let start_date = if current.is_entitled(now) {
            current.end_date
        } else {
            now
        };
        let duration_days = duration_days.unwrap_or(current.duration_days);
        let end_date = window_end(start_date, duration_days)?;
        let price = match price {
            Some(price) => Amount::new(price)?,
            None => current.price,
        };
        let description = match &current.description {
            Some(description) => format!("Renewal - {}", description),
            None => format!("Renewal - {} plan", current.plan),
        };

        let renewal = Subscription {
            id: self.subscriptions.next_id().await?,
            plan: current.plan,
            status: SubscriptionStatus::Pending,
            start_date,
            end_date,
            price,
            currency: current.currency.clone(),
            duration_days,
            description: Some(description),
            features: current.features.clone(),
            patient_id: current.patient_id,
            created_at: now,
            updated_at: now,
        };
        self.subscriptions.store(renewal.clone()).await?;

        if current.status == SubscriptionStatus::Active {
            current.expire(now)?;
            self.subscriptions.store(current).await?;
        }

        info!(
            subscription_id = renewal.id,
            previous_subscription_id = id,
            patient_id = renewal.patient_id,
            start_date = %renewal.start_date,
            "Subscription renewed"
        );
        Ok(renewal)
    }

    pub async fn cancel(&self, id: SubscriptionId) -> Result<Subscription> {
        let patient_id = self.find_by_id(id).await?.patient_id;
        let _guard = self.locks.acquire(patient_id).await;
        let mut subscription = self.find_by_id(id).await?;

        subscription.cancel(Utc::now())?;
        self.subscriptions.store(subscription.clone()).await?;
        info!(subscription_id = id, patient_id, "Subscription cancelled");
        Ok(subscription)
    }

    /// The subscription currently granting the patient access, if any.
    pub async fn active_for(&self, patient_id: PatientId) -> Result<Option<Subscription>> {
        self.entitled(patient_id, Utc::now()).await
    }

    async fn entitled(
        &self,
        patient_id: PatientId,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscription>> {
        let owned = self.subscriptions.get_by_patient(patient_id).await?;
        Ok(owned
            .into_iter()
            .filter(|s| s.is_entitled(now))
            .max_by_key(|s| s.end_date))
    }

    /// Marks every active subscription whose end date has passed as expired.
    /// Returns how many were flipped.
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.sweep_expired_at(Utc::now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let lapsed: Vec<Subscription> = self
            .subscriptions
            .get_all()
            .await?
            .into_iter()
            .filter(|s| s.status == SubscriptionStatus::Active && s.end_date <= now)
            .collect();

        let mut expired = 0;
        for candidate in lapsed {
            let _guard = self.locks.acquire(candidate.patient_id).await;
            let Some(mut subscription) = self.subscriptions.get(candidate.id).await? else {
                continue;
            };
            // Re-check under the lock: a renewal may have expired it already.
            if subscription.status != SubscriptionStatus::Active || subscription.end_date > now {
                continue;
            }
            subscription.expire(now)?;
            self.subscriptions.store(subscription).await?;
            expired += 1;
        }

        if expired > 0 {
            info!(expired, "Expired lapsed subscriptions");
        }
        Ok(expired)
    }

    pub async fn find_by_id(&self, id: SubscriptionId) -> Result<Subscription> {
        self.subscriptions
            .get(id)
            .await?
            .ok_or_else(|| BillingError::not_found("Subscription", id))
    }

    pub async fn for_patient(&self, patient_id: PatientId) -> Result<Vec<Subscription>> {
        self.subscriptions.get_by_patient(patient_id).await
    }

    pub async fn all(&self) -> Result<Vec<Subscription>> {
        self.subscriptions.get_all().await
    }

    pub async fn stats(&self) -> Result<SubscriptionStats> {
        let subscriptions = self.subscriptions.get_all().await?;
        Ok(SubscriptionStats::from_subscriptions(
            &subscriptions,
            Utc::now(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::patient::Patient;
    use crate::domain::ports::SubscriptionStore;
    use crate::infrastructure::in_memory::{InMemoryPatientDirectory, InMemorySubscriptionStore};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn lifecycle() -> (Arc<SubscriptionLifecycle>, InMemorySubscriptionStore) {
        let patients = InMemoryPatientDirectory::new();
        patients.register(Patient::new(1, "Awa", "Diallo")).await;
        patients.register(Patient::new(2, "Moussa", "Traore")).await;
        let store = InMemorySubscriptionStore::new();
        let lifecycle = SubscriptionLifecycle::new(Box::new(store.clone()), Arc::new(patients));
        (Arc::new(lifecycle), store)
    }

    fn basic(patient_id: PatientId) -> NewSubscription {
        NewSubscription {
            patient_id,
            plan: PlanType::Basic,
            price: dec!(25000),
            currency: Currency::new("XOF").unwrap(),
            duration_days: 30,
            description: Some("Monthly basic".to_string()),
            features: vec!["3 consultations per month".to_string()],
        }
    }

    /// Rewrites a stored subscription in place, bypassing the state machine.
    async fn tamper(
        store: &InMemorySubscriptionStore,
        id: SubscriptionId,
        edit: impl FnOnce(&mut Subscription),
    ) {
        let mut sub = store.get(id).await.unwrap().unwrap();
        edit(&mut sub);
        store.store(sub).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_is_pending_with_window() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();

        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(sub.end_date - sub.start_date, Duration::days(30));
        assert!(sub.end_date > sub.start_date);
        assert!(lifecycle.active_for(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let (lifecycle, _) = lifecycle().await;

        let mut free = basic(1);
        free.price = dec!(0);
        assert!(matches!(
            lifecycle.create(free).await,
            Err(BillingError::ValidationError(_))
        ));

        let mut zero_days = basic(1);
        zero_days.duration_days = 0;
        assert!(matches!(
            lifecycle.create(zero_days).await,
            Err(BillingError::ValidationError(_))
        ));

        assert!(matches!(
            lifecycle.create(basic(77)).await,
            Err(BillingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_conflicts_with_active_subscription() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(sub.id).await.unwrap();

        assert!(matches!(
            lifecycle.create(basic(1)).await,
            Err(BillingError::Conflict(_))
        ));
        // Other patients are unaffected.
        assert!(lifecycle.create(basic(2)).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_allowed_after_active_window_lapsed() {
        let (lifecycle, store) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(sub.id).await.unwrap();
        tamper(&store, sub.id, |s| s.end_date = Utc::now() - Duration::days(1)).await;

        assert!(lifecycle.create(basic(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_single_entitlement() {
        let (lifecycle, _) = lifecycle().await;
        let first = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(first.id).await.unwrap();
        lifecycle.cancel(first.id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lifecycle = lifecycle.clone();
            handles.push(tokio::spawn(async move {
                let sub = lifecycle.create(basic(1)).await?;
                lifecycle.activate(sub.id).await
            }));
        }

        let mut activated = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                activated += 1;
            }
        }
        assert_eq!(activated, 1);

        let now = Utc::now();
        let entitled = lifecycle
            .for_patient(1)
            .await
            .unwrap()
            .into_iter()
            .filter(|s| s.is_entitled(now))
            .count();
        assert_eq!(entitled, 1);
    }

    #[tokio::test]
    async fn test_activate_requires_pending() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(sub.id).await.unwrap();

        assert!(matches!(
            lifecycle.activate(sub.id).await,
            Err(BillingError::InvalidState(_))
        ));
        assert!(matches!(
            lifecycle.activate(404).await,
            Err(BillingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_confirm_activation_is_idempotent() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();

        let first = lifecycle.confirm_activation(sub.id).await.unwrap();
        let second = lifecycle.confirm_activation(sub.id).await.unwrap();
        assert_eq!(first.status, SubscriptionStatus::Active);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_activation_cannot_create_second_entitlement() {
        let (lifecycle, _) = lifecycle().await;
        let first = lifecycle.create(basic(1)).await.unwrap();
        let second = lifecycle.create(basic(1)).await.unwrap();

        lifecycle.activate(first.id).await.unwrap();
        assert!(matches!(
            lifecycle.activate(second.id).await,
            Err(BillingError::Conflict(_))
        ));
        assert_eq!(
            lifecycle.find_by_id(second.id).await.unwrap().status,
            SubscriptionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_renew_active_continues_back_to_back() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        let active = lifecycle.activate(sub.id).await.unwrap();

        let renewal = lifecycle.renew(sub.id, None, None).await.unwrap();
        assert_eq!(renewal.start_date, active.end_date);
        assert_eq!(renewal.end_date, active.end_date + Duration::days(30));
        assert_eq!(renewal.status, SubscriptionStatus::Pending);
        assert_eq!(renewal.plan, PlanType::Basic);
        assert_eq!(renewal.price, active.price);
        assert_eq!(renewal.features, active.features);
        assert_eq!(renewal.description.as_deref(), Some("Renewal - Monthly basic"));

        let previous = lifecycle.find_by_id(sub.id).await.unwrap();
        assert_eq!(previous.status, SubscriptionStatus::Expired);
    }

    #[tokio::test]
    async fn test_renew_expired_starts_now_with_overrides() {
        let (lifecycle, store) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(sub.id).await.unwrap();
        tamper(&store, sub.id, |s| {
            s.status = SubscriptionStatus::Expired;
            s.end_date = Utc::now() - Duration::days(3);
        })
        .await;

        let before = Utc::now();
        let renewal = lifecycle
            .renew(sub.id, Some(60), Some(dec!(40000)))
            .await
            .unwrap();
        let after = Utc::now();

        assert!(renewal.start_date >= before && renewal.start_date <= after);
        assert_eq!(renewal.duration_days, 60);
        assert_eq!(renewal.end_date - renewal.start_date, Duration::days(60));
        assert_eq!(renewal.price.value(), dec!(40000));
        assert_eq!(
            lifecycle.find_by_id(sub.id).await.unwrap().status,
            SubscriptionStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_renew_never_activated_starts_now() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();

        let before = Utc::now();
        let renewal = lifecycle.renew(sub.id, None, None).await.unwrap();
        assert!(renewal.start_date >= before);
        assert!(renewal.start_date - before < Duration::seconds(5));
        assert_eq!(
            lifecycle.find_by_id(sub.id).await.unwrap().status,
            SubscriptionStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_renew_rejects_bad_overrides() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        assert!(lifecycle.renew(sub.id, Some(0), None).await.is_err());
        assert!(lifecycle.renew(sub.id, None, Some(dec!(-1))).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_is_immutable() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(sub.id).await.unwrap();
        lifecycle.cancel(sub.id).await.unwrap();

        assert!(matches!(
            lifecycle.renew(sub.id, None, None).await,
            Err(BillingError::InvalidState(_))
        ));
        assert!(matches!(
            lifecycle.activate(sub.id).await,
            Err(BillingError::InvalidState(_))
        ));
        assert!(matches!(
            lifecycle.confirm_activation(sub.id).await,
            Err(BillingError::InvalidState(_))
        ));
        assert!(matches!(
            lifecycle.cancel(sub.id).await,
            Err(BillingError::InvalidState(_))
        ));
        assert_eq!(
            lifecycle.find_by_id(sub.id).await.unwrap().status,
            SubscriptionStatus::Cancelled
        );
        assert_eq!(lifecycle.for_patient(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let (lifecycle, _) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        let cancelled = lifecycle.cancel(sub.id).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_sweep_expires_only_lapsed_active() {
        let (lifecycle, store) = lifecycle().await;
        let lapsed = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(lapsed.id).await.unwrap();
        tamper(&store, lapsed.id, |s| s.end_date = Utc::now() - Duration::hours(1)).await;

        let current = lifecycle.create(basic(2)).await.unwrap();
        lifecycle.activate(current.id).await.unwrap();
        let pending = lifecycle.create(basic(1)).await.unwrap();

        assert_eq!(lifecycle.sweep_expired().await.unwrap(), 1);
        assert_eq!(
            lifecycle.find_by_id(lapsed.id).await.unwrap().status,
            SubscriptionStatus::Expired
        );
        assert_eq!(
            lifecycle.find_by_id(current.id).await.unwrap().status,
            SubscriptionStatus::Active
        );
        assert_eq!(
            lifecycle.find_by_id(pending.id).await.unwrap().status,
            SubscriptionStatus::Pending
        );

        // A second pass has nothing left to do.
        assert_eq!(lifecycle.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entitlement_does_not_depend_on_sweep() {
        let (lifecycle, store) = lifecycle().await;
        let sub = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(sub.id).await.unwrap();
        tamper(&store, sub.id, |s| s.end_date = Utc::now() - Duration::seconds(1)).await;

        // Still flagged active, but no longer an entitlement.
        assert_eq!(
            lifecycle.find_by_id(sub.id).await.unwrap().status,
            SubscriptionStatus::Active
        );
        assert!(lifecycle.active_for(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let (lifecycle, _) = lifecycle().await;
        let a = lifecycle.create(basic(1)).await.unwrap();
        lifecycle.activate(a.id).await.unwrap();
        let mut vip = basic(2);
        vip.plan = PlanType::Vip;
        vip.price = dec!(75000);
        lifecycle.create(vip).await.unwrap();

        let stats = lifecycle.stats().await.unwrap();
        assert_eq!(stats.total_subscriptions, 2);
        assert_eq!(stats.active_subscriptions, 1);
        assert_eq!(stats.monthly_revenue, dec!(25000));
        assert_eq!(stats.by_plan[&PlanType::Vip].count, 1);
    }
}

use super::csv::command_reader::{Command, CommandKind};
use crate::application::ledger::TransactionLedger;
use crate::application::lifecycle::SubscriptionLifecycle;
use crate::application::orchestrator::{
    BillingOrchestrator, PaymentRequest, RenewalRequest, SubscriptionRequest,
};
use crate::application::webhook::WebhookHandler;
use crate::config::{GatewayConfig, GatewayMode};
use crate::domain::money::Currency;
use crate::domain::patient::{Patient, StaffId};
use crate::domain::payment::{Metadata, PaymentMethod, PaymentStatus};
use crate::domain::ports::{PaymentStoreBox, SharedPatientDirectory, SubscriptionStoreBox};
use crate::error::Result;
use crate::infrastructure::gateway::{HostedCheckoutGateway, sign_payload};
use crate::infrastructure::in_memory::InMemoryPatientDirectory;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const DEFAULT_CURRENCY: &str = "XOF";

/// Drives the billing engine from script commands.
///
/// Patients live in an in-memory directory filled by `register` rows;
/// callbacks are fed through the webhook handler exactly as the gateway
/// would deliver them, signed when a secret is configured.
pub struct ScriptRunner {
    orchestrator: Arc<BillingOrchestrator>,
    webhooks: WebhookHandler,
    patients: Arc<InMemoryPatientDirectory>,
    signing_secret: Option<String>,
    staff_id: StaffId,
}

impl ScriptRunner {
    pub fn new(
        payments: PaymentStoreBox,
        subscriptions: SubscriptionStoreBox,
        gateway: GatewayConfig,
        staff_id: StaffId,
    ) -> Result<Self> {
        let signing_secret = match &gateway.mode {
            GatewayMode::Live(credentials) => credentials.signing_secret.clone(),
            GatewayMode::Simulation => None,
        };
        let patients = Arc::new(InMemoryPatientDirectory::new());
        let directory: SharedPatientDirectory = patients.clone();

        let orchestrator = Arc::new(BillingOrchestrator::new(
            Arc::new(TransactionLedger::new(payments, directory.clone())),
            Arc::new(SubscriptionLifecycle::new(subscriptions, directory.clone())),
            Box::new(HostedCheckoutGateway::new(gateway)?),
            directory,
        ));

        Ok(Self {
            webhooks: WebhookHandler::new(orchestrator.clone()),
            orchestrator,
            patients,
            signing_secret,
            staff_id,
        })
    }

    pub fn orchestrator(&self) -> &Arc<BillingOrchestrator> {
        &self.orchestrator
    }

    pub async fn execute(&self, command: Command) -> Result<()> {
        let kind = command.command;
        match kind {
            CommandKind::Register => {
                let id = Command::require(command.patient, "patient", kind)?;
                let name = command.note.unwrap_or_default();
                let (first, last) = name.trim().split_once(' ').unwrap_or((name.trim(), ""));
                self.patients
                    .register(Patient::new(id, first, last.trim()))
                    .await;
                info!(patient_id = id, "Patient registered");
            }
            CommandKind::Subscribe => {
                let patient_id = Command::require(command.patient, "patient", kind)?;
                let plan = Command::require(command.plan, "plan", kind)?;
                let method = command.method.unwrap_or(PaymentMethod::Gateway);
                let mut request = SubscriptionRequest::from_catalogue(patient_id, plan, method)?;
                if let Some(price) = command.amount {
                    request.price = price;
                }
                if let Some(days) = command.days {
                    request.duration_days = days;
                }
                if let Some(currency) = command.currency.as_deref() {
                    request.currency = Currency::new(currency)?;
                }
                let checkout = self
                    .orchestrator
                    .create_subscription_with_payment(request, self.staff_id)
                    .await?;
                info!(
                    subscription_id = checkout.subscription.id,
                    payment_id = checkout.payment.id,
                    checkout_url = checkout.checkout_url.as_deref().unwrap_or("-"),
                    "Subscription requested"
                );
            }
            CommandKind::Renew => {
                let id = Command::require(command.subscription, "subscription", kind)?;
                let request = RenewalRequest {
                    duration_days: command.days,
                    price: command.amount,
                    method: command.method.unwrap_or(PaymentMethod::Gateway),
                };
                let checkout = self
                    .orchestrator
                    .renew_subscription_with_payment(id, request, self.staff_id)
                    .await?;
                info!(
                    subscription_id = checkout.subscription.id,
                    previous_subscription_id = id,
                    payment_id = checkout.payment.id,
                    "Renewal requested"
                );
            }
            CommandKind::Cancel => {
                let id = Command::require(command.subscription, "subscription", kind)?;
                self.orchestrator.lifecycle().cancel(id).await?;
            }
            CommandKind::Pay => {
                let patient_id = Command::require(command.patient, "patient", kind)?;
                let amount = Command::require(command.amount, "amount", kind)?;
                let r#type = command.r#type.unwrap_or_default();
                let request = PaymentRequest {
                    patient_id,
                    amount,
                    currency: Currency::new(command.currency.as_deref().unwrap_or(DEFAULT_CURRENCY))?,
                    method: command.method.unwrap_or(PaymentMethod::Cash),
                    r#type,
                    description: command.note.unwrap_or_else(|| r#type.to_string()),
                    external_reference: None,
                    metadata: Metadata::new(),
                };
                let checkout = self
                    .orchestrator
                    .create_payment(request, self.staff_id)
                    .await?;
                info!(payment_id = checkout.payment.id, "Payment recorded");
            }
            CommandKind::Callback => {
                let id = Command::require(command.payment, "payment", kind)?;
                let status = Command::require(command.status, "status", kind)?;
                let payment = self.orchestrator.ledger().find_by_id(id).await?;
                let body = json!({
                    "transactionId": payment.transaction_id,
                    "status": status,
                    "gatewayReference": command.note,
                })
                .to_string();
                let signature = match &self.signing_secret {
                    Some(secret) => sign_payload(secret, body.as_bytes())?,
                    None => String::new(),
                };
                self.webhooks.handle(&signature, body.as_bytes()).await?;
            }
            CommandKind::Verify => {
                let id = Command::require(command.payment, "payment", kind)?;
                let payment = self.orchestrator.ledger().find_by_id(id).await?;
                self.orchestrator
                    .verify_payment(&payment.transaction_id)
                    .await?;
            }
            CommandKind::Override => {
                let id = Command::require(command.payment, "payment", kind)?;
                let status: PaymentStatus =
                    Command::require(command.status, "status", kind)?.parse()?;
                self.orchestrator
                    .override_payment_status(id, status, command.note)
                    .await?;
            }
            CommandKind::Sweep => {
                self.orchestrator.lifecycle().sweep_expired().await?;
            }
        }
        Ok(())
    }
}

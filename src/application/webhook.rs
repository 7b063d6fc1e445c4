use super::orchestrator::BillingOrchestrator;
use crate::domain::payment::Payment;
use crate::error::{BillingError, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Body of an asynchronous payment notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookNotification {
    pub transaction_id: String,
    pub status: String,
    #[serde(default, alias = "gatewayTransactionId")]
    pub gateway_reference: Option<String>,
}

/// Entry point for gateway callbacks.
///
/// The signature is checked against the raw bytes before anything is parsed,
/// so an unauthenticated payload never reaches the ledger.
pub struct WebhookHandler {
    orchestrator: Arc<BillingOrchestrator>,
}

impl WebhookHandler {
    pub fn new(orchestrator: Arc<BillingOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(&self, signature: &str, payload: &[u8]) -> Result<Payment> {
        if !self.orchestrator.authenticate_callback(signature, payload) {
            warn!("Rejected webhook with invalid signature");
            return Err(BillingError::InvalidSignature);
        }

        let notification: WebhookNotification = serde_json::from_slice(payload)
            .map_err(|e| BillingError::ValidationError(format!("Malformed webhook body: {}", e)))?;

        info!(
            transaction_id = %notification.transaction_id,
            status = %notification.status,
            "Webhook received"
        );
        self.orchestrator
            .reconcile(
                &notification.transaction_id,
                &notification.status,
                notification.gateway_reference,
            )
            .await
    }
}

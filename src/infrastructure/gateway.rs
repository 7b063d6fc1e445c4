use crate::config::{GatewayConfig, GatewayMode, LiveCredentials};
use crate::domain::ports::{CheckoutOutcome, CheckoutRequest, PaymentGateway, Verification};
use crate::error::{BillingError, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Provider code for a successfully created checkout.
const CODE_CHECKOUT_CREATED: &str = "201";
/// Provider code for a successful status check.
const CODE_CHECK_OK: &str = "00";

/// Hex-encoded HMAC-SHA256 of `payload`, as expected in the webhook
/// signature header.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::InternalError(Box::new(std::io::Error::other(e.to_string()))))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Serialize)]
struct CheckoutPayload<'a> {
    apikey: &'a str,
    site_id: &'a str,
    transaction_id: &'a str,
    #[serde(with = "rust_decimal::serde::float")]
    amount: Decimal,
    currency: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    return_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notify_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
}

#[derive(Serialize)]
struct CheckPayload<'a> {
    apikey: &'a str,
    site_id: &'a str,
    transaction_id: &'a str,
}

#[derive(Deserialize, Debug)]
struct ProviderResponse {
    code: String,
    message: Option<String>,
    data: Option<ProviderData>,
}

#[derive(Deserialize, Debug, Default)]
struct ProviderData {
    payment_url: Option<String>,
    payment_token: Option<String>,
    status: Option<String>,
}

/// Adapter for the hosted-checkout payment provider.
///
/// In [`GatewayMode::Simulation`] no network traffic happens: checkout links
/// point at `<public_base_url>/mock-payment/<transaction_id>`. In
/// [`GatewayMode::Live`] requests go to the provider's `/v2/payment` and
/// `/v2/payment/check` endpoints.
pub struct HostedCheckoutGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HostedCheckoutGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BillingError::InternalError(Box::new(e)))?;

        if config.is_simulation() {
            info!("Payment gateway running in simulation mode");
        }

        Ok(Self { config, client })
    }

    fn simulate(&self, request: &CheckoutRequest) -> CheckoutOutcome {
        debug!(
            transaction_id = %request.transaction_id,
            amount = %request.amount,
            currency = %request.currency,
            "Simulating checkout"
        );
        CheckoutOutcome {
            success: true,
            checkout_url: Some(format!(
                "{}/mock-payment/{}",
                self.config.public_base_url, request.transaction_id
            )),
            gateway_reference: Some(format!("SIM-{}", request.transaction_id)),
            error_message: None,
        }
    }

    async fn post_json<T: Serialize>(
        &self,
        credentials: &LiveCredentials,
        path: &str,
        body: &T,
    ) -> std::result::Result<ProviderResponse, reqwest::Error> {
        let url = format!("{}{}", credentials.base_url.trim_end_matches('/'), path);
        self.client
            .post(url)
            .json(body)
            .send()
            .await?
            .json::<ProviderResponse>()
            .await
    }

    async fn initiate_live(
        &self,
        credentials: &LiveCredentials,
        request: &CheckoutRequest,
    ) -> CheckoutOutcome {
        let payload = CheckoutPayload {
            apikey: &credentials.api_key,
            site_id: &credentials.site_id,
            transaction_id: &request.transaction_id,
            amount: request.amount.value(),
            currency: request.currency.as_str(),
            description: &request.description,
            return_url: self.config.return_url.as_deref(),
            notify_url: self.config.notify_url.as_deref(),
            customer_name: request.customer.as_ref().map(|c| c.name.as_str()),
            customer_email: request.customer.as_ref().and_then(|c| c.email.as_deref()),
        };

        match self.post_json(credentials, "/v2/payment", &payload).await {
            Ok(response) if response.code == CODE_CHECKOUT_CREATED => {
                let data = response.data.unwrap_or_default();
                match data.payment_url {
                    Some(url) => CheckoutOutcome {
                        success: true,
                        checkout_url: Some(url),
                        gateway_reference: data.payment_token,
                        error_message: None,
                    },
                    None => CheckoutOutcome::failed("Provider response is missing the payment URL"),
                }
            }
            Ok(response) => {
                warn!(
                    transaction_id = %request.transaction_id,
                    code = %response.code,
                    "Provider rejected checkout"
                );
                CheckoutOutcome::failed(
                    response
                        .message
                        .unwrap_or_else(|| "Error while creating the payment".to_string()),
                )
            }
            Err(e) => {
                warn!(transaction_id = %request.transaction_id, error = %e, "Provider unreachable");
                CheckoutOutcome::failed("Error communicating with the payment provider")
            }
        }
    }

    async fn verify_live(&self, credentials: &LiveCredentials, transaction_id: &str) -> Verification {
        let payload = CheckPayload {
            apikey: &credentials.api_key,
            site_id: &credentials.site_id,
            transaction_id,
        };

        match self.post_json(credentials, "/v2/payment/check", &payload).await {
            Ok(response) => Verification {
                status: response
                    .data
                    .and_then(|d| d.status)
                    .unwrap_or_else(|| "PENDING".to_string()),
                verified: response.code == CODE_CHECK_OK,
            },
            Err(e) => {
                warn!(%transaction_id, error = %e, "Payment verification failed");
                Verification {
                    status: "ERROR".to_string(),
                    verified: false,
                }
            }
        }
    }
}

#[async_trait]
impl PaymentGateway for HostedCheckoutGateway {
    async fn initiate(&self, request: &CheckoutRequest) -> CheckoutOutcome {
        match &self.config.mode {
            GatewayMode::Simulation => self.simulate(request),
            GatewayMode::Live(credentials) => self.initiate_live(credentials, request).await,
        }
    }

    async fn verify(&self, transaction_id: &str) -> Verification {
        match &self.config.mode {
            GatewayMode::Simulation => Verification {
                status: "ACCEPTED".to_string(),
                verified: true,
            },
            GatewayMode::Live(credentials) => self.verify_live(credentials, transaction_id).await,
        }
    }

    fn validate_inbound_signature(&self, signature: &str, payload: &[u8]) -> bool {
        let credentials = match &self.config.mode {
            GatewayMode::Simulation => return true,
            GatewayMode::Live(credentials) => credentials,
        };
        let Some(secret) = credentials.signing_secret.as_deref() else {
            warn!("No webhook signing secret configured, rejecting callback");
            return false;
        };
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

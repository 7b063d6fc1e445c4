use std::time::Duration;

pub const DEFAULT_GATEWAY_BASE_URL: &str = "https://api-checkout.cinetpay.com";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";

/// Credentials for the real payment provider.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveCredentials {
    pub api_key: String,
    pub site_id: String,
    pub base_url: String,
    /// Shared secret used to authenticate inbound webhooks.
    pub signing_secret: Option<String>,
}

/// How the gateway adapter talks to the provider. Chosen explicitly by the
/// caller; never inferred from missing credentials.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayMode {
    /// Local checkout URLs, every signature accepted, verification always
    /// succeeds.
    Simulation,
    Live(LiveCredentials),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    /// Base URL of this service, used to build simulated checkout links.
    pub public_base_url: String,
    pub return_url: Option<String>,
    pub notify_url: Option<String>,
    pub request_timeout: Duration,
}

impl GatewayConfig {
    pub fn simulation() -> Self {
        Self {
            mode: GatewayMode::Simulation,
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            return_url: None,
            notify_url: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn live(credentials: LiveCredentials) -> Self {
        Self {
            mode: GatewayMode::Live(credentials),
            ..Self::simulation()
        }
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_callbacks(mut self, return_url: Option<String>, notify_url: Option<String>) -> Self {
        self.return_url = return_url;
        self.notify_url = notify_url;
        self
    }

    pub fn is_simulation(&self) -> bool {
        matches!(self.mode, GatewayMode::Simulation)
    }
}

/// Runtime settings for the billing service.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub gateway: GatewayConfig,
    /// Period of the background expiry sweep.
    pub sweep_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::simulation(),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_keeps_defaults() {
        let config = GatewayConfig::live(LiveCredentials {
            api_key: "key".to_string(),
            site_id: "site".to_string(),
            base_url: DEFAULT_GATEWAY_BASE_URL.to_string(),
            signing_secret: None,
        })
        .with_public_base_url("https://clinic.example/");

        assert!(!config.is_simulation());
        assert_eq!(config.public_base_url, "https://clinic.example");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
    }
}

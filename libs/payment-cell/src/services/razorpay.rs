use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{OrderRequest, PaymentError, ProviderOrder};

/// External payment provider. Constructed once at startup and shared.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<ProviderOrder, PaymentError>;

    /// Public key id handed to the client checkout.
    fn key_id(&self) -> &str;

    /// Secret used to sign checkout callbacks.
    fn key_secret(&self) -> &str;
}

/// Razorpay Orders API client.
/// POST {base}/v1/orders with HTTP basic auth (key id / key secret).
pub struct RazorpayClient {
    client: Client,
    key_id: String,
    key_secret: String,
    base_url: String,
}

impl RazorpayClient {
    pub fn new(config: &AppConfig) -> Result<Self, PaymentError> {
        if !config.is_payment_configured() {
            return Err(PaymentError::NotConfigured);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            key_id: config.razorpay_key_id.clone(),
            key_secret: config.razorpay_key_secret.clone(),
            base_url: config.razorpay_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentProvider for RazorpayClient {
    async fn create_order(&self, request: &OrderRequest) -> Result<ProviderOrder, PaymentError> {
        let url = format!("{}/v1/orders", self.base_url);
        debug!("Creating provider order {} for {} {}", request.receipt, request.amount, request.currency);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Provider order request failed: {}", e);
                PaymentError::Provider(e.to_string())
            })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        if !status.is_success() {
            error!("Provider order creation failed: {} - {}", status, response_text);
            return Err(PaymentError::Provider(format!("HTTP {}: {}", status, response_text)));
        }

        let order: ProviderOrder = serde_json::from_str(&response_text)
            .map_err(|e| PaymentError::Provider(format!("Failed to parse order response: {}", e)))?;

        info!("Provider order {} created for {}", order.id, request.receipt);
        Ok(order)
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn key_secret(&self) -> &str {
        &self.key_secret
    }
}

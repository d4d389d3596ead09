//! Card gateway client.
//!
//! The storefront asks the gateway for a charge intent scoped to one order;
//! the order id travels in the intent metadata and comes back to us through
//! the webhook, which is how the two halves of the pipeline correlate.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::StoreError;
use crate::model::{MinorUnits, ModelId};

/// A gateway-issued handle for an authorized-but-unsettled charge.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChargeIntent {
    /// Gateway reference id, persisted on the order for reconciliation.
    pub reference: String,
    /// Client-usable secret the frontend hands to the gateway's card form.
    pub client_secret: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IntentStatus {
    pub status: String,
    pub amount: MinorUnits,
    pub currency: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Authorize a charge for `amount` minor units, tagged with the order
    /// and user so asynchronous events can be traced back.
    async fn create_intent(
        &self,
        amount: MinorUnits,
        currency: &str,
        order_id: ModelId,
        user_id: ModelId,
    ) -> Result<ChargeIntent, StoreError>;

    /// Current gateway-side state of a previously created intent.
    async fn retrieve_intent(&self, reference: &str) -> Result<IntentStatus, StoreError>;
}

/// Stripe-backed gateway implementation.
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct IntentDetailResponse {
    status: String,
    amount: MinorUnits,
    currency: String,
}

impl StripeGateway {
    pub fn new(secret_key: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            api_base,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_intent(
        &self,
        amount: MinorUnits,
        currency: &str,
        order_id: ModelId,
        user_id: ModelId,
    ) -> Result<ChargeIntent, StoreError> {
        debug!("Creating charge intent for order {} ({amount} minor units)", order_id);

        let params = [
            ("amount", amount.to_string()),
            ("currency", currency.to_string()),
            ("metadata[order_id]", order_id.to_string()),
            ("metadata[user_id]", user_id.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params)
            .send()
            .await
            .map_err(|e| StoreError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Gateway(format!(
                "intent creation failed with {status}: {body}"
            )));
        }

        let intent: IntentResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Gateway(e.to_string()))?;

        Ok(ChargeIntent {
            reference: intent.id,
            client_secret: intent.client_secret,
        })
    }

    async fn retrieve_intent(&self, reference: &str) -> Result<IntentStatus, StoreError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{reference}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| StoreError::Gateway(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(StoreError::Gateway(format!(
                "intent lookup for {reference} failed with {status}"
            )));
        }

        let detail: IntentDetailResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Gateway(e.to_string()))?;

        Ok(IntentStatus {
            status: detail.status,
            amount: detail.amount,
            currency: detail.currency,
        })
    }
}

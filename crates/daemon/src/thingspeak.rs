//! Cliente HTTP do ThingSpeak.
//!
//! Lote: `POST` JSON `{ write_api_key, updates: [...] }`.
//! Único: `POST` form-encoded com `api_key`, `created_at`, `field1..4`, `status`.
//! Qualquer 2xx é sucesso.

use std::time::Duration;

use async_trait::async_trait;
use co2_core::config::Endpoint;
use co2_core::types::{BulkUpdate, SingleUpdate, Update};
use co2_core::upload::{CloudSink, DeliveryError};
use reqwest::{Client, Request};
use tracing::debug;

pub struct ThingSpeak {
    client: Client,
    endpoint: Endpoint,
    api_key: String,
}

impl ThingSpeak {
    pub fn new(endpoint: Endpoint, api_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("co2_daemon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
        })
    }

    fn bulk_request(&self, updates: &[Update]) -> Result<Request, DeliveryError> {
        let body = BulkUpdate {
            write_api_key: &self.api_key,
            updates,
        };
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                "POST {}: {}",
                self.endpoint.url(),
                serde_json::to_string(&body).unwrap_or_default()
            );
        }
        self.client
            .post(self.endpoint.url())
            .json(&body)
            .build()
            .map_err(|e| DeliveryError::Encode(e.to_string()))
    }

    fn single_request(&self, update: &Update) -> Result<Request, DeliveryError> {
        let body = SingleUpdate::new(&self.api_key, update);
        debug!("POST {}: {:?}", self.endpoint.url(), update);
        self.client
            .post(self.endpoint.url())
            .form(&body)
            .build()
            .map_err(|e| DeliveryError::Encode(e.to_string()))
    }

    async fn execute(&self, request: Request) -> Result<(), DeliveryError> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        debug!("ThingSpeak respondeu {status}");
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl CloudSink for ThingSpeak {
    async fn send_single(&self, update: &Update) -> Result<(), DeliveryError> {
        let request = self.single_request(update)?;
        self.execute(request).await
    }

    async fn send_bulk(&self, updates: &[Update]) -> Result<(), DeliveryError> {
        let request = self.bulk_request(updates)?;
        self.execute(request).await
    }
}

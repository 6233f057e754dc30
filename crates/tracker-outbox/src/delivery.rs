//! HTTP delivery of event batches.

use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::value::RawValue;
use std::time::Duration;
use tracing::{debug, warn};
use tracker_config_and_utils::{Config, DEFAULT_USER_AGENT};
use url::Url;

/// Longest response body kept in a status error.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Rows fetched from the store for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// Row ids, ascending.
    pub ids: Vec<i64>,
    /// Serialized payloads, one per id.
    pub blobs: Vec<Vec<u8>>,
}

impl Batch {
    pub fn new(ids: Vec<i64>, blobs: Vec<Vec<u8>>) -> Self {
        Self { ids, blobs }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Request body: the stored payloads joined into a JSON array.
    ///
    /// Payload bytes are copied verbatim, so a retried batch produces the
    /// same body. Rows that are not valid JSON are left out.
    pub fn json_body(&self) -> Vec<u8> {
        let capacity = self.blobs.iter().map(|b| b.len() + 1).sum::<usize>() + 2;
        let mut body = Vec::with_capacity(capacity);
        body.push(b'[');

        let mut first = true;
        for (id, blob) in self.ids.iter().zip(&self.blobs) {
            if let Err(e) = serde_json::from_slice::<&RawValue>(blob) {
                warn!(row_id = id, error = %e, "Skipping corrupt payload");
                continue;
            }
            if !first {
                body.push(b',');
            }
            body.extend_from_slice(blob);
            first = false;
        }

        body.push(b']');
        body
    }
}

/// Something that can deliver a batch to an endpoint.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Deliver one batch. `Ok` means the endpoint accepted it.
    async fn send(&self, endpoint: &Url, batch: &Batch) -> OutboxResult<()>;
}

/// Delivery client configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Per-request timeout. None keeps the client defaults.
    pub request_timeout: Option<Duration>,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl From<&Config> for DeliveryConfig {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            user_agent: config.user_agent.clone(),
        }
    }
}

/// Posts batches as `application/json` arrays.
///
/// Any 2xx answer is success. Everything else, including transport errors,
/// is a failure and the rows stay queued.
pub struct HttpDeliveryClient {
    client: Client,
}

impl HttpDeliveryClient {
    pub fn new(config: DeliveryConfig) -> OutboxResult<Self> {
        let mut builder = Client::builder().user_agent(config.user_agent);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl DeliveryTransport for HttpDeliveryClient {
    async fn send(&self, endpoint: &Url, batch: &Batch) -> OutboxResult<()> {
        let body = batch.json_body();

        debug!(
            url = %endpoint,
            events = batch.len(),
            bytes = body.len(),
            "Sending batch"
        );

        let response = self
            .client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(MAX_ERROR_BODY_CHARS)
                .collect();
            return Err(OutboxError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

//! Dhan HTTP order client.
//!
//! Thin single-attempt client for the Dhan v2 order API. Maps transport
//! failures and HTTP status classes onto [`BrokerError`] so the executor's
//! retry policy can decide what to do; never retries internally.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::retry::is_retryable_status;
use super::{BrokerAck, BrokerApi, BrokerError, OrderRequest, TransactionType};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for the Dhan order API.
#[derive(Debug, Clone)]
pub struct DhanConfig {
    /// API base URL, for example `https://api.dhan.co`.
    pub base_url: String,
    /// Dhan client account identifier.
    pub client_id: String,
    /// API access token.
    pub access_token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

/// Dhan v2 order API client.
#[derive(Debug, Clone)]
pub struct DhanClient {
    http: reqwest::Client,
    config: DhanConfig,
}

/// Wire shape of a Dhan order submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DhanOrderBody<'a> {
    dhan_client_id: &'a str,
    correlation_id: &'a str,
    transaction_type: TransactionType,
    exchange_segment: &'a str,
    product_type: &'a str,
    order_type: &'a str,
    validity: &'a str,
    security_id: &'a str,
    quantity: i64,
    price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhanOrderResponse {
    order_id: String,
    order_status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DhanErrorResponse {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl DhanClient {
    /// Build a client from connection settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(config: DhanConfig) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrokerError::Transient(format!("http client build failed: {e}")))?;
        Ok(Self { http, config })
    }

    fn orders_url(&self) -> String {
        format!("{}/v2/orders", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BrokerApi for DhanClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<BrokerAck, BrokerError> {
        let body = DhanOrderBody {
            dhan_client_id: &self.config.client_id,
            correlation_id: &request.correlation_id,
            transaction_type: request.transaction_type,
            exchange_segment: &request.exchange_segment,
            product_type: "INTRADAY",
            order_type: "MARKET",
            validity: "DAY",
            security_id: &request.security_id,
            quantity: request.quantity,
            price: 0.0,
        };

        debug!(
            security_id = %request.security_id,
            quantity = request.quantity,
            transaction_type = ?request.transaction_type,
            "submitting order"
        );

        let response = self
            .http
            .post(self.orders_url())
            .header("access-token", &self.config.access_token)
            .header("client-id", &self.config.client_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrokerError::Timeout {
                        timeout: self.config.timeout,
                    }
                } else {
                    BrokerError::Transient(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let ack: DhanOrderResponse = response
                .json()
                .await
                .map_err(|e| BrokerError::Transient(format!("malformed broker response: {e}")))?;
            if ack.order_status.eq_ignore_ascii_case("REJECTED") {
                return Err(BrokerError::Rejected {
                    reason: format!("order {} rejected at placement", ack.order_id),
                });
            }
            return Ok(BrokerAck {
                order_id: ack.order_id,
                status: ack.order_status,
            });
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let detail = match response.json::<DhanErrorResponse>().await {
            Ok(err) => {
                let code = err.error_code.unwrap_or_default();
                let message = err.error_message.unwrap_or_default();
                format!("{code} {message}").trim().to_string()
            }
            Err(_) => String::new(),
        };

        warn!(status = %status, detail = %detail, "order submission failed");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BrokerError::RateLimited { retry_after });
        }
        if is_retryable_status(status.as_u16()) {
            return Err(BrokerError::Transient(format!(
                "broker returned {status}: {detail}"
            )));
        }
        Err(BrokerError::Rejected {
            reason: if detail.is_empty() {
                format!("broker returned {status}")
            } else {
                detail
            },
        })
    }
}

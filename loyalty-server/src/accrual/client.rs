//! HTTP client for the accrual oracle

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use shared::models::AccrualRecord;
use shared::money::Points;
use std::time::Duration;
use thiserror::Error;

use crate::config::normalize_base_url;

/// Pause used when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// 204: the oracle does not know the order (yet)
    #[error("order not registered in accrual system")]
    NotRegistered,

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("response is for order {got}, requested {expected}")]
    OrderMismatch { expected: String, got: String },
}

#[derive(Debug, Clone)]
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl AccrualClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base}/api/orders/{number}`
    pub async fn fetch(&self, number: &str) -> Result<AccrualRecord, OracleError> {
        let url = format!("{}/api/orders/{}", self.base_url, number);
        let resp = self.http.get(&url).send().await?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp.bytes().await?;
                let record: AccrualRecord = serde_json::from_slice(&body)?;
                if record.order != number {
                    return Err(OracleError::OrderMismatch {
                        expected: number.to_string(),
                        got: record.order,
                    });
                }
                if record.accrual.is_some_and(|points| points < Points::ZERO) {
                    return Err(OracleError::Decode(serde::de::Error::custom(
                        "accrual must not be negative",
                    )));
                }
                Ok(record)
            }
            StatusCode::NO_CONTENT => Err(OracleError::NotRegistered),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                Err(OracleError::RateLimited { retry_after })
            }
            other => Err(OracleError::UnexpectedStatus(other)),
        }
    }
}

//! Rate-limited, retrying HTTP client for the remote catalog API
//!
//! Every attempt, retries included, first takes a token from the shared
//! [`RateLimiter`]. Failures are classified into transient and permanent
//! errors and transient ones are retried by the [`RetryPolicy`].

use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use crate::config::{ApiConfig, Config, RetryConfig};
use crate::error::{ApiError, ClientError};

/// Maximum number of body bytes kept in error messages
const ERROR_BODY_LIMIT: usize = 512;

/// Decoded response of a successful request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// JSON body, `Null` when the body was empty
    pub body: Value,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

impl ApiResponse {
    /// Retries spent before success
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// One page of the remote catalog
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    /// Raw product records, decoded individually by the caller
    pub items: Vec<Value>,
    /// Total record count when the API reports one
    pub total: Option<u64>,
    /// Attempts made to fetch the page
    pub attempts: u32,
}

/// Health endpoint report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Reported status string
    pub status: String,
    /// Raw response body
    pub body: Value,
}

impl HealthReport {
    /// True when the remote reports itself healthy
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Sole path to the remote catalog API
#[derive(Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    offset_param: String,
}

impl ApiClient {
    /// Create a client
    ///
    /// `api.max_retries` bounds retries after the initial attempt.
    pub fn new(
        api: &ApiConfig,
        retry: &RetryConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(api.timeout())
            .user_agent(api.user_agent.as_str())
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            limiter,
            retry: RetryPolicy::new(api.max_retries, retry.clone()),
            offset_param: "offset".to_string(),
        })
    }

    /// Create a client and its rate limiter from the full configuration
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        Ok(Self::new(&config.api, &config.retry, limiter)?
            .with_offset_param(config.sync.offset_param.clone()))
    }

    /// Set the query parameter name used for the page offset
    pub fn with_offset_param(mut self, name: impl Into<String>) -> Self {
        self.offset_param = name.into();
        self
    }

    /// Shared rate limiter
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Retry policy in use
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a request with rate limiting and retries
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        self.request_url(method, &url, params).await
    }

    async fn request_url(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, ClientError> {
        let ((status, body), attempts) = self
            .retry
            .execute(|attempt| {
                let method = method.clone();
                async move {
                    self.limiter.acquire().await;
                    debug!(%method, url, attempt, "Sending HTTP request");
                    self.send_once(method, url, params).await
                }
            })
            .await?;

        Ok(ApiResponse {
            status,
            body,
            attempts,
        })
    }

    /// Issue a GET request
    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, ClientError> {
        self.request(Method::GET, path, params).await
    }

    /// Fetch one page of products
    ///
    /// Accepts either an `{items, total, ...}` envelope or a bare JSON array.
    pub async fn fetch_page(&self, offset: usize, limit: usize) -> Result<CatalogPage, ClientError> {
        let params = [
            (self.offset_param.as_str(), offset.to_string()),
            ("limit", limit.to_string()),
        ];
        let response = self.get("/products", &params).await?;
        let attempts = response.attempts;

        let (items, total) = match response.body {
            Value::Array(items) => (items, None),
            Value::Object(mut envelope) => match envelope.remove("items") {
                Some(Value::Array(items)) => {
                    (items, envelope.get("total").and_then(Value::as_u64))
                }
                _ => {
                    return Err(ClientError::Permanent {
                        attempts,
                        source: ApiError::InvalidData(
                            "page envelope has no items array".to_string(),
                        ),
                    })
                }
            },
            other => {
                return Err(ClientError::Permanent {
                    attempts,
                    source: ApiError::InvalidData(format!("unexpected page body: {}", other)),
                })
            }
        };

        debug!(offset, limit, count = items.len(), total, "Fetched catalog page");
        Ok(CatalogPage {
            items,
            total,
            attempts,
        })
    }

    /// Fetch a single product by its remote id
    ///
    /// The id is percent-encoded as one path segment.
    pub async fn fetch_product(&self, external_id: &str) -> Result<ApiResponse, ClientError> {
        let invalid = |message: String| ClientError::Permanent {
            attempts: 0,
            source: ApiError::Request(message),
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid(format!("base URL cannot carry a path: {}", self.base_url)))?
            .pop_if_empty()
            .push("products")
            .push(external_id);

        self.request_url(Method::GET, url.as_str(), &[]).await
    }

    /// Query the health endpoint
    pub async fn check_health(&self) -> Result<HealthReport, ClientError> {
        let response = self.get("/health", &[]).await?;
        let status = response
            .body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        Ok(HealthReport {
            status,
            body: response.body,
        })
    }

    /// True when the remote reports itself healthy; failures count as unhealthy
    pub async fn health_check(&self) -> bool {
        match self.check_health().await {
            Ok(report) => report.is_healthy(),
            Err(e) => {
                warn!(error = %e, "Health check failed");
                false
            }
        }
    }

    /// Perform a single attempt and map the outcome
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<(u16, Value), ApiError> {
        let response = self
            .client
            .request(method, url)
            .query(params)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                let body = read_json(response).await?;
                Ok((s.as_u16(), body))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0);

                warn!(url, retry_after, "Rate limited by upstream");
                Err(ApiError::RateLimited(retry_after))
            }
            StatusCode::REQUEST_TIMEOUT => {
                warn!(url, "Upstream request timeout (408)");
                Err(ApiError::RequestTimeout)
            }
            s if s.is_server_error() => {
                warn!(url, status = s.as_u16(), "Server error");
                Err(ApiError::ServerError(s.as_u16()))
            }
            s => {
                let mut body = response.text().await.unwrap_or_default();
                if body.len() > ERROR_BODY_LIMIT {
                    let mut cut = ERROR_BODY_LIMIT;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                debug!(url, status = s.as_u16(), "Request rejected");
                Err(ApiError::ClientStatus {
                    status: s.as_u16(),
                    body,
                })
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::NetworkTimeout
    } else if e.is_connect() {
        ApiError::ConnectionRefused
    } else if e.is_builder() {
        ApiError::Request(e.to_string())
    } else {
        ApiError::Network(e.to_string())
    }
}

async fn read_json(response: Response) -> Result<Value, ApiError> {
    let text = response.text().await.map_err(map_transport_error)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| ApiError::InvalidData(e.to_string()))
}

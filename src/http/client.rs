//! HTTP client implementation

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::request::{PendingRequest, Request};
use super::response::Response;
use crate::error::HttpError;

/// Anything that can carry a prepared request to the target
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &PendingRequest) -> Result<Response, HttpError>;
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Default request timeout in seconds
    pub timeout_secs: u64,

    /// Follow redirects
    pub follow_redirects: bool,

    /// Maximum redirects to follow
    pub max_redirects: usize,

    /// User agent string
    pub user_agent: String,

    /// Upstream proxy URL
    pub proxy: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            follow_redirects: true,
            max_redirects: 10,
            user_agent: concat!("api-fuzzer/", env!("CARGO_PKG_VERSION")).to_string(),
            proxy: None,
        }
    }
}

/// HTTP client wrapper
pub struct HttpClient {
    /// Inner reqwest client
    client: reqwest::Client,

    /// Default timeout
    default_timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(settings: &HttpSettings) -> Result<Self, HttpError> {
        let redirect = if settings.follow_redirects {
            reqwest::redirect::Policy::limited(settings.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .redirect(redirect)
            .user_agent(&settings.user_agent)
            .cookie_store(true);

        if let Some(proxy) = &settings.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| HttpError::InvalidUrl(format!("{}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| HttpError::RequestFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            default_timeout: Duration::from_secs(settings.timeout_secs),
        })
    }

    /// Execute a request exactly as given
    pub async fn execute(&self, request: &Request) -> Result<Response, HttpError> {
        let start = Instant::now();

        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| HttpError::RequestFailed(e.to_string()))?;
        let url = request.full_url();
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let mut builder = self.client.request(method, &url).timeout(timeout);

        // Set headers
        let mut headers = HeaderMap::new();
        for (key, value) in &request.headers {
            let name = HeaderName::from_str(key).map_err(|e| HttpError::InvalidHeader {
                name: key.clone(),
                reason: e.to_string(),
            })?;
            let val = HeaderValue::from_str(value).map_err(|e| HttpError::InvalidHeader {
                name: key.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(name, val);
        }
        if let Some(cookie) = request.cookie_header() {
            if request.header("cookie").is_none() {
                if let Ok(val) = HeaderValue::from_str(&cookie) {
                    headers.insert(reqwest::header::COOKIE, val);
                }
            }
        }
        builder = builder.headers(headers);

        // Set body
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| map_error(e, timeout))?;
        self.build_response(response, start, timeout).await
    }

    /// Build response from reqwest response
    async fn build_response(
        &self,
        response: reqwest::Response,
        start: Instant,
        timeout: Duration,
    ) -> Result<Response, HttpError> {
        let status = response.status().as_u16();
        let status_text = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .to_string();
        let http_version = format!("{:?}", response.version());

        // Convert headers
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_string(), v.to_string());
            }
        }

        // Get body
        let body = response.bytes().await.map_err(|e| map_error(e, timeout))?;

        Ok(Response {
            status,
            status_text,
            headers,
            body: body.to_vec(),
            elapsed: start.elapsed(),
            http_version,
        })
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout(timeout.as_millis() as u64)
    } else if err.is_connect() {
        HttpError::ConnectionError(err.to_string())
    } else {
        HttpError::RequestFailed(err.to_string())
    }
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn send(&self, pending: &PendingRequest) -> Result<Response, HttpError> {
        let mut request = pending.request.clone();
        if let Some(auth) = &pending.auth {
            auth.apply(&mut request)?;
        }

        let response = self.execute(&request).await?;

        if let Some(auth) = &pending.auth {
            if let Some(retry) = auth.on_challenge(&request, &response)? {
                tracing::debug!(url = %request.url, auth = auth.name(), "Retrying after auth challenge");
                return self.execute(&retry).await;
            }
        }

        Ok(response)
    }
}

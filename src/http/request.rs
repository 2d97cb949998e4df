//! HTTP request types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use super::auth::SharedAuth;
use crate::error::RequestError;

/// HTTP verbs accepted in request descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
}

impl HttpMethod {
    pub fn all() -> &'static [HttpMethod] {
        &[
            HttpMethod::Get,
            HttpMethod::Post,
            HttpMethod::Put,
            HttpMethod::Delete,
            HttpMethod::Patch,
            HttpMethod::Head,
            HttpMethod::Options,
            HttpMethod::Trace,
            HttpMethod::Connect,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Connect => "CONNECT",
        }
    }
}

impl FromStr for HttpMethod {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        HttpMethod::all()
            .iter()
            .copied()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| RequestError::Invalid(format!("unknown HTTP method '{}'", s)))
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved HTTP request, ready for a transport
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Unique request ID
    pub id: String,

    /// HTTP method
    pub method: HttpMethod,

    /// Absolute request URL, without the params below
    pub url: String,

    /// Request headers
    pub headers: HashMap<String, String>,

    /// Query parameters
    pub params: BTreeMap<String, String>,

    /// Cookies, sent as a single `Cookie` header
    pub cookies: BTreeMap<String, String>,

    /// Request body
    pub body: Option<String>,

    /// Per-request timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method: HttpMethod::Get,
            url: String::new(),
            headers: HashMap::new(),
            params: BTreeMap::new(),
            cookies: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }
}

impl Request {
    /// Create a new request
    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Create a builder for constructing requests
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Get the full URL with query parameters
    pub fn full_url(&self) -> String {
        if self.params.is_empty() {
            return self.url.clone();
        }

        let params: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();

        if self.url.contains('?') {
            format!("{}&{}", self.url, params.join("&"))
        } else {
            format!("{}?{}", self.url, params.join("&"))
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Insert a header, replacing any existing one regardless of case
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
        self.headers.insert(name.to_string(), value.into());
    }

    /// Render the cookie jar as a `Cookie` header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Builder for constructing requests
#[derive(Debug, Default)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Set the request method
    pub fn method(mut self, method: HttpMethod) -> Self {
        self.request.method = method;
        self
    }

    /// Set the request URL
    pub fn url(mut self, url: &str) -> Self {
        self.request.url = url.to_string();
        self
    }

    /// Add a header
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request.set_header(key, value);
        self
    }

    /// Add a query parameter
    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.request.params.insert(key.to_string(), value.to_string());
        self
    }

    /// Add a cookie
    pub fn cookie(mut self, key: &str, value: &str) -> Self {
        self.request.cookies.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the request body
    pub fn body(mut self, body: &str) -> Self {
        self.request.body = Some(body.to_string());
        self
    }

    /// Set JSON body
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        self.request.body = serde_json::to_string(body).ok();
        self.request.set_header("Content-Type", "application/json");
        self
    }

    /// Set request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Build the request
    pub fn build(self) -> Request {
        self.request
    }
}

/// A request moved through the request queue: the wire request plus the
/// auth handle that prepares it right before sending
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub request: Request,
    pub auth: Option<SharedAuth>,
}

impl PendingRequest {
    pub fn new(request: Request) -> Self {
        Self { request, auth: None }
    }

    pub fn with_auth(mut self, auth: SharedAuth) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl From<Request> for PendingRequest {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = Request::builder()
            .method(HttpMethod::Post)
            .url("https://api.example.com/users")
            .header("X-Custom", "value")
            .param("page", "1")
            .body(r#"{"name": "test"}"#)
            .build();

        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "https://api.example.com/users");
        assert_eq!(req.header("x-custom"), Some("value"));
        assert_eq!(req.params.get("page"), Some(&"1".to_string()));
    }

    #[test]
    fn test_full_url() {
        let req = Request::builder()
            .url("https://api.example.com/users?sort=asc")
            .param("page", "1")
            .param("q", "a b")
            .build();

        assert_eq!(
            req.full_url(),
            "https://api.example.com/users?sort=asc&page=1&q=a%20b"
        );
    }

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("Patch".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert!("FETCH".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_set_header_replaces_any_case() {
        let mut req = Request::builder().header("content-type", "text/plain").build();
        req.set_header("Content-Type", "application/json");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn test_cookie_header() {
        let req = Request::builder().cookie("b", "2").cookie("a", "1").build();
        assert_eq!(req.cookie_header().as_deref(), Some("a=1; b=2"));
    }
}

//! Turns raw request descriptions into transport-ready requests
//!
//! Defaults (`base_url`, headers, params, cookies, auth) come from the
//! `[request]` config section; per-request values win on conflicts, and auth
//! handles accumulate with the request's own handles applied last.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::auth::{AuthSpec, MultiAuth, SharedAuth};
use super::request::{HttpMethod, PendingRequest, Request};
use crate::error::RequestError;

/// Values shared by every request of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestDefaults {
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub cookies: BTreeMap<String, String>,
    pub auth: Option<AuthSpec>,
}

/// One request as described by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawRequest {
    pub method: String,
    pub url: String,
    #[serde(deserialize_with = "scalar_map")]
    pub headers: BTreeMap<String, String>,
    #[serde(deserialize_with = "scalar_map")]
    pub params: BTreeMap<String, String>,
    #[serde(deserialize_with = "scalar_map")]
    pub cookies: BTreeMap<String, String>,
    /// Raw body
    pub content: Option<String>,
    /// JSON body; a string is taken as already-encoded JSON
    pub json: Option<Value>,
    /// Form fields, sent url-encoded
    #[serde(deserialize_with = "scalar_map")]
    pub data: BTreeMap<String, String>,
    /// Timeout in seconds
    pub timeout: Option<f64>,
    pub auth: Option<Value>,
}

/// Accept `{"id": 5, "flag": true}` as well as string values
fn scalar_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = BTreeMap::<String, Value>::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// Builds [`PendingRequest`]s against a fixed set of defaults
#[derive(Debug, Default)]
pub struct RequestBuilder {
    base_url: Option<url::Url>,
    headers: BTreeMap<String, String>,
    params: BTreeMap<String, String>,
    cookies: BTreeMap<String, String>,
    auth: Option<SharedAuth>,
}

impl RequestBuilder {
    pub fn new(defaults: &RequestDefaults) -> Result<Self, RequestError> {
        let base_url = match &defaults.base_url {
            Some(base) if !base.is_empty() => Some(
                url::Url::parse(base)
                    .map_err(|e| RequestError::Build(format!("invalid base_url '{}': {}", base, e)))?,
            ),
            _ => None,
        };
        let auth = defaults.auth.as_ref().map(AuthSpec::build).transpose()?;

        Ok(Self {
            base_url,
            headers: defaults.headers.clone(),
            params: defaults.params.clone(),
            cookies: defaults.cookies.clone(),
            auth,
        })
    }

    pub fn base_url(&self) -> Option<&url::Url> {
        self.base_url.as_ref()
    }

    /// Absolute URLs pass through; relative ones are joined onto the base URL
    pub fn resolve_url(&self, url: &str) -> Result<String, RequestError> {
        if let Ok(parsed) = url::Url::parse(url) {
            if parsed.has_host() {
                return Ok(url.to_string());
            }
        }

        let base = self.base_url.as_ref().ok_or_else(|| {
            RequestError::Invalid(format!("'{}' is not absolute and no base_url is set", url))
        })?;
        let joined = format!(
            "{}/{}",
            base.as_str().trim_end_matches('/'),
            url.trim_start_matches('/')
        );
        url::Url::parse(&joined)
            .map(|_| joined)
            .map_err(|e| RequestError::Invalid(format!("cannot resolve '{}': {}", url, e)))
    }

    pub fn build(&self, raw: &RawRequest) -> Result<PendingRequest, RequestError> {
        let method: HttpMethod = raw.method.parse()?;
        let url = self.resolve_url(&raw.url)?;

        let mut request = Request::new(method, &url);
        for (k, v) in self.headers.iter().chain(raw.headers.iter()) {
            request.set_header(k, v.clone());
        }
        request.params = self.params.clone();
        request.params.extend(raw.params.clone());
        request.cookies = self.cookies.clone();
        request.cookies.extend(raw.cookies.clone());

        if let Some(secs) = raw.timeout {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(RequestError::Build(format!("invalid timeout {}", secs)));
            }
            request.timeout = Some(Duration::from_secs_f64(secs));
        }

        self.apply_body(&mut request, raw)?;

        let request_auth = raw
            .auth
            .as_ref()
            .map(|v| AuthSpec::from_value(v).and_then(|spec| spec.build()))
            .transpose()?;
        let auth = match (self.auth.clone(), request_auth) {
            (Some(defaults), Some(own)) => {
                Some(Arc::new(MultiAuth::new(vec![defaults, own])) as SharedAuth)
            }
            (defaults, own) => own.or(defaults),
        };

        Ok(PendingRequest { request, auth })
    }

    fn apply_body(&self, request: &mut Request, raw: &RawRequest) -> Result<(), RequestError> {
        let kinds = [raw.content.is_some(), raw.json.is_some(), !raw.data.is_empty()];
        if kinds.iter().filter(|k| **k).count() > 1 {
            return Err(RequestError::Build(
                "only one of content, json and data may be given".into(),
            ));
        }

        if let Some(content) = &raw.content {
            request.body = Some(content.clone());
        } else if let Some(json) = &raw.json {
            let body = match json {
                Value::String(s) => {
                    serde_json::from_str::<Value>(s)
                        .map_err(|e| RequestError::Build(format!("json body does not parse: {}", e)))?;
                    s.clone()
                }
                other => other.to_string(),
            };
            request.body = Some(body);
            if request.header("content-type").is_none() {
                request.set_header("Content-Type", "application/json");
            }
        } else if !raw.data.is_empty() {
            let form = raw
                .data
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            request.body = Some(form);
            if request.header("content-type").is_none() {
                request.set_header("Content-Type", "application/x-www-form-urlencoded");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRequest {
        serde_json::from_value(value).unwrap()
    }

    fn defaults() -> RequestDefaults {
        RequestDefaults {
            base_url: Some("http://api.local/v1/".into()),
            headers: BTreeMap::from([
                ("User-Agent".into(), "default-agent".into()),
                ("X-Team".into(), "red".into()),
            ]),
            params: BTreeMap::from([("page".into(), "1".into())]),
            cookies: BTreeMap::from([("session".into(), "s1".into())]),
            auth: None,
        }
    }

    #[test]
    fn test_relative_url_joined_onto_base() {
        let builder = RequestBuilder::new(&defaults()).unwrap();
        let pending = builder.build(&raw(json!({"method": "get", "url": "/users"}))).unwrap();
        assert_eq!(pending.request.url, "http://api.local/v1/users");
        assert_eq!(pending.request.method, HttpMethod::Get);

        let pending = builder
            .build(&raw(json!({"method": "GET", "url": "https://other.local/x"})))
            .unwrap();
        assert_eq!(pending.request.url, "https://other.local/x");
    }

    #[test]
    fn test_relative_url_without_base_fails() {
        let builder = RequestBuilder::new(&RequestDefaults::default()).unwrap();
        assert!(builder.build(&raw(json!({"method": "GET", "url": "/users"}))).is_err());
    }

    #[test]
    fn test_request_values_override_defaults() {
        let builder = RequestBuilder::new(&defaults()).unwrap();
        let pending = builder
            .build(&raw(json!({
                "method": "POST",
                "url": "items",
                "headers": {"x-team": "blue", "X-Count": 3},
                "params": {"page": "2"},
                "cookies": {"theme": "dark"}
            })))
            .unwrap();
        let req = pending.request;
        assert_eq!(req.header("X-Team"), Some("blue"));
        assert_eq!(req.header("user-agent"), Some("default-agent"));
        assert_eq!(req.header("x-count"), Some("3"));
        assert_eq!(req.params.get("page").map(String::as_str), Some("2"));
        assert_eq!(req.cookies.len(), 2);
    }

    #[test]
    fn test_body_kinds() {
        let builder = RequestBuilder::new(&defaults()).unwrap();

        let req = builder
            .build(&raw(json!({"method": "POST", "url": "a", "json": {"id": 1}})))
            .unwrap()
            .request;
        assert_eq!(req.body.as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(req.header("content-type"), Some("application/json"));

        let req = builder
            .build(&raw(json!({"method": "POST", "url": "a", "json": "[1, 2]"})))
            .unwrap()
            .request;
        assert_eq!(req.body.as_deref(), Some("[1, 2]"));

        let req = builder
            .build(&raw(json!({"method": "POST", "url": "a", "data": {"q": "a b", "n": 1}})))
            .unwrap()
            .request;
        assert_eq!(req.body.as_deref(), Some("n=1&q=a%20b"));

        assert!(builder
            .build(&raw(json!({"method": "POST", "url": "a", "content": "x", "json": {}})))
            .is_err());
    }

    #[test]
    fn test_auth_accumulates_request_last() {
        let mut defaults = defaults();
        defaults.auth = Some(
            AuthSpec::from_value(&json!({
                "auth_mode": "Custom-auth",
                "credentials": {"key": "X-Who", "value": "default"}
            }))
            .unwrap(),
        );
        let builder = RequestBuilder::new(&defaults).unwrap();
        let pending = builder
            .build(&raw(json!({
                "method": "GET",
                "url": "a",
                "auth": {"auth_mode": "Custom-auth", "credentials": {"key": "X-Who", "value": "request"}}
            })))
            .unwrap();

        let mut req = pending.request.clone();
        pending.auth.unwrap().apply(&mut req).unwrap();
        assert_eq!(req.header("x-who"), Some("request"));
    }

    #[test]
    fn test_unsupported_auth_fails_build() {
        let builder = RequestBuilder::new(&defaults()).unwrap();
        let err = builder
            .build(&raw(json!({"method": "GET", "url": "a", "auth": {"auth_mode": "OAuth1-auth"}})))
            .unwrap_err();
        assert!(matches!(err, RequestError::Auth(_)));
    }
}

//! Authentication handlers
//!
//! A request description carries `{"auth_mode": ..., "credentials": {...}}`
//! (or a list of them). Each mode is parsed into an [`AuthConfig`] and turned
//! into an [`AuthHandle`] that mutates the outgoing request right before it
//! is sent.

mod api_key;
mod aws;
mod basic;
mod bearer;
mod custom;
mod digest;
mod jwt;

pub use api_key::{ApiKeyAuth, ApiKeyLocation};
pub use aws::Aws4Auth;
pub use basic::BasicAuth;
pub use bearer::BearerAuth;
pub use custom::CustomAuth;
pub use digest::DigestAuth;
pub use jwt::{JwtAuth, JwtCredentials};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

use super::{Request, Response};
use crate::error::AuthError;

/// Capability that prepares a request for a protected endpoint
pub trait AuthHandle: Send + Sync + Debug {
    /// Mode name, for logs
    fn name(&self) -> &'static str;

    /// Add credentials to an outgoing request
    fn apply(&self, request: &mut Request) -> Result<(), AuthError>;

    /// Inspect a response; return a request to retry once when the server
    /// issued a challenge this handle can answer.
    fn on_challenge(
        &self,
        _request: &Request,
        _response: &Response,
    ) -> Result<Option<Request>, AuthError> {
        Ok(None)
    }
}

pub type SharedAuth = Arc<dyn AuthHandle>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPassword {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCredentials {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyCredentials {
    pub name: String,
    pub location: ApiKeyLocation,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCredentials {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_id: String,
    pub secret_key: String,
    pub region: String,
    pub service: String,
}

/// Declarative auth description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "auth_mode", content = "credentials")]
pub enum AuthConfig {
    #[serde(rename = "Basic-auth")]
    Basic(UserPassword),
    #[serde(rename = "Digest-auth")]
    Digest(UserPassword),
    #[serde(rename = "Bearer-auth")]
    Bearer(TokenCredentials),
    #[serde(rename = "API-key-auth")]
    ApiKey(ApiKeyCredentials),
    #[serde(rename = "JWT-auth")]
    Jwt(JwtCredentials),
    #[serde(rename = "Custom-auth")]
    Custom(CustomCredentials),
    #[serde(rename = "AWS4-auth")]
    Aws4(AwsCredentials),
    #[serde(rename = "NTLM-auth")]
    Ntlm(Option<Value>),
    #[serde(rename = "OAuth2-auth")]
    OAuth2(Option<Value>),
    #[serde(rename = "OAuth1-auth")]
    OAuth1(Option<Value>),
}

impl AuthConfig {
    pub fn mode(&self) -> &'static str {
        match self {
            AuthConfig::Basic(_) => "Basic-auth",
            AuthConfig::Digest(_) => "Digest-auth",
            AuthConfig::Bearer(_) => "Bearer-auth",
            AuthConfig::ApiKey(_) => "API-key-auth",
            AuthConfig::Jwt(_) => "JWT-auth",
            AuthConfig::Custom(_) => "Custom-auth",
            AuthConfig::Aws4(_) => "AWS4-auth",
            AuthConfig::Ntlm(_) => "NTLM-auth",
            AuthConfig::OAuth2(_) => "OAuth2-auth",
            AuthConfig::OAuth1(_) => "OAuth1-auth",
        }
    }

    /// Build the handle for this mode
    pub fn build(&self) -> Result<SharedAuth, AuthError> {
        let handle: SharedAuth = match self {
            AuthConfig::Basic(c) => Arc::new(BasicAuth::new(&c.username, &c.password)),
            AuthConfig::Digest(c) => Arc::new(DigestAuth::new(&c.username, &c.password)),
            AuthConfig::Bearer(c) => Arc::new(BearerAuth::new(&c.token)),
            AuthConfig::ApiKey(c) => Arc::new(ApiKeyAuth::new(&c.name, c.location, &c.value)),
            AuthConfig::Jwt(c) => Arc::new(JwtAuth::from_credentials(c)?),
            AuthConfig::Custom(c) => Arc::new(CustomAuth::new(&c.key, &c.value)?),
            AuthConfig::Aws4(c) => Arc::new(Aws4Auth::new(c.clone())?),
            AuthConfig::Ntlm(_) | AuthConfig::OAuth2(_) | AuthConfig::OAuth1(_) => {
                return Err(AuthError::Unsupported(self.mode().to_string()))
            }
        };
        Ok(handle)
    }
}

/// One auth description or an ordered list of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuthSpec {
    One(AuthConfig),
    Many(Vec<AuthConfig>),
}

impl AuthSpec {
    /// Parse from a raw JSON value with a precise error per entry
    pub fn from_value(value: &Value) -> Result<Self, AuthError> {
        let parse = |v: &Value| {
            AuthConfig::deserialize(v).map_err(|e| AuthError::Malformed(e.to_string()))
        };
        match value {
            Value::Array(items) => Ok(AuthSpec::Many(
                items.iter().map(parse).collect::<Result<_, _>>()?,
            )),
            Value::Object(_) => Ok(AuthSpec::One(parse(value)?)),
            other => Err(AuthError::Malformed(format!(
                "expected an object or a list of objects, got {}",
                other
            ))),
        }
    }

    pub fn configs(&self) -> &[AuthConfig] {
        match self {
            AuthSpec::One(c) => std::slice::from_ref(c),
            AuthSpec::Many(cs) => cs,
        }
    }

    /// Build a single handle; lists become a [`MultiAuth`]
    pub fn build(&self) -> Result<SharedAuth, AuthError> {
        match self {
            AuthSpec::One(c) => c.build(),
            AuthSpec::Many(cs) => {
                let handles = cs.iter().map(AuthConfig::build).collect::<Result<_, _>>()?;
                Ok(Arc::new(MultiAuth::new(handles)))
            }
        }
    }
}

/// Applies several handles in order
#[derive(Debug, Default)]
pub struct MultiAuth {
    handles: Vec<SharedAuth>,
}

impl MultiAuth {
    pub fn new(handles: Vec<SharedAuth>) -> Self {
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl AuthHandle for MultiAuth {
    fn name(&self) -> &'static str {
        "Multi-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        for handle in &self.handles {
            handle.apply(request)?;
        }
        Ok(())
    }

    fn on_challenge(
        &self,
        request: &Request,
        response: &Response,
    ) -> Result<Option<Request>, AuthError> {
        for handle in &self.handles {
            if let Some(retry) = handle.on_challenge(request, response)? {
                return Ok(Some(retry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_basic_auth() {
        let spec = AuthSpec::from_value(&json!({
            "auth_mode": "Basic-auth",
            "credentials": {"username": "admin", "password": "secret"}
        }))
        .unwrap();
        assert_eq!(spec.configs().len(), 1);
        assert_eq!(spec.configs()[0].mode(), "Basic-auth");
    }

    #[test]
    fn test_unsupported_modes_rejected() {
        let spec = AuthSpec::from_value(&json!({
            "auth_mode": "NTLM-auth",
            "credentials": {"domain": "CORP", "username": "u", "password": "p"}
        }))
        .unwrap();
        assert!(matches!(spec.build(), Err(AuthError::Unsupported(m)) if m == "NTLM-auth"));

        let spec = AuthSpec::from_value(&json!({"auth_mode": "OAuth2-auth"})).unwrap();
        assert!(matches!(spec.build(), Err(AuthError::Unsupported(_))));
    }

    #[test]
    fn test_malformed_auth_rejected() {
        assert!(AuthSpec::from_value(&json!("Basic-auth")).is_err());
        assert!(AuthSpec::from_value(&json!({"auth_mode": "Kerberos"})).is_err());
        assert!(AuthSpec::from_value(&json!({"auth_mode": "Basic-auth", "credentials": {}})).is_err());
    }

    #[test]
    fn test_multi_auth_applies_in_order() {
        let spec = AuthSpec::from_value(&json!([
            {"auth_mode": "Custom-auth", "credentials": {"key": "X-Order", "value": "first"}},
            {"auth_mode": "Custom-auth", "credentials": {"key": "X-Order", "value": "second"}},
            {"auth_mode": "Bearer-auth", "credentials": {"token": "abc"}}
        ]))
        .unwrap();
        let handle = spec.build().unwrap();
        let mut req = Request::default();
        handle.apply(&mut req).unwrap();
        assert_eq!(req.header("x-order"), Some("second"));
        assert_eq!(req.header("authorization"), Some("Bearer abc"));
    }
}

//! Arbitrary header authentication

use reqwest::header::HeaderName;

use super::AuthHandle;
use crate::error::AuthError;
use crate::http::Request;

/// Sets one caller-chosen header
#[derive(Debug)]
pub struct CustomAuth {
    key: String,
    value: String,
}

impl CustomAuth {
    pub fn new(key: &str, value: &str) -> Result<Self, AuthError> {
        HeaderName::from_bytes(key.as_bytes()).map_err(|e| AuthError::InvalidCredentials {
            mode: "Custom-auth".into(),
            reason: format!("'{}' is not a valid header name: {}", key, e),
        })?;
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

impl AuthHandle for CustomAuth {
    fn name(&self) -> &'static str {
        "Custom-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        request.set_header(&self.key, self.value.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_header_name() {
        assert!(CustomAuth::new("bad header", "x").is_err());
        assert!(CustomAuth::new("X-Api-Token", "x").is_ok());
    }
}

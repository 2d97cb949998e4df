//! Bearer token authentication

use super::AuthHandle;
use crate::error::AuthError;
use crate::http::Request;

/// Bearer token authentication handler
#[derive(Debug)]
pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

impl AuthHandle for BearerAuth {
    fn name(&self) -> &'static str {
        "Bearer-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        request.set_header("Authorization", format!("Bearer {}", self.token));
        Ok(())
    }
}

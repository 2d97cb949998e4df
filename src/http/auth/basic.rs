//! Basic authentication

use base64::{engine::general_purpose::STANDARD, Engine};

use super::AuthHandle;
use crate::error::AuthError;
use crate::http::Request;

/// Basic authentication handler
#[derive(Debug)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn header_value(&self) -> String {
        let credentials = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(credentials))
    }
}

impl AuthHandle for BasicAuth {
    fn name(&self) -> &'static str {
        "Basic-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        request.set_header("Authorization", self.header_value());
        Ok(())
    }
}

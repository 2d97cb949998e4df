//! API key authentication, as a header or a query parameter

use serde::{Deserialize, Serialize};

use super::AuthHandle;
use crate::error::AuthError;
use crate::http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Headers,
    Params,
}

#[derive(Debug)]
pub struct ApiKeyAuth {
    name: String,
    location: ApiKeyLocation,
    value: String,
}

impl ApiKeyAuth {
    pub fn new(name: &str, location: ApiKeyLocation, value: &str) -> Self {
        Self {
            name: name.to_string(),
            location,
            value: value.to_string(),
        }
    }
}

impl AuthHandle for ApiKeyAuth {
    fn name(&self) -> &'static str {
        "API-key-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        match self.location {
            ApiKeyLocation::Headers => request.set_header(&self.name, self.value.clone()),
            ApiKeyLocation::Params => {
                request.params.insert(self.name.clone(), self.value.clone());
            }
        }
        Ok(())
    }
}

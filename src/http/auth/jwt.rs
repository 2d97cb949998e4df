//! JWT authentication

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use super::AuthHandle;
use crate::error::AuthError;
use crate::http::Request;

/// Default token lifetime for generated tokens, in seconds
const DEFAULT_EXPIRATION: i64 = 3600;

/// JWT credentials: either a ready token or the material to sign one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "token_info")]
pub enum JwtCredentials {
    #[serde(rename = "use-jwt")]
    UseJwt(String),
    #[serde(rename = "generate-jwt")]
    GenerateJwt(JwtGenerate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtGenerate {
    #[serde(default)]
    pub payload: Map<String, Value>,
    /// Shared secret for HS*, PEM private key for RS*/PS*/ES*/EdDSA
    pub secret: String,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

/// JWT authentication handler; the token is fixed when the handle is built
#[derive(Debug)]
pub struct JwtAuth {
    token: String,
}

impl JwtAuth {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }

    pub fn from_credentials(credentials: &JwtCredentials) -> Result<Self, AuthError> {
        match credentials {
            JwtCredentials::UseJwt(token) => Ok(Self::new(token)),
            JwtCredentials::GenerateJwt(spec) => Ok(Self {
                token: generate_token(spec)?,
            }),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

fn invalid(reason: impl Into<String>) -> AuthError {
    AuthError::InvalidCredentials {
        mode: "JWT-auth".into(),
        reason: reason.into(),
    }
}

fn generate_token(spec: &JwtGenerate) -> Result<String, AuthError> {
    let algorithm = Algorithm::from_str(&spec.algorithm)
        .or_else(|_| Algorithm::from_str(&spec.algorithm.to_uppercase()))
        .map_err(|_| invalid(format!("unknown algorithm '{}'", spec.algorithm)))?;

    let secret = spec.secret.as_bytes();
    let key = match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => EncodingKey::from_secret(secret),
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(secret).map_err(|e| invalid(e.to_string()))?,
        Algorithm::ES256 | Algorithm::ES384 => {
            EncodingKey::from_ec_pem(secret).map_err(|e| invalid(e.to_string()))?
        }
        Algorithm::EdDSA => EncodingKey::from_ed_pem(secret).map_err(|e| invalid(e.to_string()))?,
    };

    let mut claims = spec.payload.clone();
    let now = chrono::Utc::now().timestamp();
    claims.entry("iat").or_insert_with(|| Value::from(now));
    claims
        .entry("exp")
        .or_insert_with(|| Value::from(now + DEFAULT_EXPIRATION));

    encode(&Header::new(algorithm), &claims, &key).map_err(|e| AuthError::Signing(e.to_string()))
}

impl AuthHandle for JwtAuth {
    fn name(&self) -> &'static str {
        "JWT-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        request.set_header("Authorization", format!("Bearer {}", self.token));
        Ok(())
    }
}

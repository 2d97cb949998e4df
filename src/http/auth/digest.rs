//! Digest authentication (RFC 7616, MD5 with qop=auth)

use parking_lot::Mutex;

use super::AuthHandle;
use crate::error::AuthError;
use crate::http::{Request, Response};

/// Parameters of the last `WWW-Authenticate: Digest` challenge
#[derive(Debug, Clone, Default, PartialEq)]
struct Challenge {
    realm: String,
    nonce: String,
    qop: Option<String>,
    opaque: Option<String>,
}

#[derive(Debug, Default)]
struct DigestState {
    challenge: Option<Challenge>,
    nc: u32,
}

/// Digest authentication handler
///
/// The first request goes out bare; the server's 401 challenge is stored and
/// answered, and later requests reuse the nonce with an increasing count.
#[derive(Debug)]
pub struct DigestAuth {
    username: String,
    password: String,
    cnonce: String,
    state: Mutex<DigestState>,
}

impl DigestAuth {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            cnonce: uuid::Uuid::new_v4().simple().to_string()[..16].to_string(),
            state: Mutex::new(DigestState::default()),
        }
    }

    /// Parse a `WWW-Authenticate` header value; `None` if it is not a digest challenge
    fn parse_challenge(header: &str) -> Option<Challenge> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut challenge = Challenge::default();
        for part in split_params(params) {
            if let Some((key, value)) = part.split_once('=') {
                let value = value.trim().trim_matches('"').to_string();
                match key.trim().to_ascii_lowercase().as_str() {
                    "realm" => challenge.realm = value,
                    "nonce" => challenge.nonce = value,
                    "qop" => challenge.qop = Some(value),
                    "opaque" => challenge.opaque = Some(value),
                    _ => {}
                }
            }
        }

        if challenge.nonce.is_empty() {
            None
        } else {
            Some(challenge)
        }
    }

    fn request_uri(request: &Request) -> String {
        match url::Url::parse(&request.full_url()) {
            Ok(url) => match url.query() {
                Some(q) => format!("{}?{}", url.path(), q),
                None => url.path().to_string(),
            },
            Err(_) => "/".to_string(),
        }
    }

    /// Compute the `Authorization` header for a request under a challenge
    fn authorization(&self, challenge: &Challenge, nc: u32, method: &str, uri: &str) -> String {
        let nc = format!("{:08x}", nc);

        // HA1 = MD5(username:realm:password)
        let ha1_input = format!("{}:{}:{}", self.username, challenge.realm, self.password);
        let ha1 = format!("{:x}", md5::compute(ha1_input.as_bytes()));

        // HA2 = MD5(method:uri)
        let ha2_input = format!("{}:{}", method, uri);
        let ha2 = format!("{:x}", md5::compute(ha2_input.as_bytes()));

        let response_input = if challenge.qop.is_some() {
            format!("{}:{}:{}:{}:auth:{}", ha1, challenge.nonce, nc, self.cnonce, ha2)
        } else {
            format!("{}:{}:{}", ha1, challenge.nonce, ha2)
        };
        let response = format!("{:x}", md5::compute(response_input.as_bytes()));

        let mut auth = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}""#,
            self.username, challenge.realm, challenge.nonce, uri, response
        );
        if challenge.qop.is_some() {
            auth.push_str(&format!(r#", qop=auth, nc={}, cnonce="{}""#, nc, self.cnonce));
        }
        if let Some(opaque) = &challenge.opaque {
            auth.push_str(&format!(r#", opaque="{}""#, opaque));
        }
        auth
    }

    fn sign(&self, request: &mut Request, challenge: &Challenge, nc: u32) {
        let uri = Self::request_uri(request);
        let header = self.authorization(challenge, nc, request.method.as_str(), &uri);
        request.set_header("Authorization", header);
    }
}

/// Split `a="x, y", b=z` on commas outside quotes
fn split_params(params: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in params.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(params[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

impl AuthHandle for DigestAuth {
    fn name(&self) -> &'static str {
        "Digest-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        let mut state = self.state.lock();
        if let Some(challenge) = state.challenge.clone() {
            state.nc += 1;
            let nc = state.nc;
            drop(state);
            self.sign(request, &challenge, nc);
        }
        Ok(())
    }

    fn on_challenge(
        &self,
        request: &Request,
        response: &Response,
    ) -> Result<Option<Request>, AuthError> {
        if response.status != 401 {
            return Ok(None);
        }
        let Some(challenge) = response.header("www-authenticate").and_then(Self::parse_challenge)
        else {
            return Ok(None);
        };

        let nc = {
            let mut state = self.state.lock();
            state.challenge = Some(challenge.clone());
            state.nc = 1;
            state.nc
        };
        tracing::debug!(realm = %challenge.realm, "Answering digest challenge");

        let mut retry = request.clone();
        self.sign(&mut retry, &challenge, nc);
        Ok(Some(retry))
    }
}

//! AWS Signature Version 4 request signing

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{AuthHandle, AwsCredentials};
use crate::error::AuthError;
use crate::http::Request;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-content-sha256;x-amz-date";

/// Signs every request with the current time
#[derive(Debug)]
pub struct Aws4Auth {
    credentials: AwsCredentials,
}

impl Aws4Auth {
    pub fn new(credentials: AwsCredentials) -> Result<Self, AuthError> {
        for (field, value) in [
            ("access_id", &credentials.access_id),
            ("secret_key", &credentials.secret_key),
            ("region", &credentials.region),
            ("service", &credentials.service),
        ] {
            if value.is_empty() {
                return Err(AuthError::InvalidCredentials {
                    mode: "AWS4-auth".into(),
                    reason: format!("'{}' must not be empty", field),
                });
            }
        }
        Ok(Self { credentials })
    }

    /// Sign a request as of `now`
    pub fn sign_at(&self, request: &mut Request, now: DateTime<Utc>) -> Result<(), AuthError> {
        let url = url::Url::parse(&request.full_url())
            .map_err(|e| AuthError::Signing(format!("cannot parse url: {}", e)))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(AuthError::Signing("url has no host".into())),
        };

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let payload_hash = hex::encode(Sha256::digest(
            request.body.as_deref().unwrap_or("").as_bytes(),
        ));

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
            request.method.as_str(),
            canonical_uri(&url),
            canonical_query(&url),
            host,
            payload_hash,
            amz_date,
            SIGNED_HEADERS,
            payload_hash,
        );

        let scope = format!(
            "{}/{}/{}/aws4_request",
            date, self.credentials.region, self.credentials.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = self.signing_key(&date)?;
        let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

        request.set_header("x-amz-date", amz_date);
        request.set_header("x-amz-content-sha256", payload_hash);
        request.set_header(
            "Authorization",
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.credentials.access_id, scope, SIGNED_HEADERS, signature
            ),
        );
        Ok(())
    }

    fn signing_key(&self, date: &str) -> Result<Vec<u8>, AuthError> {
        let secret = format!("AWS4{}", self.credentials.secret_key);
        let k_date = hmac(secret.as_bytes(), date.as_bytes())?;
        let k_region = hmac(&k_date, self.credentials.region.as_bytes())?;
        let k_service = hmac(&k_region, self.credentials.service.as_bytes())?;
        hmac(&k_service, b"aws4_request")
    }
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| AuthError::Signing(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn canonical_uri(url: &url::Url) -> String {
    match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    }
}

fn canonical_query(url: &url::Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (urlencoding::encode(&k).into_owned(), urlencoding::encode(&v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

impl AuthHandle for Aws4Auth {
    fn name(&self) -> &'static str {
        "AWS4-auth"
    }

    fn apply(&self, request: &mut Request) -> Result<(), AuthError> {
        self.sign_at(request, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use chrono::TimeZone;

    fn example() -> Aws4Auth {
        Aws4Auth::new(AwsCredentials {
            access_id: "AKIDEXAMPLE".into(),
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            region: "us-east-1".into(),
            service: "service".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_signing_key_derivation() {
        let key = example().signing_key("20150830").unwrap();
        assert_eq!(
            hex::encode(key),
            "938127b5336810ddb6a5d6af445fcac9e371f9ed418ed386b022aed82901be75"
        );
    }

    #[test]
    fn test_sign_sets_headers() {
        let mut req = Request::new(HttpMethod::Get, "https://example.amazonaws.com/?b=2&a=1");
        let now = Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap();
        example().sign_at(&mut req, now).unwrap();

        assert_eq!(req.header("x-amz-date"), Some("20150830T123600Z"));
        assert_eq!(
            req.header("x-amz-content-sha256"),
            Some("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
        let auth = req.header("authorization").unwrap();
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/service/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
    }

    #[test]
    fn test_canonical_query_sorted_and_encoded() {
        let url = url::Url::parse("https://h/p?z=1&a=b%20c&a=a").unwrap();
        assert_eq!(canonical_query(&url), "a=a&a=b%20c&z=1");
    }

    #[test]
    fn test_empty_credentials_rejected() {
        assert!(Aws4Auth::new(AwsCredentials {
            access_id: String::new(),
            secret_key: "k".into(),
            region: "r".into(),
            service: "s".into(),
        })
        .is_err());
    }
}

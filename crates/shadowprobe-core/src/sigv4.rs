//! AWS Signature Version 4 request signing.
//!
//! Only the parts needed for the IoT data-plane `GetThingShadow` call are
//! covered: header-based signing of requests with a hashed payload. The
//! algorithm:
//!
//! 1. Build the canonical request (method, URI, query, headers, payload hash)
//! 2. Hash it into the string to sign together with the credential scope
//! 3. Derive the signing key: `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")`
//! 4. `Authorization: AWS4-HMAC-SHA256 Credential=..., SignedHeaders=..., Signature=...`

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Hex SHA-256 of the empty payload.
pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// AWS access credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key id (`AKIA...`).
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    pub session_token: Option<String>,
}

impl Credentials {
    /// Creates long-lived credentials.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Resolves credentials through `lookup` (normally `std::env::var`).
    ///
    /// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` win over the unprefixed
    /// `ACCESS_KEY_ID`/`SECRET_ACCESS_KEY`. `AWS_SESSION_TOKEN` is optional.
    /// Returns the name of the first missing variable on failure.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |primary: &str, fallback: &str| {
            lookup(primary)
                .or_else(|| lookup(fallback))
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| primary.to_string())
        };
        let access_key_id = pick("AWS_ACCESS_KEY_ID", "ACCESS_KEY_ID")?;
        let secret_access_key = pick("AWS_SECRET_ACCESS_KEY", "SECRET_ACCESS_KEY")?;
        let session_token = lookup("AWS_SESSION_TOKEN").filter(|v| !v.trim().is_empty());
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }

    /// Resolves credentials from the process environment.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The request parts covered by the signature.
#[derive(Debug, Clone)]
pub struct RequestParts<'a> {
    /// HTTP method, upper case.
    pub method: &'a str,
    /// Absolute path, not yet URI-encoded. The canonical form encodes it twice.
    pub path: &'a str,
    /// Query parameters, not yet URI-encoded.
    pub query: &'a [(String, String)],
    /// Headers to sign. Must include `host` and `x-amz-date`.
    pub headers: &'a [(String, String)],
    /// Hex SHA-256 of the request body.
    pub payload_sha256: &'a str,
}

/// Output of [`sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Value for the `Authorization` header.
    pub authorization: String,
    /// Hex signature.
    pub signature: String,
    /// `;`-joined lower-case signed header names.
    pub signed_headers: String,
}

/// Formats `time` as an `x-amz-date` value (`20150830T123600Z`).
pub fn amz_date(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// URI-encodes per SigV4: unreserved characters pass, everything else is `%XX`.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// URI-encodes an absolute path, keeping `/` separators.
pub fn encode_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        uri_encode(path, false)
    }
}

/// Encodes and sorts query parameters into `k=v&k=v` form.
pub fn canonical_query(query: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonical URI of `path`: the request path as sent (already encoded once)
/// encoded a second time, as every service except S3 expects.
pub fn canonical_path(path: &str) -> String {
    uri_encode(&encode_path(path), false)
}

/// Builds the canonical request string and the signed header list.
pub fn canonical_request(parts: &RequestParts<'_>) -> (String, String) {
    let path = canonical_path(parts.path);
    let query = canonical_query(parts.query);

    let mut headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .map(|(k, v)| {
            let value = v.split_whitespace().collect::<Vec<_>>().join(" ");
            (k.to_ascii_lowercase(), value)
        })
        .collect();
    headers.sort();
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        parts.method, path, query, canonical_headers, signed_headers, parts.payload_sha256
    );
    (request, signed_headers)
}

/// Derives the per-day signing key.
pub fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

/// Signs a request at `time` for `region`/`service`.
pub fn sign(
    parts: &RequestParts<'_>,
    credentials: &Credentials,
    region: &str,
    service: &str,
    time: &DateTime<Utc>,
) -> Signature {
    let amz = amz_date(time);
    let date = time.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date, region, service);

    let (canonical, signed_headers) = canonical_request(parts);
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz,
        scope,
        sha256_hex(canonical.as_bytes())
    );

    let key = signing_key(&credentials.secret_access_key, &date, region, service);
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, scope, signed_headers, signature
    );

    Signature {
        authorization,
        signature,
        signed_headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // Reference values from the published SigV4 examples (IAM ListUsers).
    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY";

    fn example_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 8, 30, 12, 36, 0).unwrap()
    }

    fn example_parts() -> (Vec<(String, String)>, Vec<(String, String)>) {
        let query = vec![
            ("Version".to_string(), "2010-05-08".to_string()),
            ("Action".to_string(), "ListUsers".to_string()),
        ];
        let headers = vec![
            (
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded; charset=utf-8".to_string(),
            ),
            ("Host".to_string(), "iam.amazonaws.com".to_string()),
            ("X-Amz-Date".to_string(), "20150830T123600Z".to_string()),
        ];
        (query, headers)
    }

    #[test]
    fn empty_payload_hash() {
        assert_eq!(sha256_hex(b""), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn canonical_request_matches_reference() {
        let (query, headers) = example_parts();
        let parts = RequestParts {
            method: "GET",
            path: "/",
            query: &query,
            headers: &headers,
            payload_sha256: EMPTY_PAYLOAD_SHA256,
        };
        let (canonical, signed) = canonical_request(&parts);
        assert_eq!(signed, "content-type;host;x-amz-date");
        assert_eq!(
            sha256_hex(canonical.as_bytes()),
            "f536975d06c0309214f805bb90ccff089219ecd68b2577efef23edd43b7e1a59"
        );
    }

    #[test]
    fn signing_key_matches_reference() {
        let key = signing_key(SECRET, "20150830", "us-east-1", "iam");
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn signature_matches_reference() {
        let (query, headers) = example_parts();
        let parts = RequestParts {
            method: "GET",
            path: "/",
            query: &query,
            headers: &headers,
            payload_sha256: EMPTY_PAYLOAD_SHA256,
        };
        let creds = Credentials::new("AKIDEXAMPLE", SECRET);
        let sig = sign(&parts, &creds, "us-east-1", "iam", &example_time());
        assert_eq!(
            sig.signature,
            "5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
        assert_eq!(
            sig.authorization,
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20150830/us-east-1/iam/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date, \
             Signature=5d672d79c15b13162d9279b0855cfba6789a8edb4c82c400e06b5924a6f2b5d7"
        );
    }

    #[test]
    fn uri_encoding() {
        assert_eq!(uri_encode("/things/Temp Sensor/shadow", false), "/things/Temp%20Sensor/shadow");
        assert_eq!(uri_encode("a/b", true), "a%2Fb");
        assert_eq!(uri_encode("~._-", true), "~._-");
    }

    #[test]
    fn canonical_path_is_double_encoded() {
        assert_eq!(canonical_path("/"), "/");
        assert_eq!(
            canonical_path("/things/TemperatureSensor/shadow"),
            "/things/TemperatureSensor/shadow"
        );
        assert_eq!(
            canonical_path("/things/Lab:Sensor/shadow"),
            "/things/Lab%253ASensor/shadow"
        );
        assert_eq!(encode_path("/things/Lab:Sensor/shadow"), "/things/Lab%3ASensor/shadow");
    }

    #[test]
    fn canonical_request_carries_double_encoded_path() {
        let headers = vec![
            ("host".to_string(), "data-ats.iot.us-east-1.amazonaws.com".to_string()),
            ("x-amz-date".to_string(), "20150830T123600Z".to_string()),
        ];
        let parts = RequestParts {
            method: "GET",
            path: "/things/Lab:Sensor/shadow",
            query: &[],
            headers: &headers,
            payload_sha256: EMPTY_PAYLOAD_SHA256,
        };
        let (canonical, _) = canonical_request(&parts);
        assert_eq!(canonical.lines().nth(1), Some("/things/Lab%253ASensor/shadow"));
    }

    #[test]
    fn credentials_prefer_aws_prefixed_names() {
        let env = |name: &str| match name {
            "AWS_ACCESS_KEY_ID" => Some("AKIA1".to_string()),
            "ACCESS_KEY_ID" => Some("AKIA2".to_string()),
            "SECRET_ACCESS_KEY" => Some("s3cr3t".to_string()),
            _ => None,
        };
        let creds = Credentials::from_lookup(env).unwrap();
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(creds.secret_access_key, "s3cr3t");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn credentials_missing_secret_named() {
        let env = |name: &str| (name == "AWS_ACCESS_KEY_ID").then(|| "AKIA".to_string());
        assert_eq!(
            Credentials::from_lookup(env).unwrap_err(),
            "AWS_SECRET_ACCESS_KEY"
        );
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = Credentials::new("AKIA", "topsecret");
        let dbg = format!("{:?}", creds);
        assert!(dbg.contains("AKIA"));
        assert!(!dbg.contains("topsecret"));
    }
}

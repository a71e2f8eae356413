//! AWS IoT data-plane shadow client.
//!
//! Implements [`ShadowStore`] with a signed `GET /things/{thing}/shadow`
//! against the account's IoT data endpoint. Credentials come from the
//! environment; see [`Credentials::from_lookup`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tracing::{debug, debug_span, Instrument};

use crate::config::ShadowConfig;
use crate::shadow::{ShadowDocument, ShadowError, ShadowStore};
use crate::sigv4::{self, Credentials, RequestParts, EMPTY_PAYLOAD_SHA256};

/// SigV4 service name for the IoT data plane.
const SERVICE: &str = "iotdata";

/// Connect timeout for the HTTP client. The overall query bound is applied by
/// the harness.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// [`ShadowStore`] backed by the AWS IoT data plane.
#[derive(Debug, Clone)]
pub struct AwsIotShadowClient {
    http: reqwest::Client,
    base_url: String,
    host: String,
    region: String,
    shadow_name: Option<String>,
    credentials: Credentials,
}

impl AwsIotShadowClient {
    /// Builds a client for `config` using credentials from the environment.
    pub fn from_env(config: &ShadowConfig) -> Result<Self, ShadowError> {
        let credentials = Credentials::from_env().map_err(|var| {
            ShadowError::Config(format!("environment variable {} is not set", var))
        })?;
        Self::new(config, credentials)
    }

    /// Builds a client for `config` with explicit credentials.
    pub fn new(config: &ShadowConfig, credentials: Credentials) -> Result<Self, ShadowError> {
        let base_url = config.base_url();
        Self::new_with_base_url(config, credentials, base_url)
    }

    /// Builds a client against an arbitrary base URL (`http://127.0.0.1:8080`).
    pub fn new_with_base_url(
        config: &ShadowConfig,
        credentials: Credentials,
        base_url: String,
    ) -> Result<Self, ShadowError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let host = host_of(&base_url)
            .ok_or_else(|| ShadowError::Config(format!("invalid endpoint '{}'", base_url)))?;
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ShadowError::Config(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            host,
            region: config.region.clone(),
            shadow_name: config.shadow_name.clone(),
            credentials,
        })
    }

    /// The base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn query(&self) -> Vec<(String, String)> {
        self.shadow_name
            .iter()
            .map(|name| ("name".to_string(), name.clone()))
            .collect()
    }
}

/// Extracts `host[:port]` from `scheme://host[:port][/...]`.
fn host_of(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let host = rest.split('/').next()?;
    (!host.is_empty()).then(|| host.to_string())
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[async_trait]
impl ShadowStore for AwsIotShadowClient {
    async fn get_shadow(&self, device_id: &str) -> Result<ShadowDocument, ShadowError> {
        let span = debug_span!("get_shadow", device_id);
        async {
            let path = format!("/things/{}/shadow", device_id);
            let query = self.query();
            let now = Utc::now();
            let amz_date = sigv4::amz_date(&now);

            let mut headers = vec![
                ("host".to_string(), self.host.clone()),
                ("x-amz-content-sha256".to_string(), EMPTY_PAYLOAD_SHA256.to_string()),
                ("x-amz-date".to_string(), amz_date.clone()),
            ];
            if let Some(token) = &self.credentials.session_token {
                headers.push(("x-amz-security-token".to_string(), token.clone()));
            }

            let parts = RequestParts {
                method: "GET",
                path: &path,
                query: &query,
                headers: &headers,
                payload_sha256: EMPTY_PAYLOAD_SHA256,
            };
            let signature = sigv4::sign(&parts, &self.credentials, &self.region, SERVICE, &now);

            let mut url = format!("{}{}", self.base_url, sigv4::encode_path(&path));
            let query_string = sigv4::canonical_query(&query);
            if !query_string.is_empty() {
                url.push('?');
                url.push_str(&query_string);
            }

            let mut request = self
                .http
                .get(&url)
                .header("x-amz-date", &amz_date)
                .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
                .header("authorization", &signature.authorization);
            if let Some(token) = &self.credentials.session_token {
                request = request.header("x-amz-security-token", token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ShadowError::Transport(e.to_string()))?;
            let status = response.status();
            let body = response
                .bytes()
                .await
                .map_err(|e| ShadowError::Transport(e.to_string()))?;
            debug!(status = status.as_u16(), bytes = body.len(), "shadow response");

            match status {
                s if s.is_success() => ShadowDocument::from_slice(&body),
                StatusCode::NOT_FOUND => Err(ShadowError::NotFound(device_id.to_string())),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ShadowError::Unauthorized(
                    truncate(&String::from_utf8_lossy(&body)),
                )),
                s => Err(ShadowError::Http {
                    status: s.as_u16(),
                    body: truncate(&String::from_utf8_lossy(&body)),
                }),
            }
        }
        .instrument(span)
        .await
    }
}

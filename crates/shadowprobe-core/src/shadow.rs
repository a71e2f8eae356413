//! Device shadow documents and the state-store trait.
//!
//! A device shadow is a cloud-held JSON document describing the desired and
//! reported state of a device:
//!
//! ```json
//! {
//!   "state": {
//!     "desired":  { "temprature": 25 },
//!     "reported": { "temprature": 24 }
//!   },
//!   "version": 17,
//!   "timestamp": 1700000000
//! }
//! ```
//!
//! The harness only reads shadows. [`ShadowStore`] is the read seam;
//! [`AwsIotShadowClient`](crate::aws::AwsIotShadowClient) is the production
//! backend and [`StaticShadowStore`] an in-memory one.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors returned by a [`ShadowStore`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShadowError {
    /// No shadow exists for the requested device.
    #[error("no shadow for device '{0}'")]
    NotFound(String),

    /// The store rejected the credentials or signature.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The store answered with an unexpected HTTP status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// The request never completed (DNS, TLS, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The response was not a shadow document.
    #[error("malformed shadow document: {0}")]
    Malformed(String),

    /// The query did not complete in time.
    #[error("shadow query timed out")]
    Timeout,

    /// Client configuration is unusable (missing credentials, bad endpoint).
    #[error("client configuration error: {0}")]
    Config(String),
}

/// Errors extracting a value from a [`ShadowDocument`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    /// Nothing exists at the path.
    #[error("field '{0}' is absent")]
    Missing(FieldPath),

    /// The value at the path is not a finite number or numeric string.
    #[error("field '{path}' is not numeric (found {found})")]
    NotNumeric {
        /// The path looked up.
        path: FieldPath,
        /// The JSON found at the path.
        found: String,
    },
}

/// A dotted path into a JSON document, e.g. `state.desired.temprature`.
///
/// Segments that parse as unsigned integers index into arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Path of a field inside `state.desired`.
    pub fn desired(field: &str) -> Self {
        Self {
            segments: vec!["state".into(), "desired".into(), field.to_string()],
        }
    }

    /// Path of a field inside `state.reported`.
    pub fn reported(field: &str) -> Self {
        Self {
            segments: vec!["state".into(), "reported".into(), field.to_string()],
        }
    }

    /// The path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |node, seg| match node {
            Value::Object(map) => map.get(seg),
            Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl FromStr for FieldPath {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if s.trim().is_empty() || segments.iter().any(|seg| seg.is_empty()) {
            return Err(format!("invalid field path '{}'", s));
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Read-only projection of a device shadow.
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowDocument {
    raw: Value,
}

impl ShadowDocument {
    /// Wraps a JSON value, requiring a top-level `state` object.
    pub fn from_value(raw: Value) -> Result<Self, ShadowError> {
        match raw.get("state") {
            Some(Value::Object(_)) => Ok(Self { raw }),
            Some(other) => Err(ShadowError::Malformed(format!(
                "'state' is not an object: {}",
                other
            ))),
            None => Err(ShadowError::Malformed("missing 'state'".to_string())),
        }
    }

    /// Parses a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, ShadowError> {
        let raw: Value =
            serde_json::from_slice(body).map_err(|e| ShadowError::Malformed(e.to_string()))?;
        Self::from_value(raw)
    }

    /// The `state.desired` section, if present.
    pub fn desired(&self) -> Option<&Value> {
        self.raw.get("state").and_then(|s| s.get("desired"))
    }

    /// The `state.reported` section, if present.
    pub fn reported(&self) -> Option<&Value> {
        self.raw.get("state").and_then(|s| s.get("reported"))
    }

    /// Shadow document version, if present.
    pub fn version(&self) -> Option<u64> {
        self.raw.get("version").and_then(Value::as_u64)
    }

    /// The whole document.
    pub fn as_value(&self) -> &Value {
        &self.raw
    }

    /// Looks up a value by path.
    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        path.resolve(&self.raw)
    }

    /// Looks up a value by path and parses it as a number.
    ///
    /// JSON numbers and strings holding a number (`"25"`, `" 25.5 "`) are
    /// accepted. Booleans, null, objects, arrays, and non-finite values are
    /// rejected; absence is never defaulted.
    pub fn numeric_field(&self, path: &FieldPath) -> Result<f64, FieldError> {
        self.numeric_field_as(path, ValueConversion::Float)
    }

    /// Looks up a value by path and converts it with `conversion`.
    pub fn numeric_field_as(
        &self,
        path: &FieldPath,
        conversion: ValueConversion,
    ) -> Result<f64, FieldError> {
        let value = self
            .field(path)
            .ok_or_else(|| FieldError::Missing(path.clone()))?;
        conversion
            .convert(value)
            .ok_or_else(|| FieldError::NotNumeric {
                path: path.clone(),
                found: value.to_string(),
            })
    }
}

/// How an observed JSON value becomes a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueConversion {
    /// Whole numbers. Fractional JSON numbers truncate toward zero
    /// (`40.6` reads as `40`); strings must hold an integer (`"25"`, not
    /// `"25.0"`).
    #[default]
    Integer,
    /// Full precision. Strings may hold any finite decimal.
    Float,
}

impl ValueConversion {
    /// Converts `value`, or `None` if it is not acceptable as a number.
    pub fn convert(self, value: &Value) -> Option<f64> {
        let number = match (self, value) {
            (Self::Integer, Value::Number(n)) => n.as_f64().map(f64::trunc),
            (Self::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(|n| n as f64),
            (Self::Float, Value::Number(n)) => n.as_f64(),
            (Self::Float, Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        number.filter(|n| n.is_finite())
    }
}

/// Trait for stores holding device shadows.
#[async_trait]
pub trait ShadowStore: Send + Sync {
    /// Fetches the current shadow document for `device_id`.
    ///
    /// A device with no shadow is [`ShadowError::NotFound`], never an empty document.
    async fn get_shadow(&self, device_id: &str) -> Result<ShadowDocument, ShadowError>;
}

/// An in-memory [`ShadowStore`].
///
/// Useful for dry runs and tests. A failure can be injected with
/// [`fail_with`](Self::fail_with); every query then returns it.
#[derive(Debug, Default)]
pub struct StaticShadowStore {
    shadows: RwLock<HashMap<String, ShadowDocument>>,
    failure: RwLock<Option<ShadowError>>,
}

impl StaticShadowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the shadow for `device_id`.
    pub async fn insert(&self, device_id: impl Into<String>, document: ShadowDocument) {
        self.shadows.write().await.insert(device_id.into(), document);
    }

    /// Makes every subsequent query fail with `error` (or succeed again with `None`).
    pub async fn fail_with(&self, error: Option<ShadowError>) {
        *self.failure.write().await = error;
    }
}

#[async_trait]
impl ShadowStore for StaticShadowStore {
    async fn get_shadow(&self, device_id: &str) -> Result<ShadowDocument, ShadowError> {
        if let Some(err) = self.failure.read().await.clone() {
            return Err(err);
        }
        self.shadows
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| ShadowError::NotFound(device_id.to_string()))
    }
}

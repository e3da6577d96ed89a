//! Remote sync endpoint client.
//!
//! The endpoint speaks two verbs: `GET <endpoint>?key=<syncKey>` returns the
//! shared snapshot, either bare or wrapped as `{ ok, data }`, and
//! `POST <endpoint>` stores a merged snapshot.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::models::{Entity, SettingsField, Snapshot};
use crate::util::{compact_text, normalize_endpoint, normalize_text_option};

/// Header carrying the sync key
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid sync configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Sync HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Sync API error: {0}")]
    Api(String),
    #[error("Sync endpoint rejected the request: {0}")]
    Rejected(String),
    #[error("Invalid sync payload: {0}")]
    InvalidPayload(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Where and how to reach the remote store
#[derive(Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl std::fmt::Debug for SyncTarget {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncTarget")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SyncTarget {
    pub fn new(endpoint: &str, api_key: Option<String>) -> TransportResult<Self> {
        let endpoint = normalize_endpoint(endpoint).map_err(TransportError::InvalidConfiguration)?;
        Ok(Self {
            endpoint,
            api_key: normalize_text_option(api_key),
        })
    }

    /// Resolve the target from the device-local settings fields.
    ///
    /// `None` when no endpoint is configured or it is not an http(s) URL.
    pub fn from_settings(settings: Option<&Entity>) -> Option<Self> {
        let settings = settings?;
        let endpoint = settings.str_field(SettingsField::SyncEndpoint.as_str())?;
        if endpoint.trim().is_empty() {
            return None;
        }
        let api_key = settings
            .str_field(SettingsField::SyncKey.as_str())
            .map(str::to_string);
        match Self::new(endpoint, api_key) {
            Ok(target) => Some(target),
            Err(error) => {
                tracing::debug!("Ignoring sync endpoint: {error}");
                None
            }
        }
    }
}

/// Remote store operations used by the sync engine
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Fetch the remote snapshot. An envelope with `data: null` is an empty
    /// (but present) remote.
    async fn fetch(&self, target: &SyncTarget) -> TransportResult<Snapshot>;

    /// Store a merged snapshot remotely
    async fn push(&self, target: &SyncTarget, snapshot: &Snapshot) -> TransportResult<()>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    async fn fetch(&self, target: &SyncTarget) -> TransportResult<Snapshot> {
        (**self).fetch(target).await
    }

    async fn push(&self, target: &SyncTarget, snapshot: &Snapshot) -> TransportResult<()> {
        (**self).push(target, snapshot).await
    }
}

/// `reqwest`-based transport
#[derive(Clone)]
pub struct HttpSyncTransport {
    client: reqwest::Client,
}

impl HttpSyncTransport {
    /// Build a client. Without `timeout` the transport default applies.
    pub fn new(timeout: Option<Duration>) -> TransportResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn fetch(&self, target: &SyncTarget) -> TransportResult<Snapshot> {
        let mut request = self
            .client
            .get(&target.endpoint)
            .header(ACCEPT, "application/json");
        if let Some(api_key) = &target.api_key {
            request = request
                .query(&[("key", api_key.as_str())])
                .header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Api(parse_api_error(status, &body)));
        }
        parse_remote_payload(&body)
    }

    async fn push(&self, target: &SyncTarget, snapshot: &Snapshot) -> TransportResult<()> {
        let mut request = self
            .client
            .post(&target.endpoint)
            .header(ACCEPT, "application/json")
            .json(snapshot);
        if let Some(api_key) = &target.api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(TransportError::Api(parse_api_error(status, &body)));
        }
        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&body) {
            if object.get("ok").and_then(Value::as_bool) == Some(false) {
                return Err(TransportError::Rejected(envelope_message(&object)));
            }
        }
        Ok(())
    }
}

/// Decode a GET response body into a snapshot.
///
/// Accepts `{ ok, data }` envelopes and bare snapshots. `ok: false` and
/// anything that is not a JSON object are errors.
pub fn parse_remote_payload(body: &str) -> TransportResult<Snapshot> {
    let value: Value = serde_json::from_str(body)
        .map_err(|error| TransportError::InvalidPayload(format!("invalid JSON: {error}")))?;
    let Value::Object(mut object) = value else {
        return Err(TransportError::InvalidPayload(
            "expected a JSON object".to_string(),
        ));
    };

    if !object.contains_key("ok") && !object.contains_key("data") {
        return decode_snapshot(Value::Object(object));
    }
    if object.get("ok").and_then(Value::as_bool) == Some(false) {
        return Err(TransportError::Rejected(envelope_message(&object)));
    }
    match object.remove("data") {
        None | Some(Value::Null) => Ok(Snapshot::default()),
        Some(data @ Value::Object(_)) => decode_snapshot(data),
        Some(_) => Err(TransportError::InvalidPayload(
            "envelope data is not an object".to_string(),
        )),
    }
}

fn decode_snapshot(value: Value) -> TransportResult<Snapshot> {
    serde_json::from_value(value)
        .map_err(|error| TransportError::InvalidPayload(format!("invalid snapshot: {error}")))
}

fn envelope_message(object: &Map<String, Value>) -> String {
    object
        .get("message")
        .or_else(|| object.get("error"))
        .and_then(Value::as_str)
        .map_or_else(|| "ok: false".to_string(), compact_text)
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

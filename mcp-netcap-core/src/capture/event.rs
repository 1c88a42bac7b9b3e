//! Protocol-event envelopes and the typed events the correlator understands.
//!
//! Everything that crosses this boundary is validated here. Payloads that are
//! not JSON, carry an unknown method, or do not have the expected params shape
//! become [`NetworkEvent::Ignored`]; nothing in this module returns an error.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One raw entry pulled from a [`LogSource`](super::source::LogSource).
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Source-assigned timestamp, used only to order a batch.
    pub timestamp: f64,
    /// Serialized protocol message.
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: f64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// A header value as delivered by the browser: usually a string, sometimes a
/// list when the header was repeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

pub type Headers = BTreeMap<String, HeaderValue>;

impl From<Value> for HeaderValue {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) => HeaderValue::Single(s),
            Value::Array(items) => {
                HeaderValue::Multiple(items.into_iter().map(scalar_to_string).collect())
            }
            other => HeaderValue::Single(scalar_to_string(other)),
        }
    }
}

impl<'de> Deserialize<'de> for HeaderValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(HeaderValue::from)
    }
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub post_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    #[serde(default)]
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// `Network.requestWillBeSent`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSent {
    pub request_id: String,
    pub request: RequestPayload,
    /// Epoch seconds.
    #[serde(default)]
    pub wall_time: Option<f64>,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    /// Present when this request is the next hop of a redirect; describes the
    /// response of the previous hop under the same request id.
    #[serde(default)]
    pub redirect_response: Option<ResponsePayload>,
}

/// `Network.responseReceived`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: String,
    pub response: ResponsePayload,
}

/// `Network.loadingFinished`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: String,
    #[serde(default)]
    pub encoded_data_length: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    RequestSent(RequestSent),
    ResponseReceived(ResponseReceived),
    LoadingFinished(LoadingFinished),
    Ignored,
}

impl NetworkEvent {
    /// Parse a serialized envelope. Accepts both the performance-log shape
    /// `{"message": {"method", "params"}}` and a bare `{"method", "params"}`.
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                tracing::trace!(error = %e, "Dropping unparseable protocol event");
                Self::Ignored
            }
        }
    }

    pub fn from_value(mut value: Value) -> Self {
        if value.get("message").is_some_and(Value::is_object) {
            value = value["message"].take();
        }

        let method = match value.get("method").and_then(Value::as_str) {
            Some(m) => m.to_string(),
            None => return Self::Ignored,
        };
        let params = value
            .get_mut("params")
            .map(Value::take)
            .unwrap_or(Value::Null);

        let parsed = match method.as_str() {
            "Network.requestWillBeSent" => serde_json::from_value(params).map(Self::RequestSent),
            "Network.responseReceived" => {
                serde_json::from_value(params).map(Self::ResponseReceived)
            }
            "Network.loadingFinished" => serde_json::from_value(params).map(Self::LoadingFinished),
            _ => return Self::Ignored,
        };

        parsed.unwrap_or_else(|e| {
            tracing::trace!(method = %method, error = %e, "Dropping protocol event with unexpected params");
            Self::Ignored
        })
    }

    pub fn correlation_key(&self) -> Option<&str> {
        match self {
            NetworkEvent::RequestSent(e) => Some(&e.request_id),
            NetworkEvent::ResponseReceived(e) => Some(&e.request_id),
            NetworkEvent::LoadingFinished(e) => Some(&e.request_id),
            NetworkEvent::Ignored => None,
        }
    }
}

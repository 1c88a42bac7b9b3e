//! Captured request/response records and the index that summarises them.

use super::event::{Headers, ResponsePayload};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One observed request, plus its response once one arrives.
///
/// This is also the on-disk shape of `request_<uniqueId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRecord {
    pub unique_id: String,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    /// Side file holding the request body, when one was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body_ref: Option<PathBuf>,
    /// ISO-8601, UTC.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Headers>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body_ref: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

impl CaptureRecord {
    pub fn new(url: impl Into<String>, method: impl Into<String>, timestamp: String) -> Self {
        Self {
            unique_id: generate_unique_id(),
            url: url.into(),
            method: method.into(),
            headers: Headers::new(),
            request_body_ref: None,
            timestamp,
            resource_type: None,
            response_status: None,
            response_status_text: None,
            response_headers: None,
            response_body_ref: None,
            mime_type: None,
            size_bytes: None,
        }
    }

    /// Overwrite the response fields. Earlier response data for the same
    /// record is replaced, not accumulated.
    pub fn apply_response(&mut self, response: &ResponsePayload) {
        self.response_status = Some(response.status);
        self.response_status_text = Some(response.status_text.clone());
        self.response_headers = Some(response.headers.clone());
        self.mime_type = response.mime_type.clone();
        self.response_body_ref = None;
    }

    pub fn is_pending(&self) -> bool {
        self.response_status.is_none()
    }
}

/// On-disk shape of `response_<uniqueId>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub unique_id: String,
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// When the response event was processed, ISO-8601 UTC.
    pub received_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_ref: Option<PathBuf>,
    #[serde(default)]
    pub base64_encoded: bool,
    /// Why the body could not be retrieved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_error: Option<String>,
}

impl ResponseRecord {
    pub fn from_payload(unique_id: &str, response: &ResponsePayload) -> Self {
        Self {
            unique_id: unique_id.to_string(),
            url: response.url.clone(),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            mime_type: response.mime_type.clone(),
            received_at: now_iso(),
            body_ref: None,
            base64_encoded: false,
            body_error: None,
        }
    }
}

/// One line of `index.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub unique_id: String,
    pub timestamp: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
    #[serde(default, rename = "size")]
    pub size_bytes: Option<u64>,
    #[serde(default, rename = "requestFilepath")]
    pub request_file: Option<PathBuf>,
    #[serde(default, rename = "responseFilepath")]
    pub response_file: Option<PathBuf>,
    #[serde(
        default,
        rename = "requestBodyFilepath",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_body_file: Option<PathBuf>,
    #[serde(
        default,
        rename = "responseBodyFilepath",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_body_file: Option<PathBuf>,
}

impl IndexEntry {
    pub fn for_record(
        record: &CaptureRecord,
        request_file: Option<PathBuf>,
        response_file: Option<PathBuf>,
    ) -> Self {
        Self {
            unique_id: record.unique_id.clone(),
            timestamp: record.timestamp.clone(),
            url: record.url.clone(),
            method: record.method.clone(),
            status: record.response_status,
            mime_type: record.mime_type.clone(),
            size_bytes: record.size_bytes,
            request_file,
            response_file,
            request_body_file: record.request_body_ref.clone(),
            response_body_file: record.response_body_ref.clone(),
        }
    }

    /// Fold a newer snapshot of the same record into this entry.
    ///
    /// Record-derived fields are replaced outright, so a cleared response
    /// body or status stays cleared. The two JSON file paths are only
    /// replaced when the newer snapshot has one; a failed rewrite leaves the
    /// previous file in place.
    pub fn merge(&mut self, newer: IndexEntry) {
        self.timestamp = newer.timestamp;
        self.url = newer.url;
        self.method = newer.method;
        self.status = newer.status;
        self.mime_type = newer.mime_type;
        self.size_bytes = newer.size_bytes;
        self.request_body_file = newer.request_body_file;
        self.response_body_file = newer.response_body_file;
        self.request_file = newer.request_file.or(self.request_file.take());
        self.response_file = newer.response_file.or(self.response_file.take());
    }
}

/// Top-level `index.json` structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureIndex {
    #[serde(default)]
    pub requests: Vec<IndexEntry>,
}

impl CaptureIndex {
    /// Insert or merge by `unique_id`. Existing entries keep their position.
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self
            .requests
            .iter_mut()
            .find(|e| e.unique_id == entry.unique_id)
        {
            Some(existing) => existing.merge(entry),
            None => self.requests.push(entry),
        }
    }

    pub fn get(&self, unique_id: &str) -> Option<&IndexEntry> {
        self.requests.iter().find(|e| e.unique_id == unique_id)
    }
}

/// Millisecond timestamp plus a random suffix, e.g. `1700000000123-9f2c4e1a`.
pub fn generate_unique_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..8])
}

/// Convert the browser's epoch-seconds wall time to ISO-8601. Falls back to
/// the current time when the source did not report one.
pub fn iso_from_wall_time(wall_time: Option<f64>) -> String {
    wall_time
        .and_then(|secs| DateTime::<Utc>::from_timestamp_millis((secs * 1000.0) as i64))
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn entry(id: &str, status: Option<u16>) -> IndexEntry {
        IndexEntry {
            unique_id: id.to_string(),
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            url: format!("https://example.com/{}", id),
            method: "GET".to_string(),
            status,
            mime_type: None,
            size_bytes: None,
            request_file: Some(PathBuf::from(format!("request_{}.json", id))),
            response_file: None,
            request_body_file: None,
            response_body_file: None,
        }
    }

    #[test]
    fn test_iso_from_wall_time() {
        assert_eq!(
            iso_from_wall_time(Some(1_700_000_000.5)),
            "2023-11-14T22:13:20.500Z"
        );
    }

    #[test]
    fn test_iso_from_missing_wall_time_uses_now() {
        let iso = iso_from_wall_time(None);
        assert!(DateTime::parse_from_rfc3339(&iso).is_ok());
    }

    #[test]
    fn test_unique_ids_do_not_collide() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_unique_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_upsert_appends_then_merges_in_place() {
        let mut index = CaptureIndex::default();
        index.upsert(entry("a", None));
        index.upsert(entry("b", None));

        let mut update = entry("a", Some(200));
        update.request_file = None;
        update.response_file = Some(PathBuf::from("response_a.json"));
        index.upsert(update);

        assert_eq!(index.requests.len(), 2);
        assert_eq!(index.requests[0].unique_id, "a");
        assert_eq!(index.requests[0].status, Some(200));
        // Known paths survive a snapshot that lacks them
        assert_eq!(
            index.requests[0].request_file,
            Some(PathBuf::from("request_a.json"))
        );
        assert_eq!(
            index.requests[0].response_file,
            Some(PathBuf::from("response_a.json"))
        );
    }

    #[test]
    fn test_merge_clears_replaced_response_fields() {
        let mut index = CaptureIndex::default();
        let mut first = entry("a", Some(500));
        first.mime_type = Some("text/plain".into());
        first.response_body_file = Some(PathBuf::from("response_body_a.txt"));
        index.upsert(first);

        let mut replaced = entry("a", Some(200));
        replaced.mime_type = None;
        replaced.response_body_file = None;
        index.upsert(replaced);

        let merged = index.get("a").unwrap();
        assert_eq!(merged.status, Some(200));
        assert_eq!(merged.mime_type, None);
        assert_eq!(merged.response_body_file, None);
    }

    #[test]
    fn test_index_json_field_names() {
        let mut e = entry("x", Some(404));
        e.mime_type = Some("text/html".into());
        e.size_bytes = Some(10);
        let value = serde_json::to_value(CaptureIndex { requests: vec![e] }).unwrap();
        let line = &value["requests"][0];
        assert_eq!(line["uniqueId"], "x");
        assert_eq!(line["status"], 404);
        assert_eq!(line["type"], "text/html");
        assert_eq!(line["size"], 10);
        assert_eq!(line["requestFilepath"], "request_x.json");
        assert!(line.get("requestBodyFilepath").is_none());
    }
}

//! Read side: structured filtering over in-memory records and text search
//! over the files persisted for a session.

use super::error::CaptureError;
use super::record::{CaptureRecord, IndexEntry};
use super::store::load_index;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Structured filter. Every field is optional; an empty filter matches all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestFilter {
    pub url_contains: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
}

impl RequestFilter {
    pub fn by_url(fragment: impl Into<String>) -> Self {
        Self {
            url_contains: Some(fragment.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &CaptureRecord) -> bool {
        self.url_contains
            .as_deref()
            .map_or(true, |f| record.url.contains(f))
            && method_matches(self.method.as_deref(), &record.method)
            && self.status.map_or(true, |s| record.response_status == Some(s))
    }
}

fn method_matches(wanted: Option<&str>, actual: &str) -> bool {
    wanted.map_or(true, |m| m.eq_ignore_ascii_case(actual))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSummary {
    pub unique_id: String,
    pub timestamp: String,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    /// No response has been seen yet.
    pub pending: bool,
}

impl From<&CaptureRecord> for RequestSummary {
    fn from(r: &CaptureRecord) -> Self {
        Self {
            unique_id: r.unique_id.clone(),
            timestamp: r.timestamp.clone(),
            method: r.method.clone(),
            url: r.url.clone(),
            status: r.response_status,
            mime_type: r.mime_type.clone(),
            size: r.size_bytes,
            pending: r.is_pending(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterReport {
    pub total_requests: usize,
    pub matched_requests: usize,
    pub requests: Vec<RequestSummary>,
}

/// Filter a snapshot of captured records. Pending records are included.
pub fn filter_records(records: &[CaptureRecord], filter: &RequestFilter) -> FilterReport {
    let requests: Vec<RequestSummary> = records
        .iter()
        .filter(|r| filter.matches(r))
        .map(RequestSummary::from)
        .collect();
    FilterReport {
        total_requests: records.len(),
        matched_requests: requests.len(),
        requests,
    }
}

/// Text search over persisted request/response files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub pattern: String,
    /// Treat `pattern` as a regular expression instead of a
    /// case-insensitive literal.
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub context_lines: usize,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
}

impl SearchQuery {
    pub fn literal(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            regex: false,
            context_lines: 0,
            method: None,
            status: None,
        }
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            regex: true,
            ..Self::literal(pattern)
        }
    }

    /// Build the line matcher. Invalid regular expressions are rejected here,
    /// before any file is touched.
    pub fn compile(&self) -> Result<Regex, CaptureError> {
        if self.regex {
            Ok(Regex::new(&self.pattern)?)
        } else {
            Ok(RegexBuilder::new(&regex::escape(&self.pattern))
                .case_insensitive(true)
                .build()?)
        }
    }

    fn accepts(&self, entry: &IndexEntry) -> bool {
        method_matches(self.method.as_deref(), &entry.method)
            && self.status.map_or(true, |s| entry.status == Some(s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMatch {
    pub line_number: usize,
    pub line: String,
    /// Surrounding lines prefixed with their line number; the matched line
    /// is marked with `>`.
    pub context: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMatches {
    pub kind: &'static str,
    pub path: PathBuf,
    pub matches: Vec<LineMatch>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub unique_id: String,
    pub url: String,
    pub method: String,
    pub timestamp: String,
    pub status: Option<u16>,
    pub files: Vec<FileMatches>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchReport {
    pub pattern: String,
    pub files_scanned: usize,
    pub total_matches: usize,
    pub results: Vec<SearchHit>,
    /// Files listed in the index that could not be read.
    pub skipped_files: Vec<String>,
}

/// Search every record listed in `dir/index.json`.
pub async fn search_logs(dir: &Path, query: &SearchQuery) -> Result<SearchReport, CaptureError> {
    let matcher = query.compile()?;
    let index = load_index(dir).await;

    let mut report = SearchReport {
        pattern: query.pattern.clone(),
        files_scanned: 0,
        total_matches: 0,
        results: Vec::new(),
        skipped_files: Vec::new(),
    };

    for entry in index.requests.iter().filter(|e| query.accepts(e)) {
        let candidates = [
            ("request", &entry.request_file),
            ("request_body", &entry.request_body_file),
            ("response", &entry.response_file),
            ("response_body", &entry.response_body_file),
        ];

        let mut files = Vec::new();
        for (kind, path) in candidates {
            let Some(path) = path.as_deref() else {
                continue;
            };
            // Binary bodies are not line-searchable.
            if path.extension().is_some_and(|ext| ext == "bin") {
                continue;
            }
            let path = resolve_path(dir, path);
            let contents = match tokio::fs::read_to_string(&path).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable capture file");
                    report.skipped_files.push(path.display().to_string());
                    continue;
                }
            };
            report.files_scanned += 1;

            let matches = match_lines(&contents, &matcher, query.context_lines);
            if !matches.is_empty() {
                report.total_matches += matches.len();
                files.push(FileMatches {
                    kind,
                    path,
                    matches,
                });
            }
        }

        if !files.is_empty() {
            report.results.push(SearchHit {
                unique_id: entry.unique_id.clone(),
                url: entry.url.clone(),
                method: entry.method.clone(),
                timestamp: entry.timestamp.clone(),
                status: entry.status,
                files,
            });
        }
    }

    Ok(report)
}

/// Every line matching `matcher`, with `context` lines either side.
pub fn match_lines(contents: &str, matcher: &Regex, context: usize) -> Vec<LineMatch> {
    let lines: Vec<&str> = contents.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| matcher.is_match(line))
        .map(|(i, line)| {
            let start = i.saturating_sub(context);
            let end = i.saturating_add(context).saturating_add(1).min(lines.len());
            let context = (start..end)
                .map(|j| {
                    let marker = if j == i { '>' } else { ' ' };
                    format!("{} {}: {}", marker, j + 1, lines[j])
                })
                .collect();
            LineMatch {
                line_number: i + 1,
                line: line.to_string(),
                context,
            }
        })
        .collect()
}

/// Paths in the index are absolute when written; fall back to the file name
/// inside `dir` so a moved log directory is still searchable.
fn resolve_path(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() && path.exists() {
        return path.to_path_buf();
    }
    match path.file_name() {
        Some(name) => dir.join(name),
        None => path.to_path_buf(),
    }
}

/// Full request and response data for one record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    pub unique_id: String,
    pub request: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub request_body: Option<String>,
    /// Text bodies only; binary bodies are referenced from `response`.
    pub response_body: Option<String>,
}

pub async fn request_details(dir: &Path, unique_id: &str) -> Result<RequestDetails, CaptureError> {
    let index = load_index(dir).await;
    let entry = index
        .get(unique_id)
        .ok_or_else(|| CaptureError::RecordNotFound(unique_id.to_string()))?;

    let request_path = match &entry.request_file {
        Some(p) => resolve_path(dir, p),
        None => dir.join(format!("request_{}.json", unique_id)),
    };
    let request = read_json(&request_path).await?;

    let response = match &entry.response_file {
        Some(p) => read_json(&resolve_path(dir, p)).await.ok(),
        None => None,
    };

    Ok(RequestDetails {
        unique_id: unique_id.to_string(),
        request,
        response,
        request_body: read_text(dir, entry.request_body_file.as_deref()).await,
        response_body: read_text(dir, entry.response_body_file.as_deref()).await,
    })
}

async fn read_json(path: &Path) -> Result<serde_json::Value, CaptureError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CaptureError::io(path, e))?;
    serde_json::from_str(&contents).map_err(|source| CaptureError::Json {
        path: path.to_path_buf(),
        source,
    })
}

async fn read_text(dir: &Path, path: Option<&Path>) -> Option<String> {
    let path = resolve_path(dir, path?);
    tokio::fs::read_to_string(path).await.ok()
}

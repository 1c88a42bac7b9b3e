//! File-per-entry persistence for one capture session.
//!
//! Layout inside the session directory:
//!
//! ```text
//! index.json
//! request_<uniqueId>.json
//! request_body_<uniqueId>.txt
//! response_<uniqueId>.json
//! response_body_<uniqueId>.{txt,bin}
//! ```
//!
//! Write failures are logged and reported as `None`/`false`; in-memory state
//! stays authoritative and capture keeps going.

use super::error::CaptureError;
use super::record::{CaptureIndex, CaptureRecord, IndexEntry, ResponseRecord};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Request,
    Response,
}

impl BodyKind {
    fn prefix(self) -> &'static str {
        match self {
            BodyKind::Request => "request_body",
            BodyKind::Response => "response_body",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Create the session directory (recursive, idempotent).
    pub async fn ensure_dir(&self) -> Result<(), CaptureError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CaptureError::io(&self.dir, e))
    }

    /// Write (or rewrite) `request_<uniqueId>.json`.
    pub async fn save_request(&self, record: &CaptureRecord) -> Option<PathBuf> {
        let path = self.dir.join(format!("request_{}.json", record.unique_id));
        self.write_logged(&path, record).await
    }

    pub async fn save_response(&self, response: &ResponseRecord) -> Option<PathBuf> {
        let path = self.dir.join(format!("response_{}.json", response.unique_id));
        self.write_logged(&path, response).await
    }

    /// Write a raw body side file. `binary` selects the `.bin` extension.
    pub async fn save_body(
        &self,
        kind: BodyKind,
        unique_id: &str,
        bytes: &[u8],
        binary: bool,
    ) -> Option<PathBuf> {
        let ext = if binary { "bin" } else { "txt" };
        let path = self
            .dir
            .join(format!("{}_{}.{}", kind.prefix(), unique_id, ext));
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write body file");
                None
            }
        }
    }

    /// Delete a side file that no longer belongs to any record.
    pub async fn discard(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove stale body file")
            }
        }
    }

    /// Whether this directory already holds a session index.
    pub async fn has_index(&self) -> bool {
        tokio::fs::metadata(self.index_path()).await.is_ok()
    }

    /// Upsert one entry into `index.json` and rewrite it whole.
    ///
    /// A missing or corrupt index is treated as empty.
    pub async fn update_index(&self, entry: IndexEntry) -> bool {
        let mut index = load_index(&self.dir).await;
        index.upsert(entry);
        self.write_logged(&self.index_path(), &index).await.is_some()
    }

    /// Remove the whole session directory. Never fails the caller.
    pub async fn cleanup(&self) {
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => tracing::info!(dir = %self.dir.display(), "Removed network log directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to remove network log directory")
            }
        }
    }

    async fn write_logged<T: Serialize>(&self, path: &Path, value: &T) -> Option<PathBuf> {
        match write_json_atomic(path, value).await {
            Ok(()) => Some(path.to_path_buf()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist capture file");
                None
            }
        }
    }
}

/// Read `index.json` from a log directory, treating any failure as empty.
pub async fn load_index(dir: &Path) -> CaptureIndex {
    let path = dir.join(INDEX_FILE);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(c) => c,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Index unreadable, starting fresh");
            }
            return CaptureIndex::default();
        }
    };
    serde_json::from_str(&contents).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), error = %e, "Index unparseable, starting fresh");
        CaptureIndex::default()
    })
}

/// Serialize fully, write to a sibling temp file, then rename over the target.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let contents = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &contents)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move {} into place", tmp.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (LogStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = LogStore::new(tmp.path().join("session"));
        (store, tmp)
    }

    fn record(url: &str) -> CaptureRecord {
        CaptureRecord::new(url, "GET", "2024-01-01T00:00:00.000Z".to_string())
    }

    #[tokio::test]
    async fn test_save_request_writes_named_file() {
        let (store, _tmp) = test_store();
        store.ensure_dir().await.unwrap();

        let rec = record("https://example.com/");
        let path = store.save_request(&rec).await.unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("request_{}.json", rec.unique_id)
        );
        let saved: CaptureRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved, rec);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_failure_returns_none() {
        let (store, _tmp) = test_store();
        // Directory never created
        assert!(store.save_request(&record("https://a/")).await.is_none());
        assert!(!store.update_index(IndexEntry::for_record(&record("https://a/"), None, None)).await);
    }

    #[tokio::test]
    async fn test_update_index_upserts_without_duplicates() {
        let (store, _tmp) = test_store();
        store.ensure_dir().await.unwrap();

        let mut rec = record("https://example.com/a");
        let other = record("https://example.com/b");
        assert!(store.update_index(IndexEntry::for_record(&rec, None, None)).await);
        assert!(store.update_index(IndexEntry::for_record(&other, None, None)).await);

        rec.response_status = Some(201);
        assert!(store.update_index(IndexEntry::for_record(&rec, None, None)).await);

        let index = load_index(store.dir()).await;
        assert_eq!(index.requests.len(), 2);
        assert_eq!(index.requests[0].unique_id, rec.unique_id);
        assert_eq!(index.requests[0].status, Some(201));
    }

    #[tokio::test]
    async fn test_corrupt_index_is_replaced() {
        let (store, _tmp) = test_store();
        store.ensure_dir().await.unwrap();
        std::fs::write(store.index_path(), "{ truncated").unwrap();

        assert!(load_index(store.dir()).await.requests.is_empty());

        let rec = record("https://example.com/");
        assert!(store.update_index(IndexEntry::for_record(&rec, None, None)).await);
        let index = load_index(store.dir()).await;
        assert_eq!(index.requests.len(), 1);
    }

    #[tokio::test]
    async fn test_save_body_extension() {
        let (store, _tmp) = test_store();
        store.ensure_dir().await.unwrap();

        let text = store
            .save_body(BodyKind::Request, "id1", b"a=1", false)
            .await
            .unwrap();
        let bin = store
            .save_body(BodyKind::Response, "id1", &[0, 1, 2], true)
            .await
            .unwrap();

        assert!(text.ends_with("request_body_id1.txt"));
        assert!(bin.ends_with("response_body_id1.bin"));
        assert_eq!(std::fs::read(bin).unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_discard_and_has_index() {
        let (store, _tmp) = test_store();
        store.ensure_dir().await.unwrap();
        assert!(!store.has_index().await);

        let body = store
            .save_body(BodyKind::Response, "id2", b"old", false)
            .await
            .unwrap();
        store.discard(&body).await;
        assert!(!body.exists());
        // Already gone
        store.discard(&body).await;

        assert!(store.update_index(IndexEntry::for_record(&record("https://a/"), None, None)).await);
        assert!(store.has_index().await);
    }

    #[tokio::test]
    async fn test_cleanup_removes_directory_and_tolerates_missing() {
        let (store, _tmp) = test_store();
        store.ensure_dir().await.unwrap();
        store.save_request(&record("https://a/")).await.unwrap();

        store.cleanup().await;
        assert!(!store.dir().exists());

        // Second cleanup is a quiet no-op
        store.cleanup().await;
    }
}

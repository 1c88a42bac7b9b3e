//! Turns the unordered protocol-event stream into request/response records.
//!
//! State is keyed by the browser's request id (the correlation key). Every
//! request-sent creates a fresh record with its own `unique_id`, so a reused
//! request id (redirect hops, cache revalidation) never overwrites an earlier
//! record; the key simply moves to the newest one.
//!
//! The source may split a request and its response across two polls. A
//! response or loading-finished whose key is unknown is held back for one
//! more batch before it is dropped.

use super::event::{LoadingFinished, LogEntry, NetworkEvent, RequestSent, ResponseReceived};
use super::record::{iso_from_wall_time, CaptureRecord, IndexEntry, ResponseRecord};
use super::source::BodyFetcher;
use super::store::{BodyKind, LogStore};
use base64::Engine;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

struct Tracked {
    record: CaptureRecord,
    request_file: Option<PathBuf>,
    response_file: Option<PathBuf>,
}

pub struct Correlator {
    store: LogStore,
    bodies: Arc<dyn BodyFetcher>,
    fetch_bodies: bool,
    entries: Vec<Tracked>,
    by_key: HashMap<String, usize>,
    deferred: Vec<LogEntry>,
}

impl Correlator {
    pub fn new(store: LogStore, bodies: Arc<dyn BodyFetcher>, fetch_bodies: bool) -> Self {
        Self {
            store,
            bodies,
            fetch_bodies,
            entries: Vec::new(),
            by_key: HashMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn store(&self) -> &LogStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point-in-time copy of every record, in observation order.
    pub fn records(&self) -> Vec<CaptureRecord> {
        self.entries.iter().map(|t| t.record.clone()).collect()
    }

    /// Process one polled batch together with anything held back from the
    /// previous one. Returns how many events were applied.
    pub async fn ingest(&mut self, batch: Vec<LogEntry>) -> usize {
        let mut pending: Vec<(LogEntry, bool)> = std::mem::take(&mut self.deferred)
            .into_iter()
            .map(|entry| (entry, true))
            .chain(batch.into_iter().map(|entry| (entry, false)))
            .collect();
        // Stable: equal timestamps keep delivery order.
        pending.sort_by(|a, b| a.0.timestamp.total_cmp(&b.0.timestamp));

        let mut applied = 0;
        for (entry, retried) in pending {
            let event = NetworkEvent::parse(&entry.message);
            if self.awaits_request(&event) {
                if retried {
                    tracing::trace!(
                        request_id = event.correlation_key().unwrap_or_default(),
                        "Dropping event for unknown request"
                    );
                } else {
                    self.deferred.push(entry);
                }
                continue;
            }
            if self.handle(event).await {
                applied += 1;
            }
        }
        applied
    }

    /// Response-side event whose request has not been seen yet.
    fn awaits_request(&self, event: &NetworkEvent) -> bool {
        match event {
            NetworkEvent::ResponseReceived(_) | NetworkEvent::LoadingFinished(_) => event
                .correlation_key()
                .is_some_and(|key| !self.by_key.contains_key(key)),
            NetworkEvent::RequestSent(_) | NetworkEvent::Ignored => false,
        }
    }

    /// Apply a single event. `false` means it was ignored or dropped.
    pub async fn handle(&mut self, event: NetworkEvent) -> bool {
        match event {
            NetworkEvent::RequestSent(e) => {
                self.on_request_sent(e).await;
                true
            }
            NetworkEvent::ResponseReceived(e) => self.on_response_received(e).await,
            NetworkEvent::LoadingFinished(e) => self.on_loading_finished(e).await,
            NetworkEvent::Ignored => false,
        }
    }

    async fn on_request_sent(&mut self, event: RequestSent) {
        // The previous hop of a redirect gets its response from this event.
        if let Some(redirect) = &event.redirect_response {
            if let Some(&idx) = self.by_key.get(&event.request_id) {
                self.entries[idx].record.apply_response(redirect);
                let response = ResponseRecord::from_payload(&self.entries[idx].record.unique_id, redirect);
                self.persist_response(idx, response).await;
            }
        }

        let mut record = CaptureRecord::new(
            event.request.url,
            event.request.method,
            iso_from_wall_time(event.wall_time),
        );
        record.headers = event.request.headers;
        record.resource_type = event.resource_type;

        if let Some(body) = event.request.post_data.filter(|b| !b.is_empty()) {
            record.request_body_ref = self
                .store
                .save_body(BodyKind::Request, &record.unique_id, body.as_bytes(), false)
                .await;
        }

        let request_file = self.store.save_request(&record).await;
        self.store
            .update_index(IndexEntry::for_record(&record, request_file.clone(), None))
            .await;

        tracing::debug!(
            unique_id = %record.unique_id,
            request_id = %event.request_id,
            method = %record.method,
            url = %record.url,
            "Captured request"
        );

        self.entries.push(Tracked {
            record,
            request_file,
            response_file: None,
        });
        self.by_key.insert(event.request_id, self.entries.len() - 1);
    }

    async fn on_response_received(&mut self, event: ResponseReceived) -> bool {
        let Some(&idx) = self.by_key.get(&event.request_id) else {
            tracing::trace!(request_id = %event.request_id, "Dropping response for unknown request");
            return false;
        };

        let tracked = &mut self.entries[idx];
        let previous_body = tracked.record.response_body_ref.clone();
        tracked.record.apply_response(&event.response);
        let mut response = ResponseRecord::from_payload(&tracked.record.unique_id, &event.response);

        if self.fetch_bodies {
            fetch_response_body(
                &self.store,
                self.bodies.as_ref(),
                &event.request_id,
                &mut tracked.record,
                &mut response,
            )
            .await;
        }

        // A replaced response must not leave its old body searchable.
        if let Some(stale) = previous_body {
            if tracked.record.response_body_ref.as_ref() != Some(&stale) {
                self.store.discard(&stale).await;
            }
        }

        self.persist_response(idx, response).await;
        true
    }

    async fn on_loading_finished(&mut self, event: LoadingFinished) -> bool {
        let Some(&idx) = self.by_key.get(&event.request_id) else {
            return false;
        };

        if let Some(length) = event.encoded_data_length {
            let tracked = &mut self.entries[idx];
            tracked.record.size_bytes = Some(length.max(0.0) as u64);
            if let Some(path) = self.store.save_request(&tracked.record).await {
                tracked.request_file = Some(path);
            }
            self.store
                .update_index(IndexEntry::for_record(
                    &tracked.record,
                    tracked.request_file.clone(),
                    tracked.response_file.clone(),
                ))
                .await;
        }
        true
    }

    /// Write the response file, refresh the request file, upsert the index.
    async fn persist_response(&mut self, idx: usize, response: ResponseRecord) {
        let tracked = &mut self.entries[idx];
        if let Some(path) = self.store.save_response(&response).await {
            tracked.response_file = Some(path);
        }
        if let Some(path) = self.store.save_request(&tracked.record).await {
            tracked.request_file = Some(path);
        }
        self.store
            .update_index(IndexEntry::for_record(
                &tracked.record,
                tracked.request_file.clone(),
                tracked.response_file.clone(),
            ))
            .await;

        tracing::debug!(
            unique_id = %tracked.record.unique_id,
            status = response.status,
            "Captured response"
        );
    }
}

async fn fetch_response_body(
    store: &LogStore,
    bodies: &dyn BodyFetcher,
    correlation_key: &str,
    record: &mut CaptureRecord,
    response: &mut ResponseRecord,
) {
    let body = match bodies.fetch_body(correlation_key).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(request_id = %correlation_key, error = %e, "Response body unavailable");
            response.body_error = Some(e.to_string());
            return;
        }
    };

    let (bytes, binary) = if body.base64_encoded {
        match base64::engine::general_purpose::STANDARD.decode(body.body.as_bytes()) {
            Ok(bytes) => (bytes, true),
            Err(e) => {
                response.body_error = Some(format!("invalid base64 body: {}", e));
                return;
            }
        }
    } else {
        (body.body.into_bytes(), false)
    };

    if bytes.is_empty() {
        return;
    }

    if let Some(path) = store
        .save_body(BodyKind::Response, &record.unique_id, &bytes, binary)
        .await
    {
        response.body_ref = Some(path.clone());
        response.base64_encoded = binary;
        record.response_body_ref = Some(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::CaptureIndex;
    use crate::capture::source::ResponseBody;
    use crate::capture::store::load_index;
    use async_trait::async_trait;
    use serde_json::json;

    /// Serves bodies from a fixed map; unknown keys fail like evicted bodies do.
    struct StaticBodies(HashMap<String, ResponseBody>);

    #[async_trait]
    impl BodyFetcher for StaticBodies {
        async fn fetch_body(&self, key: &str) -> anyhow::Result<ResponseBody> {
            self.0
                .get(key)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("No resource with given identifier found"))
        }
    }

    fn test_correlator(
        bodies: Vec<(&str, ResponseBody)>,
    ) -> (Correlator, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = LogStore::new(tmp.path().to_path_buf());
        let bodies = bodies
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        (
            Correlator::new(store, Arc::new(StaticBodies(bodies)), true),
            tmp,
        )
    }

    fn request_sent(id: &str, url: &str) -> LogEntry {
        LogEntry::new(
            1.0,
            json!({"message": {"method": "Network.requestWillBeSent", "params": {
                "requestId": id,
                "wallTime": 1700000000.0,
                "request": {"url": url, "method": "GET", "headers": {"Accept": "*/*"}}
            }}})
            .to_string(),
        )
    }

    fn response_received(id: &str, status: u16, mime: &str) -> LogEntry {
        LogEntry::new(
            2.0,
            json!({"message": {"method": "Network.responseReceived", "params": {
                "requestId": id,
                "response": {"url": "https://example.com/", "status": status, "statusText": "", "mimeType": mime, "headers": {}}
            }}})
            .to_string(),
        )
    }

    fn loading_finished(id: &str, size: u64) -> LogEntry {
        LogEntry::new(
            3.0,
            json!({"method": "Network.loadingFinished", "params": {"requestId": id, "encodedDataLength": size}})
                .to_string(),
        )
    }

    async fn index_of(c: &Correlator) -> CaptureIndex {
        load_index(c.store().dir()).await
    }

    #[tokio::test]
    async fn test_request_then_response() {
        let (mut c, tmp) =
            test_correlator(vec![("17.1", ResponseBody::text("<html>hello</html>"))]);

        c.ingest(vec![request_sent("17.1", "https://example.com/")]).await;
        assert_eq!(c.len(), 1);
        let id = c.records()[0].unique_id.clone();
        assert!(tmp.path().join(format!("request_{}.json", id)).exists());

        c.ingest(vec![response_received("17.1", 200, "text/html")]).await;
        let rec = &c.records()[0];
        assert_eq!(rec.unique_id, id);
        assert_eq!(rec.response_status, Some(200));
        assert_eq!(rec.mime_type.as_deref(), Some("text/html"));

        let response_path = tmp.path().join(format!("response_{}.json", id));
        let response: ResponseRecord =
            serde_json::from_str(&std::fs::read_to_string(&response_path).unwrap()).unwrap();
        let body_path = response.body_ref.unwrap();
        assert_eq!(std::fs::read_to_string(body_path).unwrap(), "<html>hello</html>");

        let index = index_of(&c).await;
        assert_eq!(index.requests.len(), 1);
        assert_eq!(index.requests[0].status, Some(200));
        assert_eq!(index.requests[0].response_file, Some(response_path));
    }

    #[tokio::test]
    async fn test_response_for_unknown_key_is_dropped() {
        let (mut c, tmp) = test_correlator(vec![]);

        let applied = c.ingest(vec![response_received("99.9", 200, "text/html")]).await;
        assert_eq!(applied, 0);
        // Held for one more poll, then dropped
        assert_eq!(c.ingest(vec![]).await, 0);
        c.ingest(vec![request_sent("99.9", "https://example.com/late")]).await;

        assert_eq!(c.len(), 1);
        assert_eq!(c.records()[0].response_status, None);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_response_split_from_request_across_polls() {
        let (mut c, _tmp) = test_correlator(vec![]);

        assert_eq!(c.ingest(vec![response_received("20", 302, "text/html")]).await, 0);
        let applied = c
            .ingest(vec![request_sent("20", "https://example.com/login")])
            .await;

        assert_eq!(applied, 2);
        assert_eq!(c.records()[0].response_status, Some(302));
        assert_eq!(index_of(&c).await.requests[0].status, Some(302));
    }

    #[tokio::test]
    async fn test_malformed_entry_does_not_abort_batch() {
        let (mut c, _tmp) = test_correlator(vec![]);

        let applied = c
            .ingest(vec![
                request_sent("1", "https://example.com/a"),
                LogEntry::new(1.0, "{this is not json"),
                request_sent("2", "https://example.com/b"),
            ])
            .await;

        assert_eq!(applied, 2);
        assert_eq!(c.len(), 2);
        assert_eq!(index_of(&c).await.requests.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_is_ordered_before_correlation() {
        let (mut c, _tmp) = test_correlator(vec![]);

        // Response delivered ahead of its request but with a later timestamp
        c.ingest(vec![
            response_received("5", 204, "text/plain"),
            request_sent("5", "https://example.com/ping"),
        ])
        .await;

        assert_eq!(c.records()[0].response_status, Some(204));
    }

    #[tokio::test]
    async fn test_body_fetch_failure_is_recorded_not_fatal() {
        let (mut c, tmp) = test_correlator(vec![]);

        c.ingest(vec![
            request_sent("7", "https://example.com/img.png"),
            response_received("7", 200, "image/png"),
        ])
        .await;

        let rec = &c.records()[0];
        assert_eq!(rec.response_status, Some(200));
        assert!(rec.response_body_ref.is_none());

        let response: ResponseRecord = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join(format!("response_{}.json", rec.unique_id)))
                .unwrap(),
        )
        .unwrap();
        assert!(response.body_ref.is_none());
        assert!(response.body_error.unwrap().contains("No resource"));
    }

    #[tokio::test]
    async fn test_base64_body_is_decoded_to_bin() {
        let (mut c, _tmp) = test_correlator(vec![(
            "8",
            ResponseBody {
                body: "AAEC".to_string(),
                base64_encoded: true,
            },
        )]);

        c.ingest(vec![
            request_sent("8", "https://example.com/font.woff"),
            response_received("8", 200, "font/woff"),
        ])
        .await;

        let body_path = c.records()[0].response_body_ref.clone().unwrap();
        assert_eq!(body_path.extension().unwrap(), "bin");
        assert_eq!(std::fs::read(body_path).unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_loading_finished_sets_size_everywhere() {
        let (mut c, _tmp) = test_correlator(vec![]);

        c.ingest(vec![
            request_sent("9", "https://example.com/app.js"),
            response_received("9", 200, "application/javascript"),
            loading_finished("9", 4096),
        ])
        .await;

        let rec = &c.records()[0];
        assert_eq!(rec.size_bytes, Some(4096));

        let on_disk: CaptureRecord = serde_json::from_str(
            &std::fs::read_to_string(c.store().dir().join(format!("request_{}.json", rec.unique_id)))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk.size_bytes, Some(4096));

        let index = index_of(&c).await;
        assert_eq!(index.requests[0].size_bytes, Some(4096));
        assert_eq!(index.requests[0].status, Some(200));
        assert!(index.requests[0].response_file.is_some());
    }

    #[tokio::test]
    async fn test_loading_finished_for_unknown_key_is_dropped() {
        let (mut c, _tmp) = test_correlator(vec![]);
        assert_eq!(c.ingest(vec![loading_finished("nope", 1)]).await, 0);
    }

    #[tokio::test]
    async fn test_repeated_response_overwrites() {
        let (mut c, _tmp) = test_correlator(vec![]);

        c.ingest(vec![
            request_sent("10", "https://example.com/"),
            response_received("10", 500, "text/plain"),
            response_received("10", 200, "text/html"),
        ])
        .await;

        assert_eq!(c.len(), 1);
        assert_eq!(c.records()[0].response_status, Some(200));
        assert_eq!(index_of(&c).await.requests[0].status, Some(200));
    }

    /// Serves one body, then fails every later fetch.
    struct OneShotBodies(std::sync::Mutex<Option<ResponseBody>>);

    #[async_trait]
    impl BodyFetcher for OneShotBodies {
        async fn fetch_body(&self, _key: &str) -> anyhow::Result<ResponseBody> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("No data found for resource with given identifier"))
        }
    }

    #[tokio::test]
    async fn test_replaced_response_drops_stale_body() {
        let tmp = tempfile::tempdir().unwrap();
        let bodies = OneShotBodies(std::sync::Mutex::new(Some(ResponseBody::text(
            "upstream exploded",
        ))));
        let mut c = Correlator::new(LogStore::new(tmp.path()), Arc::new(bodies), true);

        c.ingest(vec![
            request_sent("13", "https://example.com/flaky"),
            response_received("13", 500, "text/plain"),
        ])
        .await;
        let first_body = c.records()[0].response_body_ref.clone().unwrap();
        assert!(first_body.exists());

        c.ingest(vec![response_received("13", 200, "text/html")]).await;

        let rec = &c.records()[0];
        assert_eq!(rec.response_status, Some(200));
        assert!(rec.response_body_ref.is_none());
        assert!(!first_body.exists());

        let index = index_of(&c).await;
        assert_eq!(index.requests[0].status, Some(200));
        assert_eq!(index.requests[0].mime_type.as_deref(), Some("text/html"));
        assert!(index.requests[0].response_body_file.is_none());

        let report = crate::capture::query::search_logs(
            tmp.path(),
            &crate::capture::SearchQuery::literal("upstream exploded"),
        )
        .await
        .unwrap();
        assert_eq!(report.total_matches, 0);
    }

    #[tokio::test]
    async fn test_redirect_hop_gets_its_own_record() {
        let (mut c, _tmp) = test_correlator(vec![]);

        let hop = LogEntry::new(
            1.5,
            json!({"method": "Network.requestWillBeSent", "params": {
                "requestId": "11",
                "request": {"url": "https://example.com/new", "method": "GET"},
                "redirectResponse": {"url": "https://example.com/old", "status": 301, "headers": {"Location": "/new"}}
            }})
            .to_string(),
        );

        c.ingest(vec![
            request_sent("11", "https://example.com/old"),
            hop,
            response_received("11", 200, "text/html"),
        ])
        .await;

        let records = c.records();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].unique_id, records[1].unique_id);
        assert_eq!(records[0].response_status, Some(301));
        assert_eq!(records[1].url, "https://example.com/new");
        assert_eq!(records[1].response_status, Some(200));

        let index = index_of(&c).await;
        assert_eq!(index.requests.len(), 2);
        assert_eq!(index.requests[0].status, Some(301));
    }

    #[tokio::test]
    async fn test_post_data_goes_to_side_file() {
        let (mut c, _tmp) = test_correlator(vec![]);

        let post = LogEntry::new(
            1.0,
            json!({"method": "Network.requestWillBeSent", "params": {
                "requestId": "12",
                "request": {"url": "https://example.com/api", "method": "POST", "postData": "{\"q\":1}"}
            }})
            .to_string(),
        );
        c.ingest(vec![post]).await;

        let rec = &c.records()[0];
        let body_path = rec.request_body_ref.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&body_path).unwrap(), "{\"q\":1}");
        assert_eq!(
            index_of(&c).await.requests[0].request_body_file,
            Some(body_path)
        );
    }
}

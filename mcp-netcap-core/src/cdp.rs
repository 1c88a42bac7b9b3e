//! Chrome DevTools Protocol bridge for the capture engine.
//!
//! chromiumoxide pushes events; the engine pulls. [`CdpLogSource`] subscribes
//! to the three `Network` events the correlator understands, serializes each
//! into a performance-log style envelope and buffers it until the next poll.

use crate::capture::{BodyFetcher, LogEntry, LogSource, ResponseBody};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived,
    GetResponseBodyParams, RequestId,
};
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Envelopes kept between polls; the oldest are dropped beyond this.
const MAX_BUFFERED_EVENTS: usize = 10_000;

type Buffer = Arc<Mutex<VecDeque<LogEntry>>>;

pub struct CdpLogSource {
    buffer: Buffer,
    task: JoinHandle<()>,
}

impl CdpLogSource {
    /// Enable the `Network` domain on `page` and start buffering its events.
    pub async fn attach(page: &Page) -> Result<Self> {
        page.execute(EnableParams::default())
            .await
            .context("Failed to enable Network domain")?;

        let requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .context("Failed to subscribe to Network.requestWillBeSent")?
            .map(|e| envelope("Network.requestWillBeSent", &*e));
        let responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to subscribe to Network.responseReceived")?
            .map(|e| envelope("Network.responseReceived", &*e));
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("Failed to subscribe to Network.loadingFinished")?
            .map(|e| envelope("Network.loadingFinished", &*e));

        let buffer: Buffer = Arc::new(Mutex::new(VecDeque::new()));
        let sink = buffer.clone();
        // Interleaving across the three streams is arbitrary; envelopes carry
        // the event timestamp and the correlator reorders (and, across a
        // drain boundary, defers) by it.
        let task = tokio::spawn(async move {
            let mut events = Box::pin(futures::stream::select(
                requests,
                futures::stream::select(responses, finished),
            ));
            while let Some(entry) = events.next().await {
                let Some(entry) = entry else { continue };
                let mut buf = sink.lock().await;
                buf.push_back(entry);
                if buf.len() > MAX_BUFFERED_EVENTS {
                    buf.pop_front();
                }
            }
            tracing::debug!("Network event stream closed");
        });

        Ok(Self { buffer, task })
    }
}

impl Drop for CdpLogSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl LogSource for CdpLogSource {
    async fn fetch_entries(&self) -> Result<Vec<LogEntry>> {
        if self.task.is_finished() {
            anyhow::bail!("Browser event stream is closed");
        }
        let mut buf = self.buffer.lock().await;
        Ok(buf.drain(..).collect())
    }
}

/// Wrap a CDP event as `{"message": {"method", "params"}}`, stamped with the
/// event's monotonic timestamp so batches can be reordered.
fn envelope<T: Serialize>(method: &str, event: &T) -> Option<LogEntry> {
    let params = match serde_json::to_value(event) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(method, error = %e, "Failed to serialize CDP event");
            return None;
        }
    };
    let timestamp = params
        .get("timestamp")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or_default();
    let message = serde_json::json!({ "message": { "method": method, "params": params } });
    Some(LogEntry::new(timestamp, message.to_string()))
}

/// `Network.getResponseBody` against one page.
pub struct CdpBodyFetcher {
    page: Page,
}

impl CdpBodyFetcher {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl BodyFetcher for CdpBodyFetcher {
    async fn fetch_body(&self, correlation_key: &str) -> Result<ResponseBody> {
        let response = self
            .page
            .execute(GetResponseBodyParams::new(RequestId::new(correlation_key)))
            .await
            .with_context(|| format!("getResponseBody failed for {}", correlation_key))?;

        Ok(ResponseBody {
            body: response.result.body.clone(),
            base64_encoded: response.result.base64_encoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::event::NetworkEvent;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trips_through_parser() {
        let params = json!({
            "requestId": "42.7",
            "timestamp": 1234.5,
            "encodedDataLength": 99.0
        });
        let entry = envelope("Network.loadingFinished", &params).unwrap();
        assert_eq!(entry.timestamp, 1234.5);

        match NetworkEvent::parse(&entry.message) {
            NetworkEvent::LoadingFinished(e) => {
                assert_eq!(e.request_id, "42.7");
                assert_eq!(e.encoded_data_length, Some(99.0));
            }
            other => panic!("expected LoadingFinished, got {:?}", other),
        }
    }
}

//! Debug dumper middleware.
//!
//! Persists raw request/response bodies and JSONL stream events under the
//! configured directory, named by request id. Off unless enabled in the
//! config; all file writes serialize through one mutex so concurrent
//! requests never interleave within a file.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde_json::Value;

use super::Middleware;
use crate::{
    messages::unified::UnifiedRequest,
    streams::EventStream,
    transport::{ProviderRequest, ProviderResponse},
};

/// Metadata key the orchestrator stamps the request id under.
pub(crate) const REQUEST_ID_KEY: &str = "request_id";

pub(crate) struct Dumper {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl Dumper {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn request_id(unified: &UnifiedRequest) -> String {
        unified
            .transformer_metadata
            .get(REQUEST_ID_KEY)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string()
    }

    fn write(&self, file_name: &str, bytes: &[u8], append: bool) {
        write_locked(&self.dir, &self.write_lock, file_name, bytes, append);
    }
}

fn write_locked(dir: &std::path::Path, lock: &Mutex<()>, file_name: &str, bytes: &[u8], append: bool) {
    let _guard = match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Err(error) = std::fs::create_dir_all(dir) {
        log::warn!("dumper could not create {}: {error}", dir.display());
        return;
    }

    let path = dir.join(file_name);
    let result = std::fs::OpenOptions::new()
        .create(true)
        .append(append)
        .truncate(!append)
        .write(true)
        .open(&path)
        .and_then(|mut file| file.write_all(bytes));

    if let Err(error) = result {
        log::warn!("dumper write to {} failed: {error}", path.display());
    }
}

impl Middleware for Dumper {
    fn name(&self) -> &'static str {
        "dumper"
    }

    fn on_outbound_raw_request(&self, request: &mut ProviderRequest, unified: &UnifiedRequest) {
        let id = Self::request_id(unified);
        self.write(&format!("{id}-outbound-request.json"), &request.body, false);
    }

    fn on_outbound_raw_response(&self, response: &ProviderResponse, unified: &UnifiedRequest) {
        let id = Self::request_id(unified);
        self.write(&format!("{id}-outbound-response.json"), &response.body, false);
    }

    fn on_outbound_raw_stream(&self, stream: EventStream, unified: &UnifiedRequest) -> EventStream {
        let id = Self::request_id(unified);
        let dir = self.dir.clone();
        let lock = self.write_lock.clone();
        let file_name = format!("{id}-outbound-stream.jsonl");

        stream
            .inspect(move |event| {
                if let Ok(event) = event {
                    let mut line = Vec::with_capacity(event.data.len() + 1);
                    line.extend_from_slice(&event.data);
                    line.push(b'\n');
                    write_locked(&dir, &lock, &file_name, &line, true);
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use futures::executor::block_on;

    use super::*;
    use crate::messages::unified::{ApiFormat, RequestType};
    use crate::transport::StreamEvent;

    fn unified_with_id(id: &str) -> UnifiedRequest {
        let mut request = UnifiedRequest::new(RequestType::Chat, ApiFormat::OpenAiChat, "m");
        request
            .transformer_metadata
            .insert(REQUEST_ID_KEY.to_string(), Value::String(id.to_string()));
        request
    }

    #[test]
    fn dumps_request_body() {
        let dir = tempfile::tempdir().unwrap();
        let dumper = Dumper::new(dir.path().to_path_buf());

        let mut request = ProviderRequest {
            method: http::Method::POST,
            url: "https://example.com".to_string(),
            headers: http::HeaderMap::new(),
            body: b"{\"model\":\"gpt-4\"}".to_vec(),
            stream: false,
        };

        dumper.on_outbound_raw_request(&mut request, &unified_with_id("ar-1"));

        let dumped = std::fs::read_to_string(dir.path().join("ar-1-outbound-request.json")).unwrap();
        assert_eq!(dumped, "{\"model\":\"gpt-4\"}");
    }

    #[test]
    fn dumps_stream_events_as_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let dumper = Dumper::new(dir.path().to_path_buf());

        let events: EventStream = futures::stream::iter(vec![
            Ok(StreamEvent {
                event: None,
                data: Bytes::from_static(b"{\"n\":1}"),
            }),
            Ok(StreamEvent {
                event: None,
                data: Bytes::from_static(b"{\"n\":2}"),
            }),
        ])
        .boxed();

        let wrapped = dumper.on_outbound_raw_stream(events, &unified_with_id("ar-2"));
        let collected: Vec<_> = block_on(wrapped.collect::<Vec<_>>());
        assert_eq!(collected.len(), 2);

        let dumped = std::fs::read_to_string(dir.path().join("ar-2-outbound-stream.jsonl")).unwrap();
        assert_eq!(dumped, "{\"n\":1}\n{\"n\":2}\n");
    }
}

use std::sync::Arc;
use std::time::Duration;

use super::http::{join_url, HttpTransport, DEFAULT_SEND_TIMEOUT};
use super::{EndpointHandler, SendError};
use crate::reading::{MetricDefinition, MetricKind, MetricReading};
use crate::writer::{EncodeScratch, PayloadFraming};
use crate::MetricResult;

/// Ships readings to the DataDog series API as
/// `{"series":[...]}` POSTed to `/api/v1/series`.
///
/// DataDog has no metadata endpoint; definitions are not pushed.
pub struct DataDogHandler {
    transport: HttpTransport,
    series_url: String,
    framing: Arc<DataDogFraming>,
}

impl DataDogHandler {
    /// A handler targeting `base_url`, authenticating with `api_key`,
    /// with the default 10 s timeout.
    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self::with_timeout(base_url, api_key, DEFAULT_SEND_TIMEOUT)
    }

    /// A handler with an explicit per-request timeout.
    #[must_use]
    pub fn with_timeout(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        Self {
            transport: HttpTransport::new(timeout, Vec::new()),
            series_url: format!("{}?api_key={api_key}", join_url(base_url, "/api/v1/series")),
            framing: Arc::new(DataDogFraming),
        }
    }
}

impl EndpointHandler for DataDogHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        self.framing.clone()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        self.transport.post_json(&self.series_url, payload)
    }

    fn serialize_metadata(&mut self, _definitions: &[MetricDefinition]) -> MetricResult<()> {
        Ok(())
    }
}

const fn series_type(kind: MetricKind) -> &'static str {
    match kind {
        MetricKind::Counter | MetricKind::CumulativeCounter => "count",
        MetricKind::Gauge => "gauge",
    }
}

/// `{"series":[{"metric":...,"points":[[s,v]],"type":...,"host":...,
/// "tags":[...]},...]}`. The `host` tag is hoisted into its own field.
pub(crate) struct DataDogFraming;

impl PayloadFraming for DataDogFraming {
    fn open(&self, buf: &mut Vec<u8>, _first: &MetricReading) {
        buf.extend_from_slice(b"{\"series\":[");
    }

    fn encode_reading(
        &self,
        buf: &mut Vec<u8>,
        reading: &MetricReading,
        scratch: &mut EncodeScratch,
    ) -> MetricResult<()> {
        buf.extend_from_slice(b"{\"metric\":");
        serde_json::to_writer(&mut *buf, scratch.wire_name(reading))?;
        buf.extend_from_slice(b",\"points\":[[");
        buf.extend_from_slice(scratch.timestamp_seconds(reading.timestamp).as_bytes());
        buf.push(b',');
        serde_json::to_writer(&mut *buf, &reading.value)?;
        buf.extend_from_slice(b"]],\"type\":\"");
        buf.extend_from_slice(series_type(reading.kind).as_bytes());
        buf.push(b'"');

        // Tag text is restricted to JSON-safe characters at registration,
        // so the k:v strings can be emitted without escaping.
        if let Some((_, host)) = reading.tags.pairs().iter().find(|(key, _)| key == "host") {
            buf.extend_from_slice(b",\"host\":\"");
            buf.extend_from_slice(host.as_bytes());
            buf.push(b'"');
        }
        let mut wrote_tag = false;
        for (key, value) in reading.tags.pairs() {
            if key == "host" {
                continue;
            }
            if wrote_tag {
                buf.extend_from_slice(b",\"");
            } else {
                buf.extend_from_slice(b",\"tags\":[\"");
            }
            buf.extend_from_slice(key.as_bytes());
            buf.push(b':');
            buf.extend_from_slice(value.as_bytes());
            buf.push(b'"');
            wrote_tag = true;
        }
        if wrote_tag {
            buf.push(b']');
        }
        buf.push(b'}');
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b","
    }

    fn close(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"]}");
    }
}

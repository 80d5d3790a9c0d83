use std::sync::Arc;
use std::time::Duration;

use super::http::{join_url, HttpTransport, DEFAULT_SEND_TIMEOUT};
use super::{EndpointHandler, SendError};
use crate::reading::{MetricDefinition, MetricKind, MetricReading};
use crate::writer::{EncodeScratch, PayloadFraming};
use crate::MetricResult;

/// Ships readings to SignalFx as `{"<kind>":[...]}` POSTed to
/// `/v2/datapoint`, authenticated via the `X-SF-TOKEN` header.
///
/// The wire format groups datapoints by kind, so each payload carries a
/// single kind and the framing rotates payloads on kind changes.
/// SignalFx has no metadata endpoint; definitions are not pushed.
pub struct SignalFxHandler {
    transport: HttpTransport,
    datapoint_url: String,
    framing: Arc<SignalFxFraming>,
}

impl SignalFxHandler {
    /// A handler targeting `base_url` with the default 10 s timeout.
    #[must_use]
    pub fn new(base_url: &str, access_token: &str) -> Self {
        Self::with_timeout(base_url, access_token, DEFAULT_SEND_TIMEOUT)
    }

    /// A handler with an explicit per-request timeout.
    #[must_use]
    pub fn with_timeout(base_url: &str, access_token: &str, timeout: Duration) -> Self {
        Self {
            transport: HttpTransport::new(
                timeout,
                vec![("X-SF-TOKEN", access_token.to_owned())],
            ),
            datapoint_url: join_url(base_url, "/v2/datapoint"),
            framing: Arc::new(SignalFxFraming),
        }
    }
}

impl EndpointHandler for SignalFxHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        self.framing.clone()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        self.transport.post_json(&self.datapoint_url, payload)
    }

    fn serialize_metadata(&mut self, _definitions: &[MetricDefinition]) -> MetricResult<()> {
        Ok(())
    }
}

/// `{"gauge":[{"metric":...,"value":...,"timestamp":...,
/// "dimensions":{...}},...]}` with one kind per payload.
pub(crate) struct SignalFxFraming;

impl PayloadFraming for SignalFxFraming {
    fn open(&self, buf: &mut Vec<u8>, first: &MetricReading) {
        buf.extend_from_slice(b"{\"");
        buf.extend_from_slice(first.kind.as_str().as_bytes());
        buf.extend_from_slice(b"\":[");
    }

    fn encode_reading(
        &self,
        buf: &mut Vec<u8>,
        reading: &MetricReading,
        scratch: &mut EncodeScratch,
    ) -> MetricResult<()> {
        buf.extend_from_slice(b"{\"metric\":");
        serde_json::to_writer(&mut *buf, scratch.wire_name(reading))?;
        buf.extend_from_slice(b",\"value\":");
        serde_json::to_writer(&mut *buf, &reading.value)?;
        buf.extend_from_slice(b",\"timestamp\":");
        buf.extend_from_slice(scratch.timestamp_millis(reading.timestamp).as_bytes());
        buf.extend_from_slice(b",\"dimensions\":");
        buf.extend_from_slice(reading.tags.json().as_bytes());
        buf.push(b'}');
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b","
    }

    fn close(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"]}");
    }

    fn batch_key(&self, reading: &MetricReading) -> Option<MetricKind> {
        Some(reading.kind)
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::http::{join_url, HttpTransport, DEFAULT_SEND_TIMEOUT};
use super::{EndpointHandler, SendError};
use crate::reading::{MetricDefinition, MetricReading};
use crate::writer::{EncodeScratch, PayloadFraming};
use crate::{MetricResult, MetricsError};

/// Ships readings to a Bosun server: batches POSTed to `/api/put` as a
/// JSON array, metadata to `/api/metadata/put`.
pub struct BosunHandler {
    transport: HttpTransport,
    put_url: String,
    metadata_url: String,
    framing: Arc<BosunFraming>,
}

impl BosunHandler {
    /// A handler targeting `base_url` with the default 10 s timeout.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, DEFAULT_SEND_TIMEOUT)
    }

    /// A handler targeting `base_url` with an explicit per-request
    /// timeout.
    #[must_use]
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Self {
        Self {
            transport: HttpTransport::new(timeout, Vec::new()),
            put_url: join_url(base_url, "/api/put"),
            metadata_url: join_url(base_url, "/api/metadata/put"),
            framing: Arc::new(BosunFraming),
        }
    }
}

impl EndpointHandler for BosunHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        self.framing.clone()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        self.transport.post_json(&self.put_url, payload)
    }

    fn serialize_metadata(&mut self, definitions: &[MetricDefinition]) -> MetricResult<()> {
        #[derive(Serialize)]
        struct Entry<'a> {
            #[serde(rename = "Metric")]
            metric: &'a str,
            #[serde(rename = "Name")]
            name: &'a str,
            #[serde(rename = "Value")]
            value: &'a str,
        }

        let mut entries = Vec::with_capacity(definitions.len() * 3);
        for def in definitions {
            entries.push(Entry {
                metric: &def.full_name,
                name: "rate",
                value: def.rate_kind.as_str(),
            });
            if !def.unit.is_empty() {
                entries.push(Entry {
                    metric: &def.full_name,
                    name: "unit",
                    value: &def.unit,
                });
            }
            if !def.description.is_empty() {
                entries.push(Entry {
                    metric: &def.full_name,
                    name: "desc",
                    value: &def.description,
                });
            }
        }
        let body = serde_json::to_vec(&entries)?;
        self.transport
            .post_json(&self.metadata_url, &body)
            .map_err(|err| match err {
                SendError::Transient(msg) => MetricsError::TransportTransient(msg),
                SendError::Fatal(msg) => MetricsError::TransportFatal(msg),
            })
    }
}

/// `[{"metric":...,"value":...,"tags":{...},"timestamp":...},...]`
pub(crate) struct BosunFraming;

impl PayloadFraming for BosunFraming {
    fn open(&self, buf: &mut Vec<u8>, _first: &MetricReading) {
        buf.push(b'[');
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
        buf.extend_from_slice(b",\"tags\":");
        buf.extend_from_slice(reading.tags.json().as_bytes());
        buf.extend_from_slice(b",\"timestamp\":");
        buf.extend_from_slice(scratch.timestamp_millis(reading.timestamp).as_bytes());
        buf.push(b'}');
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b","
    }

    fn close(&self, buf: &mut Vec<u8>) {
        buf.push(b']');
    }
}

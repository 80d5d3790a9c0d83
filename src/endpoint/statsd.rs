use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use super::{EndpointHandler, SendError};
use crate::reading::{MetricDefinition, MetricKind, MetricReading};
use crate::writer::{EncodeScratch, PayloadFraming};
use crate::MetricResult;

/// Ships readings as statsd datagrams: newline-terminated
/// `name:value|c|#k:v,k:v` lines, one payload per datagram.
///
/// statsd has no metadata vocabulary; definitions are not pushed.
pub struct StatsdHandler {
    sock: UdpSocket,
    destination: SocketAddr,
    framing: Arc<StatsdFraming>,
}

impl StatsdHandler {
    /// Binds a UDP socket on `bind_addr` and targets `destination`.
    ///
    /// # Errors
    /// Fails when the socket cannot be bound.
    pub fn new(bind_addr: SocketAddr, destination: SocketAddr) -> MetricResult<Self> {
        Ok(Self {
            sock: UdpSocket::bind(bind_addr)?,
            destination,
            framing: Arc::new(StatsdFraming),
        })
    }
}

impl EndpointHandler for StatsdHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        self.framing.clone()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        match self.sock.send_to(payload, self.destination) {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!("UDP send error: {err}");
                Err(SendError::Transient(err.to_string()))
            }
        }
    }

    fn serialize_metadata(&mut self, _definitions: &[MetricDefinition]) -> MetricResult<()> {
        Ok(())
    }
}

const fn type_char(kind: MetricKind) -> &'static [u8] {
    match kind {
        MetricKind::Counter | MetricKind::CumulativeCounter => b"c",
        MetricKind::Gauge => b"g",
    }
}

/// One `name:value|type|#tags` line per reading; a reading that alone
/// exceeds the datagram budget is an error.
pub(crate) struct StatsdFraming;

impl PayloadFraming for StatsdFraming {
    fn open(&self, _buf: &mut Vec<u8>, _first: &MetricReading) {}

    fn encode_reading(
        &self,
        buf: &mut Vec<u8>,
        reading: &MetricReading,
        scratch: &mut EncodeScratch,
    ) -> MetricResult<()> {
        buf.extend_from_slice(scratch.wire_name(reading).as_bytes());
        buf.push(b':');
        buf.extend_from_slice(scratch.number(reading.value).as_bytes());
        buf.push(b'|');
        buf.extend_from_slice(type_char(reading.kind));
        let tags = reading.tags.statsd();
        if !tags.is_empty() {
            buf.extend_from_slice(b"|#");
            buf.extend_from_slice(tags.as_bytes());
        }
        buf.push(b'\n');
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b""
    }

    fn close(&self, _buf: &mut Vec<u8>) {}

    fn oversize_is_error(&self) -> bool {
        true
    }
}

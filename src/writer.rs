use crate::payload::{Payload, PayloadQueue};
use crate::reading::{MetricKind, MetricReading};
use crate::time::Timestamp;
use crate::{MetricResult, MetricsError};

// Finalize early once a payload has less headroom than this, instead of
// provoking a partial-copy rotation on the next reading.
const EARLY_FINALIZE_SLACK: usize = 150;

/// Reusable per-writer formatting state: the millisecond-string cache for
/// the most recent timestamp plus scratch buffers for names and numbers.
pub struct EncodeScratch {
    ts_millis: u64,
    ts_text: String,
    name: String,
    int: itoa::Buffer,
    float: ryu::Buffer,
}

impl EncodeScratch {
    fn new() -> Self {
        Self {
            ts_millis: u64::MAX,
            ts_text: String::with_capacity(13),
            name: String::new(),
            int: itoa::Buffer::new(),
            float: ryu::Buffer::new(),
        }
    }

    /// The 13-digit millisecond rendering of `ts`, cached across calls
    /// with the same timestamp.
    pub fn timestamp_millis(&mut self, ts: Timestamp) -> &str {
        let millis = ts.as_unix_millis();
        if millis != self.ts_millis {
            self.ts_text.clear();
            self.ts_text.push_str(self.int.format(millis));
            self.ts_millis = millis;
        }
        &self.ts_text
    }

    /// Formats whole seconds since the epoch.
    pub fn timestamp_seconds(&mut self, ts: Timestamp) -> &str {
        self.int.format(ts.as_unix_seconds())
    }

    /// The reading's full wire name: name plus suffix.
    pub fn wire_name(&mut self, reading: &MetricReading) -> &str {
        self.name.clear();
        self.name.push_str(&reading.name);
        self.name.push_str(&reading.suffix);
        &self.name
    }

    /// Shortest-round-trip rendering of `value`; integral values are
    /// printed without a fraction.
    #[allow(clippy::cast_possible_truncation)]
    pub fn number(&mut self, value: f64) -> &str {
        if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
            self.int.format(value as i64)
        } else {
            self.float.format(value)
        }
    }
}

/// Endpoint-specific wire framing: how a batch opens and closes, how one
/// reading is encoded, and what separates readings.
pub trait PayloadFraming: Send + Sync {
    /// Writes the opening bytes of a fresh payload. `first` is the
    /// reading that triggered the open, for formats whose header depends
    /// on it.
    fn open(&self, buf: &mut Vec<u8>, first: &MetricReading);

    /// Encodes a single reading.
    ///
    /// # Errors
    /// Returns an error when the reading cannot be represented in this
    /// format; the writer drops the reading and continues the batch.
    fn encode_reading(
        &self,
        buf: &mut Vec<u8>,
        reading: &MetricReading,
        scratch: &mut EncodeScratch,
    ) -> MetricResult<()>;

    /// The byte sequence between consecutive readings.
    fn separator(&self) -> &'static [u8];

    /// Writes the closing bytes of a finished payload.
    fn close(&self, buf: &mut Vec<u8>);

    /// Formats that group payloads by reading kind return the kind here;
    /// a kind change then forces payload rotation.
    fn batch_key(&self, reading: &MetricReading) -> Option<MetricKind> {
        let _ = reading;
        None
    }

    /// Whether a single reading larger than the payload budget is an
    /// error (datagram formats) rather than an oversized payload.
    fn oversize_is_error(&self) -> bool {
        false
    }
}

/// Append-only, chunked serializer of readings into pooled payloads.
///
/// One writer exists per endpoint per snapshot, used only by the
/// collector's background thread. Soft per-reading errors (bad
/// timestamps, oversized readings, queue pressure) are collected rather
/// than aborting the batch.
pub struct MetricWriter<'a> {
    framing: &'a dyn PayloadFraming,
    queue: &'a PayloadQueue,
    endpoint: &'a str,
    max_payload_size: usize,
    throw_on_queue_full: bool,
    current: Option<Payload>,
    scratch: EncodeScratch,
    errors: Vec<MetricsError>,
}

impl<'a> MetricWriter<'a> {
    pub(crate) fn new(
        framing: &'a dyn PayloadFraming,
        queue: &'a PayloadQueue,
        endpoint: &'a str,
        max_payload_size: usize,
        throw_on_queue_full: bool,
    ) -> Self {
        Self {
            framing,
            queue,
            endpoint,
            max_payload_size,
            throw_on_queue_full,
            current: None,
            scratch: EncodeScratch::new(),
            errors: Vec::new(),
        }
    }

    /// Appends one reading, swallowing per-reading errors into the error
    /// list so the rest of the batch proceeds.
    pub fn record(&mut self, reading: &MetricReading) {
        if let Err(err) = self.write_reading(reading) {
            self.errors.push(err);
        }
    }

    /// Appends one reading.
    ///
    /// # Errors
    /// Fails on out-of-range timestamps, unencodable values, readings
    /// that cannot fit a datagram, and (when opted in) queue pressure.
    /// The payload is left consistent in every error case.
    pub fn write_reading(&mut self, reading: &MetricReading) -> MetricResult<()> {
        reading.timestamp.check_range()?;
        if !reading.value.is_finite() {
            return Err(MetricsError::NonFiniteValue {
                name: reading.name.to_string(),
            });
        }

        let key = self.framing.batch_key(reading);
        if key.is_some() {
            let rotate = self
                .current
                .as_ref()
                .is_some_and(|cur| cur.metrics_count > 0 && cur.batch_key != key);
            if rotate {
                self.finalize_current();
            }
        }

        let mut dropped = false;
        let mut cur = match self.current.take() {
            Some(p) => p,
            None => {
                let (mut p, d) = self.queue.get_free();
                dropped = d;
                self.framing.open(&mut p.data, reading);
                p.batch_key = key;
                p
            }
        };

        let start = cur.data.len();
        if cur.metrics_count > 0 {
            cur.data.extend_from_slice(self.framing.separator());
        }
        let reading_from = cur.data.len();

        if let Err(err) = self
            .framing
            .encode_reading(&mut cur.data, reading, &mut self.scratch)
        {
            cur.data.truncate(start);
            self.current = Some(cur);
            return Err(err);
        }

        if cur.data.len() > self.max_payload_size {
            if cur.metrics_count == 0 {
                if self.framing.oversize_is_error() {
                    let bytes = cur.data.len();
                    cur.data.truncate(start);
                    self.current = Some(cur);
                    return Err(MetricsError::ReadingTooLarge {
                        bytes,
                        max: self.max_payload_size,
                    });
                }
                // An oversized lone reading rides an oversized payload.
                cur.metrics_count = 1;
            } else {
                // Move the partial bytes of this reading into a fresh
                // payload and finalize the full one.
                let partial = cur.data.split_off(reading_from);
                cur.data.truncate(start);
                self.framing.close(&mut cur.data);
                self.queue.add_pending(cur);

                let (mut next, d) = self.queue.get_free();
                dropped |= d;
                self.framing.open(&mut next.data, reading);
                next.data.extend_from_slice(&partial);
                next.metrics_count = 1;
                next.batch_key = key;
                cur = next;
            }
        } else {
            cur.metrics_count += 1;
        }

        let headroom = self.max_payload_size.saturating_sub(cur.data.len());
        if headroom < EARLY_FINALIZE_SLACK && cur.metrics_count > 0 {
            self.framing.close(&mut cur.data);
            self.queue.add_pending(cur);
        } else {
            self.current = Some(cur);
        }

        if dropped && self.throw_on_queue_full {
            return Err(MetricsError::QueueFull {
                endpoint: self.endpoint.to_owned(),
            });
        }
        Ok(())
    }

    /// Finalizes and enqueues the in-progress payload, ending the batch.
    pub fn finish(&mut self) {
        self.finalize_current();
    }

    fn finalize_current(&mut self) {
        if let Some(mut payload) = self.current.take() {
            if payload.metrics_count == 0 || payload.data.is_empty() {
                self.queue.release(payload);
                return;
            }
            self.framing.close(&mut payload.data);
            self.queue.add_pending(payload);
        }
    }

    /// Per-reading errors swallowed by [`record`](Self::record).
    pub(crate) fn take_errors(&mut self) -> Vec<MetricsError> {
        std::mem::take(&mut self.errors)
    }
}

#[cfg(test)]
pub(crate) fn test_scratch() -> EncodeScratch {
    EncodeScratch::new()
}

impl Drop for MetricWriter<'_> {
    fn drop(&mut self) {
        self.finalize_current();
    }
}

use std::sync::Arc;
use std::time::Duration;

use crate::reading::MetricDefinition;
use crate::writer::PayloadFraming;
use crate::{MetricResult, MetricsError};

mod bosun;
mod datadog;
mod http;
mod local;
mod statsd;
mod signalfx;

pub use bosun::BosunHandler;
pub use datadog::DataDogHandler;
pub use local::LocalSink;
pub use signalfx::SignalFxHandler;
pub use statsd::StatsdHandler;

/// How a single transport attempt failed.
#[derive(Debug)]
pub enum SendError {
    /// Worth retrying: network failure, HTTP 429 or 5xx.
    Transient(String),
    /// Not worth retrying: the payload is dropped.
    Fatal(String),
}

/// One downstream destination's framing and transport.
///
/// Handlers are driven exclusively by the collector's background thread:
/// `send` delivers one finalized payload, one at a time.
pub trait EndpointHandler: Send {
    /// The wire framing used to serialize readings for this endpoint.
    fn framing(&self) -> Arc<dyn PayloadFraming>;

    /// Delivers one payload.
    ///
    /// # Errors
    /// Classifies failures as transient (retried) or fatal (dropped).
    fn send(&mut self, payload: &[u8]) -> Result<(), SendError>;

    /// Pushes the current metric definitions.
    ///
    /// # Errors
    /// Transport failures surface as transport errors; metadata is not
    /// retried until the next metadata interval.
    fn serialize_metadata(&mut self, definitions: &[MetricDefinition]) -> MetricResult<()>;
}

/// A named endpoint handed to the collector: destination name plus its
/// handler. The collector pairs it with a payload queue and retry state.
pub struct MetricEndpoint {
    pub(crate) name: String,
    pub(crate) handler: Box<dyn EndpointHandler>,
}

impl MetricEndpoint {
    /// Pairs a destination name with its handler.
    #[must_use]
    pub fn new(name: impl Into<String>, handler: Box<dyn EndpointHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    /// The destination name, used in reports and self-metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The result category of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload was delivered.
    Success,
    /// The attempt failed but the payload will be retried.
    TransientFailure,
    /// The attempt failed permanently and the payload was dropped.
    FatalFailure,
}

/// Everything observable about one send attempt, handed to the
/// [`AfterSendHandler`] callback.
pub struct SendReport<'a> {
    /// The endpoint's configured name.
    pub endpoint: &'a str,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Payload size in bytes.
    pub bytes_written: usize,
    /// Readings carried by the payload.
    pub metrics_written: usize,
    /// Payloads this endpoint dropped since the previous report.
    pub dropped_payloads: u64,
    /// How the attempt ended.
    pub outcome: SendOutcome,
    /// The failure, when the attempt did not succeed.
    pub error: Option<&'a MetricsError>,
}

/// Invoked once per send attempt from the background thread. Treated as
/// untrusted: panics are caught and swallowed.
pub type AfterSendHandler = Arc<dyn Fn(&SendReport<'_>) + Send + Sync>;

/// Receives asynchronous errors (serialization, transport, queue
/// pressure) from the background thread. Treated as untrusted: panics
/// are caught and swallowed.
pub type ExceptionHandler = Arc<dyn Fn(&MetricsError) + Send + Sync>;

use thiserror::Error;

/// Errors that can occur during metric registration, serialization and
/// transmission.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// A metric name was re-registered with a different unit, description
    /// or rate kind.
    #[error("metadata for metric {name} conflicts with an existing registration")]
    InconsistentMetadata {
        /// The fully prefixed metric name.
        name: String,
    },

    /// A metric key was re-registered with a different runtime type.
    #[error("metric {name} is already registered as a different type")]
    TypeMismatch {
        /// The fully prefixed metric name.
        name: String,
    },

    /// `create_metric` was called for a key that is already registered.
    #[error("metric {name} is already registered")]
    DuplicateMetric {
        /// The fully prefixed metric name.
        name: String,
    },

    /// A metric instance was bound to a collector twice.
    #[error("metric instance is already attached to a collector")]
    AlreadyAttached,

    /// A declared tag key collides with a default tag or another declared
    /// tag.
    #[error("tag {key} conflicts with another tag on the same metric")]
    TagConflict {
        /// The canonical tag key.
        key: String,
    },

    /// A tag key or value is structurally invalid (empty value, bad key).
    #[error("invalid tag {key}: {reason}")]
    InvalidTag {
        /// The offending tag key.
        key: String,
        /// Why the tag was rejected.
        reason: String,
    },

    /// A tag value contains characters outside the allowed set
    /// (letters, digits, `-`, `_`, `.`, `/`).
    #[error("invalid value {value:?} for tag {key}")]
    InvalidTagValue {
        /// The canonical tag key.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// A reading carried a NaN or infinite value, which no endpoint wire
    /// format can represent.
    #[error("non-finite value for metric {name} cannot be serialized")]
    NonFiniteValue {
        /// The fully prefixed metric name.
        name: String,
    },

    /// A percentile aggregate was configured outside (0, 1).
    #[error("percentile {p} is not strictly between 0 and 1")]
    InvalidPercentile {
        /// The rejected fraction.
        p: f64,
    },

    /// A reading's timestamp falls outside the supported range
    /// (2000-01-01 through 2250-01-01 UTC).
    #[error("timestamp {millis} ms since epoch is outside the supported range")]
    TimestampOutOfRange {
        /// The rejected timestamp in milliseconds since the Unix epoch.
        millis: u64,
    },

    /// Record or increment was called on a metric that has not been
    /// registered with a collector.
    #[error("metric is not attached to a collector")]
    NotAttached,

    /// The payload queue for an endpoint hit its buffer bound and had to
    /// drop a payload.
    #[error("payload queue for endpoint {endpoint} is full")]
    QueueFull {
        /// The endpoint whose queue overflowed.
        endpoint: String,
    },

    /// A single serialized reading exceeded the payload size budget on an
    /// endpoint that cannot split it (statsd datagrams).
    #[error("reading of {bytes} bytes exceeds the payload limit of {max}")]
    ReadingTooLarge {
        /// Size of the encoded reading.
        bytes: usize,
        /// The configured payload size budget.
        max: usize,
    },

    /// A send failed in a way that is worth retrying (network error,
    /// HTTP 429 or 5xx).
    #[error("transient transport failure: {0}")]
    TransportTransient(String),

    /// A send failed permanently (HTTP 4xx other than 429); the payload
    /// was dropped.
    #[error("fatal transport failure: {0}")]
    TransportFatal(String),

    /// Shutdown expired before all pending payloads could be delivered.
    #[error("shutdown aborted delivery of {payloads} pending payload(s)")]
    ShutdownAborted {
        /// How many payloads were abandoned.
        payloads: usize,
    },

    /// The collector has shut down and no longer accepts registrations or
    /// recordings.
    #[error("collector is shut down")]
    Closed,

    /// A reading could not be encoded into its wire form.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error from the standard library.
    #[error("I/O error: {0}")]
    StdIo(#[from] std::io::Error),
}

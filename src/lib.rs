//! # beacon-metrics
//!
//! An in-process metrics client: register named, tagged counters and
//! gauges, record at high rates from many threads, and let a background
//! collector snapshot, serialize and ship readings to one or more
//! telemetry endpoints.
//!
//! ## Features
//!
//! - **Lock-free recording**: counters and gauges accumulate through
//!   atomics and swap-based sample bags; writer threads never block on
//!   I/O or the registry
//! - **Multiple endpoints**: Bosun, DataDog and SignalFx HTTP JSON,
//!   statsd UDP, and an in-memory local sink, each with its own pooled
//!   payload queue and retry backoff
//! - **Metric types**: plain, cumulative and closure-fed counters;
//!   sampling, event, aggregate and closure-fed gauges; metric groups
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use beacon_metrics::{
//!     tags, Aggregate, AggregateGauge, BosunHandler, CollectorOptions, Counter,
//!     MetricEndpoint, MetricsCollector,
//! };
//!
//! let collector = MetricsCollector::new(CollectorOptions {
//!     endpoints: vec![MetricEndpoint::new(
//!         "bosun",
//!         Box::new(BosunHandler::new("http://bosun:8070")),
//!     )],
//!     default_tags: tags! { "host" => "web1" },
//!     metrics_name_prefix: "myapp.".to_string(),
//!     snapshot_interval: Duration::from_secs(30),
//!     ..CollectorOptions::default()
//! });
//!
//! let requests = collector
//!     .get_metric("http.requests", "requests", "Requests served", || {
//!         Counter::new(tags! { "route" => "/a" })
//!     })
//!     .unwrap();
//! requests.increment().unwrap();
//!
//! let latency = collector
//!     .get_metric("http.latency", "ms", "Request latency", || {
//!         AggregateGauge::new(
//!             vec![Aggregate::Count, Aggregate::Mean, Aggregate::Percentile(0.99)],
//!             tags! { "route" => "/a" },
//!         )
//!     })
//!     .unwrap();
//! latency.record(12.5).unwrap();
//!
//! collector.shutdown();
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
#![warn(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

mod collector;
mod endpoint;
mod error;
mod macros;
mod metric;
mod payload;
mod reading;
mod tags;
mod time;
mod writer;

pub use collector::{CollectorOptions, MetricsCollector};
pub use endpoint::{
    AfterSendHandler, BosunHandler, DataDogHandler, EndpointHandler, ExceptionHandler, LocalSink,
    MetricEndpoint, SendError, SendOutcome, SendReport, SignalFxHandler, StatsdHandler,
};
pub use error::MetricsError;
pub use metric::{
    Aggregate, AggregateGauge, Counter, CumulativeCounter, EventGauge, Metric, MetricGroup,
    MetricHeader, SamplingGauge, SnapshotCounter, SnapshotGauge,
};
pub use reading::{MetricDefinition, MetricKey, MetricKind, MetricReading, RateKind};
pub use tags::{ResolvedTags, TagNameTransform, TagSet};
pub use time::{Timestamp, MAX_TIMESTAMP_MS, MIN_TIMESTAMP_MS};
pub use writer::{EncodeScratch, MetricWriter, PayloadFraming};

/// Result type for metric operations.
///
/// Wraps errors that can occur during registration, serialization and
/// transmission.
pub type MetricResult<T> = Result<T, MetricsError>;

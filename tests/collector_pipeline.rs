use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use beacon_metrics::{
    tags, Aggregate, AggregateGauge, CollectorOptions, Counter, CumulativeCounter, EncodeScratch,
    EndpointHandler, EventGauge, LocalSink, MetricDefinition, MetricEndpoint, MetricKind,
    MetricReading, MetricResult, MetricsCollector, MetricsError, PayloadFraming, RateKind,
    SamplingGauge, SendError, SnapshotGauge, Timestamp,
};

// ============================================================================
// A test endpoint that captures every serialized reading
// ============================================================================

#[derive(Clone, Default)]
struct Capture {
    readings: Arc<Mutex<Vec<MetricReading>>>,
}

impl Capture {
    fn endpoint(&self, name: &str) -> MetricEndpoint {
        MetricEndpoint::new(
            name,
            Box::new(CaptureHandler {
                framing: Arc::new(CaptureFraming {
                    readings: self.readings.clone(),
                }),
            }),
        )
    }

    fn named(&self, name: &str) -> Vec<MetricReading> {
        self.readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.name.as_ref() == name)
            .cloned()
            .collect()
    }
}

struct CaptureFraming {
    readings: Arc<Mutex<Vec<MetricReading>>>,
}

impl PayloadFraming for CaptureFraming {
    fn open(&self, _buf: &mut Vec<u8>, _first: &MetricReading) {}

    fn encode_reading(
        &self,
        _buf: &mut Vec<u8>,
        reading: &MetricReading,
        _scratch: &mut EncodeScratch,
    ) -> MetricResult<()> {
        self.readings.lock().unwrap().push(reading.clone());
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b""
    }

    fn close(&self, _buf: &mut Vec<u8>) {}
}

struct CaptureHandler {
    framing: Arc<CaptureFraming>,
}

impl EndpointHandler for CaptureHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        self.framing.clone()
    }

    fn send(&mut self, _payload: &[u8]) -> Result<(), SendError> {
        Ok(())
    }

    fn serialize_metadata(&mut self, _definitions: &[MetricDefinition]) -> MetricResult<()> {
        Ok(())
    }
}

fn capture_collector(capture: &Capture) -> MetricsCollector {
    MetricsCollector::new(CollectorOptions {
        endpoints: vec![capture.endpoint("capture")],
        default_tags: tags! { "host" => "web1" },
        snapshot_interval: Duration::from_millis(100),
        ..CollectorOptions::default()
    })
}

// ============================================================================
// Snapshot pipeline scenarios
// ============================================================================

#[test]
fn counter_sums_increments_across_threads() {
    let capture = Capture::default();
    let collector = capture_collector(&capture);
    let counter = collector
        .get_metric("http.requests", "requests", "Requests served", || {
            Counter::new(tags! { "route" => "/a" })
        })
        .unwrap();

    let before = Timestamp::now();
    let mut handles = Vec::new();
    for _ in 0..8 {
        let counter = counter.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..125 {
                counter.increment().unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let readings = capture.named("http.requests");
    assert!(!readings.is_empty());
    // Every increment lands in exactly one window.
    let total: f64 = readings.iter().map(|r| r.value).sum();
    assert_eq!(total, 1000.0);

    let first = &readings[0];
    assert_eq!(first.kind, MetricKind::Counter);
    assert_eq!(first.suffix, "");
    assert_eq!(first.tags.json(), r#"{"host":"web1","route":"/a"}"#);
    assert!(first.timestamp >= before);
    assert!(first.timestamp <= Timestamp::now());
}

#[test]
fn sampling_gauge_keeps_the_last_value() {
    let sink = LocalSink::new();
    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![sink.endpoint("local")],
        snapshot_interval: Duration::from_millis(100),
        ..CollectorOptions::default()
    });
    let gauge = collector
        .get_metric("cpu", "ratio", "CPU load", || SamplingGauge::new(tags! {}))
        .unwrap();

    gauge.record(0.1).unwrap();
    gauge.record(0.2).unwrap();
    gauge.record(0.3).unwrap();

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let reading = sink.latest("cpu", "").expect("gauge should have flushed");
    assert_eq!(reading.value, 0.3);
    assert_eq!(reading.kind, MetricKind::Gauge);
}

#[test]
fn event_gauge_emits_events_in_order_with_their_timestamps() {
    let capture = Capture::default();
    let collector = capture_collector(&capture);
    let gauge = collector
        .get_metric("latency.ms", "ms", "Request latency", || {
            EventGauge::new(tags! {})
        })
        .unwrap();

    let base = Timestamp::now().as_unix_millis();
    for (offset, value) in [(0, 10.0), (1, 20.0), (2, 30.0)] {
        gauge
            .record_at(value, Timestamp::from_unix_millis(base + offset))
            .unwrap();
    }

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let readings = capture.named("latency.ms");
    let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![10.0, 20.0, 30.0]);
    let stamps: Vec<u64> = readings.iter().map(|r| r.timestamp.as_unix_millis()).collect();
    assert_eq!(stamps, vec![base, base + 1, base + 2]);
}

#[test]
fn aggregate_gauge_emits_exactly_the_enabled_aggregates() {
    let capture = Capture::default();
    let collector = capture_collector(&capture);
    let gauge = collector
        .get_metric("latency.ms", "ms", "Request latency", || {
            AggregateGauge::new(
                vec![
                    Aggregate::Count,
                    Aggregate::Min,
                    Aggregate::Max,
                    Aggregate::Mean,
                    Aggregate::Percentile(0.99),
                ],
                tags! {},
            )
        })
        .unwrap();

    for value in 1..=100 {
        gauge.record(f64::from(value)).unwrap();
    }

    // Two windows elapse; the second has no samples and must emit nothing.
    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let readings = capture.named("latency.ms");
    assert_eq!(readings.len(), 5);
    let by_suffix = |suffix: &str| {
        readings
            .iter()
            .find(|r| r.suffix == suffix)
            .unwrap_or_else(|| panic!("missing {suffix}"))
            .value
    };
    assert_eq!(by_suffix("_count"), 100.0);
    assert_eq!(by_suffix("_min"), 1.0);
    assert_eq!(by_suffix("_max"), 100.0);
    assert_eq!(by_suffix("_avg"), 50.5);
    assert_eq!(by_suffix("_99"), 99.0);
}

#[test]
fn cumulative_counter_reports_the_absolute_total_every_window() {
    let capture = Capture::default();
    let collector = capture_collector(&capture);
    let counter = collector
        .get_metric("bytes.sent", "bytes", "Bytes sent", || {
            CumulativeCounter::new(tags! {})
        })
        .unwrap();

    counter.add(5).unwrap();
    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let readings = capture.named("bytes.sent");
    assert!(readings.len() >= 2, "expected one reading per window");
    assert!(readings.iter().all(|r| r.value == 5.0));
    assert!(readings.iter().all(|r| r.kind == MetricKind::CumulativeCounter));
}

#[test]
fn snapshot_gauge_polls_its_producer_and_survives_panics() {
    let capture = Capture::default();
    let collector = capture_collector(&capture);
    collector
        .get_metric("pool.size", "connections", "Pool size", || {
            SnapshotGauge::new(tags! {}, || Some(7.0))
        })
        .unwrap();
    collector
        .get_metric("pool.broken", "connections", "Broken producer", || {
            SnapshotGauge::new(tags! {}, || panic!("producer bug"))
        })
        .unwrap();

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    assert!(!capture.named("pool.size").is_empty());
    assert!(capture.named("pool.size").iter().all(|r| r.value == 7.0));
    assert!(capture.named("pool.broken").is_empty());
}

#[test]
fn group_members_are_deduped_and_tagged() {
    let capture = Capture::default();
    let collector = capture_collector(&capture);
    let group = collector.group("http.hits", "requests", "Hits by route", |route| {
        Counter::new(tags! { "route" => route })
    });

    let a = group.add("/a").unwrap();
    let a_again = group.add("/a").unwrap();
    let b = group.add("/b").unwrap();
    assert!(Arc::ptr_eq(&a, &a_again));
    assert_eq!(group.len(), 2);

    a.add(3).unwrap();
    b.add(4).unwrap();
    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let readings = capture.named("http.hits");
    let mut seen: Vec<(String, f64)> = readings
        .iter()
        .map(|r| (r.tags.statsd().to_owned(), r.value))
        .collect();
    seen.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(
        seen,
        vec![
            ("host:web1,route:/a".to_owned(), 3.0),
            ("host:web1,route:/b".to_owned(), 4.0)
        ]
    );
}

#[test]
fn metadata_reaches_the_local_sink_on_its_own_interval() {
    let sink = LocalSink::new();
    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![sink.endpoint("local")],
        metrics_name_prefix: "app.".to_string(),
        snapshot_interval: Duration::from_millis(100),
        metadata_interval: Duration::from_millis(120),
        ..CollectorOptions::default()
    });
    collector
        .get_metric("http.requests", "requests", "Requests served", || {
            Counter::new(tags! {})
        })
        .unwrap();

    thread::sleep(Duration::from_millis(300));
    collector.shutdown();

    let definitions = sink.definitions();
    let def = definitions
        .iter()
        .find(|d| d.full_name == "app.http.requests")
        .expect("definition should have been pushed");
    assert_eq!(def.unit, "requests");
    assert_eq!(def.description, "Requests served");
    assert_eq!(def.rate_kind, RateKind::Counter);
}

// ============================================================================
// Registration contract
// ============================================================================

#[test]
fn get_metric_is_idempotent() {
    let collector = MetricsCollector::new(CollectorOptions::default());
    let a = collector
        .get_metric("m", "u", "d", || Counter::new(tags! {}))
        .unwrap();
    let b = collector
        .get_metric("m", "u", "d", || Counter::new(tags! {}))
        .unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn same_key_with_different_runtime_type_is_rejected() {
    let collector = MetricsCollector::new(CollectorOptions::default());
    collector
        .get_metric("m", "u", "d", || SamplingGauge::new(tags! {}))
        .unwrap();
    let err = collector
        .get_metric("m", "u", "d", || EventGauge::new(tags! {}))
        .unwrap_err();
    assert!(matches!(err, MetricsError::TypeMismatch { name } if name == "m"));
}

#[test]
fn conflicting_unit_is_rejected() {
    let collector = MetricsCollector::new(CollectorOptions::default());
    collector
        .get_metric("m", "requests", "d", || Counter::new(tags! {}))
        .unwrap();
    let err = collector
        .get_metric("m", "errors", "d", || Counter::new(tags! {}))
        .unwrap_err();
    assert!(matches!(err, MetricsError::InconsistentMetadata { .. }));
}

#[test]
fn create_metric_rejects_duplicates() {
    let collector = MetricsCollector::new(CollectorOptions::default());
    collector
        .create_metric("m", "u", "d", || Counter::new(tags! {}))
        .unwrap();
    let err = collector
        .create_metric("m", "u", "d", || Counter::new(tags! {}))
        .unwrap_err();
    assert!(matches!(err, MetricsError::DuplicateMetric { .. }));
}

#[test]
fn declared_tag_conflicting_with_default_is_rejected() {
    let collector = MetricsCollector::new(CollectorOptions {
        default_tags: tags! { "host" => "web1" },
        ..CollectorOptions::default()
    });
    let err = collector
        .get_metric("m", "u", "d", || Counter::new(tags! { "host" => "other" }))
        .unwrap_err();
    assert!(matches!(err, MetricsError::TagConflict { key } if key == "host"));
}

#[test]
fn bind_metric_attaches_a_caller_built_instance() {
    let sink = LocalSink::new();
    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![sink.endpoint("local")],
        snapshot_interval: Duration::from_millis(100),
        ..CollectorOptions::default()
    });
    let gauge = collector
        .bind_metric("queue.depth", "items", "Queue depth", SamplingGauge::new(tags! {}))
        .unwrap();
    gauge.record(9.0).unwrap();

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();
    assert_eq!(sink.latest("queue.depth", "").unwrap().value, 9.0);
}

#[test]
fn recording_on_a_detached_metric_fails() {
    let counter = Counter::new(tags! {});
    assert!(matches!(counter.increment(), Err(MetricsError::NotAttached)));
    let gauge = SamplingGauge::new(tags! {});
    assert!(matches!(gauge.record(1.0), Err(MetricsError::NotAttached)));
}

#[test]
fn recording_after_shutdown_fails_closed() {
    let collector = MetricsCollector::new(CollectorOptions::default());
    let counter = collector
        .get_metric("m", "u", "d", || Counter::new(tags! {}))
        .unwrap();
    counter.increment().unwrap();
    collector.shutdown();
    assert!(matches!(counter.increment(), Err(MetricsError::Closed)));
}

// ============================================================================
// Queue pressure
// ============================================================================

struct LineFraming;

impl PayloadFraming for LineFraming {
    fn open(&self, _buf: &mut Vec<u8>, _first: &MetricReading) {}

    fn encode_reading(
        &self,
        buf: &mut Vec<u8>,
        reading: &MetricReading,
        _scratch: &mut EncodeScratch,
    ) -> MetricResult<()> {
        buf.extend_from_slice(reading.name.as_bytes());
        buf.push(b'\n');
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b""
    }

    fn close(&self, _buf: &mut Vec<u8>) {}
}

struct LineHandler;

impl EndpointHandler for LineHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        Arc::new(LineFraming)
    }

    fn send(&mut self, _payload: &[u8]) -> Result<(), SendError> {
        Ok(())
    }

    fn serialize_metadata(&mut self, _definitions: &[MetricDefinition]) -> MetricResult<()> {
        Ok(())
    }
}

#[test]
fn queue_pressure_is_surfaced_without_blocking_producers() {
    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let errors_seen = errors.clone();
    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![MetricEndpoint::new("lines", Box::new(LineHandler))],
        snapshot_interval: Duration::from_millis(100),
        // A one-buffer pool and a tiny budget make every snapshot shed
        // payloads.
        max_payload_size: 40,
        max_payload_count: 1,
        throw_on_queue_full: true,
        exception_handler: Some(Arc::new(move |err| {
            errors_seen.lock().unwrap().push(err.to_string());
        })),
        ..CollectorOptions::default()
    });

    let counters: Vec<_> = (0..12)
        .map(|i| {
            collector
                .get_metric(
                    &format!("a.rather.long.metric.name.number.{i}"),
                    "u",
                    "d",
                    || Counter::new(tags! {}),
                )
                .unwrap()
        })
        .collect();
    for counter in &counters {
        counter.increment().unwrap();
    }

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let errors = errors.lock().unwrap();
    assert!(
        errors.iter().any(|e| e.contains("queue") && e.contains("lines")),
        "expected a queue-full report, got {errors:?}"
    );
}

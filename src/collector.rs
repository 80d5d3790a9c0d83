use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{tick, unbounded, Receiver, Sender};
use crossbeam::select;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::endpoint::{
    AfterSendHandler, EndpointHandler, ExceptionHandler, MetricEndpoint, SendError, SendOutcome,
    SendReport,
};
use crate::metric::{
    Attachment, Counter, Metric, MetricGroup, STATE_CLOSED, STATE_DRAINING, STATE_RUNNING,
};
use crate::payload::{Payload, PayloadQueue};
use crate::reading::{MetricDefinition, MetricKey};
use crate::tags::{resolve_tags, TagNameTransform, TagSet};
use crate::time::Timestamp;
use crate::writer::{MetricWriter, PayloadFraming};
use crate::{MetricResult, MetricsError};

/// Configuration for a [`MetricsCollector`].
pub struct CollectorOptions {
    /// The downstream destinations to ship readings to.
    pub endpoints: Vec<MetricEndpoint>,
    /// Tags merged into every metric's tag set at attachment.
    pub default_tags: TagSet,
    /// Prefix prepended verbatim to every metric name. Include a
    /// trailing dot if desired.
    pub metrics_name_prefix: String,
    /// How often accumulated state is snapshotted and flushed.
    pub snapshot_interval: Duration,
    /// How often metric definitions are pushed.
    pub metadata_interval: Duration,
    /// Surface a [`MetricsError::QueueFull`] through the exception
    /// handler whenever queue pressure drops a payload, instead of only
    /// counting it.
    pub throw_on_queue_full: bool,
    /// Maps declared tag identifiers to canonical wire keys.
    pub tag_name_transform: TagNameTransform,
    /// Receives asynchronous pipeline errors.
    pub exception_handler: Option<ExceptionHandler>,
    /// Invoked once per send attempt.
    pub after_send: Option<AfterSendHandler>,
    /// Payload buffer budget in bytes.
    pub max_payload_size: usize,
    /// Buffer bound per endpoint; beyond it the oldest payloads drop.
    pub max_payload_count: usize,
    /// Send attempts before a payload is abandoned.
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff. Doubles per
    /// consecutive failure, capped at the snapshot interval.
    pub delay_between_retries: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            default_tags: TagSet::new(),
            metrics_name_prefix: String::new(),
            snapshot_interval: Duration::from_secs(30),
            metadata_interval: Duration::from_secs(300),
            throw_on_queue_full: false,
            tag_name_transform: TagNameTransform::Identity,
            exception_handler: None,
            after_send: None,
            max_payload_size: 8000,
            max_payload_count: 240,
            max_retries: 3,
            delay_between_retries: Duration::from_secs(2),
        }
    }
}

#[derive(Default)]
struct Registry {
    by_key: HashMap<MetricKey, Arc<dyn Metric>>,
    // Registration order, which is also serialization order.
    ordered: Vec<Arc<dyn Metric>>,
    definitions: HashMap<String, MetricDefinition>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RegisterMode {
    Create,
    GetOrCreate,
}

/// Registry state shared between the user-facing collector handle, the
/// background job and metric groups.
pub(crate) struct CollectorShared {
    registry: RwLock<Registry>,
    defaults: TagSet,
    prefix: String,
    transform: TagNameTransform,
    state: Arc<AtomicU8>,
}

fn check_definition(registry: &Registry, definition: &MetricDefinition) -> MetricResult<()> {
    if let Some(existing) = registry.definitions.get(&definition.full_name) {
        if existing != definition {
            return Err(MetricsError::InconsistentMetadata {
                name: definition.full_name.clone(),
            });
        }
    }
    Ok(())
}

fn downcast<T: Metric>(metric: Arc<dyn Metric>, full_name: &str) -> MetricResult<Arc<T>> {
    metric.as_any_arc().downcast::<T>().map_err(|_| MetricsError::TypeMismatch {
        name: full_name.to_owned(),
    })
}

impl CollectorShared {
    pub(crate) fn register<T, F>(
        &self,
        name: &str,
        unit: &str,
        description: &str,
        factory: F,
    ) -> MetricResult<Arc<T>>
    where
        T: Metric,
        F: FnOnce() -> T,
    {
        self.register_mode(name, unit, description, RegisterMode::GetOrCreate, factory)
    }

    fn register_mode<T, F>(
        &self,
        name: &str,
        unit: &str,
        description: &str,
        mode: RegisterMode,
        factory: F,
    ) -> MetricResult<Arc<T>>
    where
        T: Metric,
        F: FnOnce() -> T,
    {
        if self.state.load(Ordering::Acquire) == STATE_CLOSED {
            return Err(MetricsError::Closed);
        }

        let metric = factory();
        let resolved = resolve_tags(metric.header().declared_tags(), &self.defaults, &self.transform)?;
        let full_name = format!("{}{name}", self.prefix);
        let definition = MetricDefinition {
            full_name: full_name.clone(),
            unit: unit.to_owned(),
            description: description.to_owned(),
            rate_kind: metric.rate_kind(),
        };
        let key = MetricKey {
            full_name: full_name.clone(),
            tags_canonical: resolved.json().to_owned(),
        };

        // Steady-state lookups only take the read lock.
        {
            let registry = self.registry.read();
            check_definition(&registry, &definition)?;
            if let Some(existing) = registry.by_key.get(&key) {
                if mode == RegisterMode::Create {
                    return Err(MetricsError::DuplicateMetric { name: full_name });
                }
                return downcast(existing.clone(), &full_name);
            }
        }

        let mut registry = self.registry.write();
        check_definition(&registry, &definition)?;
        if let Some(existing) = registry.by_key.get(&key) {
            if mode == RegisterMode::Create {
                return Err(MetricsError::DuplicateMetric { name: full_name });
            }
            return downcast(existing.clone(), &full_name);
        }

        let metric = Arc::new(metric);
        if !metric.header().attach(Attachment {
            full_name: Arc::from(full_name.as_str()),
            tags: Arc::new(resolved),
            collector_state: self.state.clone(),
        }) {
            return Err(MetricsError::AlreadyAttached);
        }
        registry
            .definitions
            .entry(full_name)
            .or_insert(definition);
        let as_dyn: Arc<dyn Metric> = metric.clone();
        registry.by_key.insert(key, as_dyn.clone());
        registry.ordered.push(as_dyn);
        Ok(metric)
    }
}

/// The metric registry plus the background thread that snapshots,
/// serializes and ships readings to the configured endpoints.
///
/// Dropping the collector (or calling [`shutdown`](Self::shutdown))
/// performs one final snapshot and flush with retries disabled, then
/// refuses further registrations and recordings.
///
/// # Example
///
/// ```no_run
/// use beacon_metrics::{
///     tags, CollectorOptions, Counter, LocalSink, MetricsCollector,
/// };
///
/// let sink = LocalSink::new();
/// let collector = MetricsCollector::new(CollectorOptions {
///     endpoints: vec![sink.endpoint("local")],
///     default_tags: tags! { "host" => "web1" },
///     ..CollectorOptions::default()
/// });
///
/// let requests = collector
///     .get_metric("http.requests", "requests", "Requests served", || {
///         Counter::new(tags! { "route" => "/a" })
///     })
///     .unwrap();
/// requests.increment().unwrap();
/// ```
pub struct MetricsCollector {
    shared: Arc<CollectorShared>,
    sender: Option<Sender<()>>,
    // only used in cold path
    job_handle: Option<JoinHandle<()>>,
}

impl MetricsCollector {
    /// Starts a collector and its background snapshot thread.
    #[must_use]
    pub fn new(options: CollectorOptions) -> Self {
        let CollectorOptions {
            endpoints,
            default_tags,
            metrics_name_prefix,
            snapshot_interval,
            metadata_interval,
            throw_on_queue_full,
            tag_name_transform,
            exception_handler,
            after_send,
            max_payload_size,
            max_payload_count,
            max_retries,
            delay_between_retries,
        } = options;

        let shared = Arc::new(CollectorShared {
            registry: RwLock::new(Registry::default()),
            defaults: default_tags,
            prefix: metrics_name_prefix,
            transform: tag_name_transform,
            state: Arc::new(AtomicU8::new(STATE_RUNNING)),
        });

        let endpoints: Vec<EndpointState> = endpoints
            .into_iter()
            .map(|endpoint| EndpointState::new(endpoint, &shared, max_payload_size, max_payload_count))
            .collect();

        let config = JobConfig {
            snapshot_interval,
            metadata_interval,
            throw_on_queue_full,
            max_payload_size,
            max_retries,
            delay_between_retries,
            after_send,
            exception_handler,
        };

        let (sender, receiver) = unbounded::<()>();
        let job_shared = shared.clone();
        let job_handle = spawn(move || run_job(&job_shared, endpoints, &config, &receiver));

        Self {
            shared,
            sender: Some(sender),
            job_handle: Some(job_handle),
        }
    }

    /// Returns the metric registered under `name` and the factory's tag
    /// set, creating and attaching it on first use. Idempotent: equal
    /// arguments return the same instance.
    ///
    /// # Errors
    /// Fails on metadata conflicts, tag validation, type mismatches, or
    /// when the collector has shut down.
    pub fn get_metric<T, F>(
        &self,
        name: &str,
        unit: &str,
        description: &str,
        factory: F,
    ) -> MetricResult<Arc<T>>
    where
        T: Metric,
        F: FnOnce() -> T,
    {
        self.shared
            .register_mode(name, unit, description, RegisterMode::GetOrCreate, factory)
    }

    /// Like [`get_metric`](Self::get_metric), but fails with
    /// [`MetricsError::DuplicateMetric`] when the key already exists.
    ///
    /// # Errors
    /// As `get_metric`, plus duplicate registration.
    pub fn create_metric<T, F>(
        &self,
        name: &str,
        unit: &str,
        description: &str,
        factory: F,
    ) -> MetricResult<Arc<T>>
    where
        T: Metric,
        F: FnOnce() -> T,
    {
        self.shared
            .register_mode(name, unit, description, RegisterMode::Create, factory)
    }

    /// Attaches a metric instance constructed by the caller.
    ///
    /// # Errors
    /// As `get_metric`, plus [`MetricsError::AlreadyAttached`] when the
    /// instance is already registered elsewhere.
    pub fn bind_metric<T>(
        &self,
        name: &str,
        unit: &str,
        description: &str,
        metric: T,
    ) -> MetricResult<Arc<T>>
    where
        T: Metric,
    {
        self.shared
            .register_mode(name, unit, description, RegisterMode::GetOrCreate, move || metric)
    }

    /// A family of sibling metrics under one name, keyed by a single
    /// varying tag value produced by `factory`.
    pub fn group<T, F>(
        &self,
        name: &str,
        unit: &str,
        description: &str,
        factory: F,
    ) -> MetricGroup<T>
    where
        T: Metric,
        F: Fn(&str) -> T + Send + Sync + 'static,
    {
        MetricGroup::new(
            self.shared.clone(),
            name.to_owned(),
            unit.to_owned(),
            description.to_owned(),
            Box::new(factory),
        )
    }

    /// Stops the loops, performs a final best-effort snapshot and flush,
    /// and joins the background thread.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for MetricsCollector {
    fn drop(&mut self) {
        // Dropping the sender closes the channel; the background job
        // treats that as the shutdown signal, drains once and exits.
        drop(self.sender.take());
        if let Some(handle) = self.job_handle.take() {
            let _ = handle.join();
        }
    }
}

struct JobConfig {
    snapshot_interval: Duration,
    metadata_interval: Duration,
    throw_on_queue_full: bool,
    max_payload_size: usize,
    max_retries: u32,
    delay_between_retries: Duration,
    after_send: Option<AfterSendHandler>,
    exception_handler: Option<ExceptionHandler>,
}

struct EndpointState {
    name: String,
    handler: Box<dyn EndpointHandler>,
    framing: Arc<dyn PayloadFraming>,
    queue: Arc<PayloadQueue>,
    drop_counter: Option<Arc<Counter>>,
    drops_seen_metric: u64,
    drops_seen_report: u64,
    consecutive_failures: u32,
    next_attempt_at: Option<Instant>,
}

impl EndpointState {
    fn new(
        endpoint: MetricEndpoint,
        shared: &Arc<CollectorShared>,
        max_payload_size: usize,
        max_payload_count: usize,
    ) -> Self {
        let MetricEndpoint { name, handler } = endpoint;
        let framing = handler.framing();
        // Endpoint names outside the tag character set simply go without
        // the self-metric.
        let drop_counter = shared
            .register(
                "__metrics_client.dropped_payloads",
                "payloads",
                "Payloads dropped because of queue pressure, retry exhaustion or fatal sends",
                || Counter::new(TagSet::new().with("endpoint", name.clone())),
            )
            .ok();
        Self {
            name,
            handler,
            framing,
            queue: Arc::new(PayloadQueue::new(max_payload_size, max_payload_count)),
            drop_counter,
            drops_seen_metric: 0,
            drops_seen_report: 0,
            consecutive_failures: 0,
            next_attempt_at: None,
        }
    }
}

fn run_job(
    shared: &Arc<CollectorShared>,
    mut endpoints: Vec<EndpointState>,
    config: &JobConfig,
    receiver: &Receiver<()>,
) {
    let snapshot_tick = tick(config.snapshot_interval);
    let metadata_tick = tick(config.metadata_interval);

    loop {
        let mut finish = false;
        select! {
            recv(snapshot_tick) -> _ => {},
            recv(metadata_tick) -> _ => {
                run_metadata(shared, &mut endpoints, config);
                continue;
            },
            recv(receiver) -> _ => {
                finish = true;
            },
        }

        if finish {
            shared.state.store(STATE_DRAINING, Ordering::Release);
            run_snapshot(shared, &mut endpoints, config, true);
            shared.state.store(STATE_CLOSED, Ordering::Release);
            return;
        }
        run_snapshot(shared, &mut endpoints, config, false);
    }
}

fn run_snapshot(
    shared: &Arc<CollectorShared>,
    endpoints: &mut [EndpointState],
    config: &JobConfig,
    final_flush: bool,
) {
    let now = Timestamp::now();

    // Fold queue drops into the per-endpoint self-metrics so they ride
    // this window.
    for endpoint in endpoints.iter_mut() {
        let total = endpoint.queue.dropped_total();
        let delta = total - endpoint.drops_seen_metric;
        endpoint.drops_seen_metric = total;
        if delta > 0 {
            if let Some(counter) = &endpoint.drop_counter {
                #[allow(clippy::cast_possible_wrap)]
                let _ = counter.add(delta as i64);
            }
        }
    }

    let metrics: Vec<Arc<dyn Metric>> = shared.registry.read().ordered.clone();
    for metric in &metrics {
        metric.pre_serialize();
    }

    for endpoint in endpoints.iter_mut() {
        let framing = endpoint.framing.clone();
        let queue = endpoint.queue.clone();
        let name = endpoint.name.clone();
        let mut writer = MetricWriter::new(
            &*framing,
            &queue,
            &name,
            config.max_payload_size,
            config.throw_on_queue_full,
        );
        for metric in &metrics {
            metric.serialize(&mut writer, now);
        }
        writer.finish();
        let errors = writer.take_errors();
        drop(writer);
        for err in &errors {
            report_exception(config, err);
        }

        flush_endpoint(endpoint, config, final_flush);
    }
}

fn flush_endpoint(endpoint: &mut EndpointState, config: &JobConfig, final_flush: bool) {
    if !final_flush {
        if let Some(at) = endpoint.next_attempt_at {
            if Instant::now() < at {
                return;
            }
        }
    }

    endpoint.queue.merge_retry();
    let mut batch = endpoint.queue.take_for_flush();

    while let Some(payload) = batch.pop_front() {
        let started = Instant::now();
        let result = endpoint.handler.send(payload.data());
        let duration = started.elapsed();

        match result {
            Ok(()) => {
                endpoint.consecutive_failures = 0;
                send_report(endpoint, config, duration, &payload, SendOutcome::Success, None);
                endpoint.queue.release(payload);
            }
            Err(SendError::Fatal(msg)) => {
                let err = MetricsError::TransportFatal(msg);
                send_report(
                    endpoint,
                    config,
                    duration,
                    &payload,
                    SendOutcome::FatalFailure,
                    Some(&err),
                );
                report_exception(config, &err);
                endpoint.queue.release_dropped(payload);
            }
            Err(SendError::Transient(msg)) => {
                let err = MetricsError::TransportTransient(msg);
                send_report(
                    endpoint,
                    config,
                    duration,
                    &payload,
                    SendOutcome::TransientFailure,
                    Some(&err),
                );

                if final_flush {
                    // Shutdown runs with retries disabled: abandon what
                    // could not be delivered and say so.
                    let abandoned = 1 + batch.len();
                    endpoint.queue.release_dropped(payload);
                    while let Some(rest) = batch.pop_front() {
                        endpoint.queue.release_dropped(rest);
                    }
                    report_exception(
                        config,
                        &MetricsError::ShutdownAborted { payloads: abandoned },
                    );
                    return;
                }

                endpoint.queue.retry(payload, config.max_retries);
                endpoint.queue.restore_pending(batch);
                endpoint.consecutive_failures += 1;
                let exp = endpoint.consecutive_failures.saturating_sub(1).min(10);
                let delay = config
                    .delay_between_retries
                    .saturating_mul(1_u32 << exp)
                    .min(config.snapshot_interval);
                endpoint.next_attempt_at = Some(Instant::now() + delay);
                return;
            }
        }
    }
    endpoint.next_attempt_at = None;
}

fn send_report(
    endpoint: &mut EndpointState,
    config: &JobConfig,
    duration: Duration,
    payload: &Payload,
    outcome: SendOutcome,
    error: Option<&MetricsError>,
) {
    let total = endpoint.queue.dropped_total();
    let dropped = total - endpoint.drops_seen_report;
    endpoint.drops_seen_report = total;

    debug!(
        endpoint = %endpoint.name,
        ?outcome,
        bytes = payload.data().len(),
        metrics = payload.metrics_count(),
        dropped,
        "send attempt"
    );

    if let Some(after_send) = &config.after_send {
        let report = SendReport {
            endpoint: &endpoint.name,
            duration,
            bytes_written: payload.data().len(),
            metrics_written: payload.metrics_count(),
            dropped_payloads: dropped,
            outcome,
            error,
        };
        // User callbacks are untrusted; a panic must not take down the
        // flush loop.
        let _ = catch_unwind(AssertUnwindSafe(|| after_send(&report)));
    }
}

fn report_exception(config: &JobConfig, err: &MetricsError) {
    warn!("metrics pipeline error: {err}");
    if let Some(handler) = &config.exception_handler {
        let _ = catch_unwind(AssertUnwindSafe(|| handler(err)));
    }
}

fn run_metadata(
    shared: &Arc<CollectorShared>,
    endpoints: &mut [EndpointState],
    config: &JobConfig,
) {
    let mut definitions: Vec<MetricDefinition> =
        shared.registry.read().definitions.values().cloned().collect();
    if definitions.is_empty() {
        return;
    }
    definitions.sort_by(|a, b| a.full_name.cmp(&b.full_name));

    for endpoint in endpoints.iter_mut() {
        if let Err(err) = endpoint.handler.serialize_metadata(&definitions) {
            report_exception(config, &err);
        }
    }
}

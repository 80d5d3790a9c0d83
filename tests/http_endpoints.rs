use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use beacon_metrics::{
    tags, BosunHandler, CollectorOptions, Counter, DataDogHandler, MetricEndpoint,
    MetricsCollector, SamplingGauge, SendOutcome, SignalFxHandler,
};

struct Captured {
    url: String,
    body: String,
    sf_token: Option<String>,
}

/// Serves requests until 2 s pass without one, answering the first
/// `fail_first` requests with `fail_status` and the rest with 200.
fn spawn_http_server(fail_first: usize, fail_status: u16) -> (String, JoinHandle<Vec<Captured>>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("couldn't bind test server");
    let addr = server.server_addr().to_ip().expect("expected an IP listen address");
    let base_url = format!("http://{addr}");

    let handle = thread::spawn(move || {
        let mut captured = Vec::new();
        let mut served = 0usize;
        while let Ok(Some(mut request)) = server.recv_timeout(Duration::from_secs(2)) {
            let mut body = String::new();
            use std::io::Read;
            request.as_reader().read_to_string(&mut body).unwrap();
            let sf_token = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("X-SF-TOKEN"))
                .map(|h| h.value.as_str().to_owned());
            captured.push(Captured {
                url: request.url().to_owned(),
                body,
                sf_token,
            });

            let status = if served < fail_first { fail_status } else { 200 };
            served += 1;
            request
                .respond(tiny_http::Response::from_string("ok").with_status_code(status))
                .unwrap();
        }
        captured
    });
    (base_url, handle)
}

#[test]
fn bosun_payloads_survive_an_outage_and_arrive_in_order() {
    let (base_url, server) = spawn_http_server(2, 500);
    let outcomes: Arc<Mutex<Vec<SendOutcome>>> = Arc::default();
    let outcomes_seen = outcomes.clone();

    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![MetricEndpoint::new(
            "bosun",
            Box::new(BosunHandler::new(&base_url)),
        )],
        snapshot_interval: Duration::from_millis(100),
        delay_between_retries: Duration::from_millis(10),
        max_retries: 5,
        after_send: Some(Arc::new(move |report| {
            outcomes_seen.lock().unwrap().push(report.outcome);
        })),
        ..CollectorOptions::default()
    });

    let counter = collector
        .get_metric("http.requests", "requests", "Requests served", || {
            Counter::new(tags! { "route" => "/a" })
        })
        .unwrap();

    // Window one: value 1, sent while the endpoint is down.
    counter.increment().unwrap();
    thread::sleep(Duration::from_millis(150));
    // Window two: value 2, queued behind the retrying payload.
    counter.add(2).unwrap();
    thread::sleep(Duration::from_millis(350));
    collector.shutdown();

    let captured = server.join().unwrap();
    let puts: Vec<&Captured> = captured.iter().filter(|c| c.url == "/api/put").collect();
    assert!(puts.len() >= 4, "expected two failures and two deliveries");

    let values: Vec<f64> = puts
        .iter()
        .map(|c| {
            let parsed: serde_json::Value = serde_json::from_str(&c.body).unwrap();
            let entry = &parsed.as_array().unwrap()[0];
            assert_eq!(entry["metric"], "http.requests");
            assert_eq!(entry["tags"]["route"], "/a");
            entry["value"].as_f64().unwrap()
        })
        .collect();
    // The first window's payload is retried until it lands, and only
    // then does the second window's payload go out.
    assert_eq!(values, vec![1.0, 1.0, 1.0, 2.0]);

    let outcomes = outcomes.lock().unwrap();
    let failures = outcomes
        .iter()
        .filter(|o| **o == SendOutcome::TransientFailure)
        .count();
    let successes = outcomes
        .iter()
        .filter(|o| **o == SendOutcome::Success)
        .count();
    assert_eq!(failures, 2);
    assert_eq!(successes, 2);
}

#[test]
fn bosun_fatal_responses_drop_the_payload_without_retry() {
    let (base_url, server) = spawn_http_server(usize::MAX, 400);
    let outcomes: Arc<Mutex<Vec<SendOutcome>>> = Arc::default();
    let outcomes_seen = outcomes.clone();
    let errors: Arc<Mutex<Vec<String>>> = Arc::default();
    let errors_seen = errors.clone();

    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![MetricEndpoint::new(
            "bosun",
            Box::new(BosunHandler::new(&base_url)),
        )],
        snapshot_interval: Duration::from_millis(100),
        after_send: Some(Arc::new(move |report| {
            outcomes_seen.lock().unwrap().push(report.outcome);
        })),
        exception_handler: Some(Arc::new(move |err| {
            errors_seen.lock().unwrap().push(err.to_string());
        })),
        ..CollectorOptions::default()
    });

    let counter = collector
        .get_metric("m", "u", "d", || Counter::new(tags! {}))
        .unwrap();
    counter.increment().unwrap();

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();
    drop(server);

    let outcomes = outcomes.lock().unwrap();
    assert!(!outcomes.is_empty());
    assert!(outcomes.iter().all(|o| *o == SendOutcome::FatalFailure));
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.contains("fatal transport failure")));
}

#[test]
fn signalfx_sends_kind_grouped_payloads_with_the_access_token() {
    let (base_url, server) = spawn_http_server(0, 200);
    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![MetricEndpoint::new(
            "signalfx",
            Box::new(SignalFxHandler::new(&base_url, "secret-token")),
        )],
        snapshot_interval: Duration::from_millis(100),
        ..CollectorOptions::default()
    });

    collector
        .get_metric("hits", "requests", "d", || Counter::new(tags! {}))
        .unwrap()
        .add(3)
        .unwrap();
    collector
        .get_metric("load", "ratio", "d", || SamplingGauge::new(tags! { "core" => "0" }))
        .unwrap()
        .record(0.7)
        .unwrap();

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let captured = server.join().unwrap();
    let datapoints: Vec<&Captured> = captured
        .iter()
        .filter(|c| c.url == "/v2/datapoint")
        .collect();
    assert!(datapoints.len() >= 2, "one payload per reading kind");
    for request in &datapoints {
        assert_eq!(request.sf_token.as_deref(), Some("secret-token"));
    }

    let mut saw_counter = false;
    let mut saw_gauge = false;
    for request in &datapoints {
        let parsed: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        if let Some(entries) = parsed.get("counter").and_then(|v| v.as_array()) {
            assert_eq!(entries[0]["metric"], "hits");
            assert_eq!(entries[0]["value"], 3.0);
            saw_counter = true;
        }
        if let Some(entries) = parsed.get("gauge").and_then(|v| v.as_array()) {
            assert_eq!(entries[0]["metric"], "load");
            assert_eq!(entries[0]["dimensions"]["core"], "0");
            saw_gauge = true;
        }
    }
    assert!(saw_counter && saw_gauge);
}

#[test]
fn datadog_series_carry_the_api_key_and_count_type() {
    let (base_url, server) = spawn_http_server(0, 200);
    let collector = MetricsCollector::new(CollectorOptions {
        endpoints: vec![MetricEndpoint::new(
            "datadog",
            Box::new(DataDogHandler::new(&base_url, "dd-key")),
        )],
        default_tags: tags! { "host" => "web1" },
        snapshot_interval: Duration::from_millis(100),
        ..CollectorOptions::default()
    });

    collector
        .get_metric("hits", "requests", "d", || Counter::new(tags! {}))
        .unwrap()
        .add(5)
        .unwrap();

    thread::sleep(Duration::from_millis(250));
    collector.shutdown();

    let captured = server.join().unwrap();
    let series = captured
        .iter()
        .find(|c| c.url.starts_with("/api/v1/series"))
        .expect("series request missing");
    assert!(series.url.contains("api_key=dd-key"));

    let parsed: serde_json::Value = serde_json::from_str(&series.body).unwrap();
    let entry = &parsed["series"].as_array().unwrap()[0];
    assert_eq!(entry["metric"], "hits");
    assert_eq!(entry["type"], "count");
    assert_eq!(entry["host"], "web1");
    assert_eq!(entry["points"][0][1], 5.0);
}

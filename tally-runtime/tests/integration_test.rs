use {
    std::{fs, sync::Arc, thread, env::current_dir},
    serde_json::Value,
    tally_core::{Trigger, Envelope, CountBody, MessageBody},
    tally_runtime::{
        config::{ServerConfig, StorageConfig, SinkConfig, ConfigError},
        counter::CounterService,
        kv::{BoxedStorage, CounterStorage, MemoryStorage, SqliteStorage, SqliteSchema, SqliteStorageConnectionError},
        logs::{BoxLogger, InvocationOutcome},
        metrics::{Metrics, BoxedSink, MetricSink, UsageEvent},
        server::build_service,
    },
    crate::doubles::{TestLogger, RecordingSink, FailingSink, FailingStorage, OutageStorage},
};

mod doubles;

fn service_with_memory() -> CounterService {
    CounterService::new(BoxedStorage::new(MemoryStorage::new()), "visitors")
}

fn count_of(envelope: &Envelope) -> u64 {
    serde_json::from_str::<CountBody>(&envelope.body).unwrap().count
}

#[test]
fn first_call_bootstraps_to_one() {
    let service = service_with_memory();

    let envelope = service.handle(&Trigger::empty());

    assert_eq!(200, envelope.status_code);
    assert_eq!(1, count_of(&envelope));
    assert_eq!(2, envelope.headers.len());
    assert_eq!(Some(&"application/json".to_owned()), envelope.headers.get("Content-Type"));
    assert_eq!(Some(&"*".to_owned()), envelope.headers.get("Access-Control-Allow-Origin"));
}

#[test]
fn sequential_invocations_are_monotonic() {
    let service = service_with_memory();

    let counts: Vec<u64> = (0..50).map(|_| count_of(&service.handle(&Trigger::empty()))).collect();

    assert_eq!((1..=50).collect::<Vec<u64>>(), counts);
}

#[test]
fn concurrent_invocations_never_lose_an_update() {
    let service = service_with_memory();

    let mut counts = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| {
                (0..25).map(|_| {
                    let envelope = service.handle(&Trigger::empty());
                    assert_eq!(200, envelope.status_code);
                    count_of(&envelope)
                }).collect::<Vec<u64>>()
            }))
            .collect();

        handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect::<Vec<u64>>()
    });

    // every invocation is applied exactly once; only the interleaving order
    // is unspecified.
    counts.sort();
    assert_eq!((1..=200).collect::<Vec<u64>>(), counts);
}

#[test]
fn success_body_has_exactly_one_count_field() {
    let service = service_with_memory();

    let envelope = service.handle(&Trigger::empty());
    let body: Value = serde_json::from_str(&envelope.body).unwrap();

    let object = body.as_object().unwrap();
    assert_eq!(1, object.len());
    assert!(object.get("count").unwrap().as_u64().unwrap() >= 1);
}

#[test]
fn envelope_wire_format() {
    let service = service_with_memory();

    let envelope = serde_json::to_value(&service.handle(&Trigger::empty())).unwrap();
    let object = envelope.as_object().unwrap();

    assert_eq!(3, object.len());
    assert_eq!(200, object.get("statusCode").unwrap().as_u64().unwrap());
    assert!(object.get("headers").unwrap().is_object());
    assert!(object.get("body").unwrap().is_string());
}

#[test]
fn storage_failure_returns_generic_500() {
    let service = CounterService::new(BoxedStorage::new(FailingStorage), "visitors");

    let envelope = service.handle(&Trigger::empty());

    assert_eq!(500, envelope.status_code);
    assert_eq!(1, envelope.headers.len());
    assert_eq!(Some(&"application/json".to_owned()), envelope.headers.get("Content-Type"));
    let body: MessageBody = serde_json::from_str(&envelope.body).unwrap();
    assert_eq!("Internal server error", body.message);

    // no backend detail crosses the envelope boundary
    assert!(!envelope.body.contains("unavailable"));
    let object: Value = serde_json::from_str(&envelope.body).unwrap();
    assert_eq!(1, object.as_object().unwrap().len());
}

#[test]
fn storage_failure_leaves_record_unchanged() {
    let storage = OutageStorage::new();
    let service = CounterService::new(BoxedStorage::new(storage.clone()), "visitors");

    assert_eq!(1, count_of(&service.handle(&Trigger::empty())));
    assert_eq!(2, count_of(&service.handle(&Trigger::empty())));

    storage.set_outage(true);
    let envelope = service.handle(&Trigger::empty());
    assert_eq!(500, envelope.status_code);
    assert_eq!(Some(2), storage.current("visitors").unwrap());
}

#[test]
fn outage_and_recovery_scenario() {
    let storage = OutageStorage::new();
    let service = CounterService::new(BoxedStorage::new(storage.clone()), "visitors");

    assert_eq!(1, count_of(&service.handle(&Trigger::empty())));
    assert_eq!(2, count_of(&service.handle(&Trigger::empty())));

    storage.set_outage(true);
    let envelope = service.handle(&Trigger::empty());
    assert_eq!(500, envelope.status_code);
    assert_eq!("Internal server error", serde_json::from_str::<MessageBody>(&envelope.body).unwrap().message);
    assert_eq!(Some(2), storage.current("visitors").unwrap());

    storage.set_outage(false);
    assert_eq!(3, count_of(&service.handle(&Trigger::empty())));
}

#[test]
fn sink_failure_does_not_affect_response() {
    let service = service_with_memory()
        .with_sink(BoxedSink::new(FailingSink), UsageEvent::default());

    let envelope = service.handle(&Trigger::empty());
    assert_eq!(200, envelope.status_code);
    assert_eq!(1, count_of(&envelope));

    assert_eq!(2, count_of(&service.handle(&Trigger::empty())));
}

#[test]
fn usage_event_emitted_once_per_success() {
    let sink = Arc::new(RecordingSink::new());
    let service = service_with_memory()
        .with_sink(BoxedSink::new(sink.clone()), UsageEvent::new("resume", "PageView"));

    service.handle(&Trigger::empty());
    service.handle(&Trigger::empty());

    let events = sink.events();
    assert_eq!(2, events.len());
    assert_eq!("resume", events[0].namespace);
    assert_eq!("PageView", events[0].name);
    assert_eq!(1, events[0].value);
}

#[test]
fn usage_event_not_emitted_on_failure() {
    let sink = Arc::new(RecordingSink::new());
    let service = CounterService::new(BoxedStorage::new(FailingStorage), "visitors")
        .with_sink(BoxedSink::new(sink.clone()), UsageEvent::default());

    service.handle(&Trigger::empty());

    assert!(sink.events().is_empty());
}

#[test]
fn invocation_events_are_logged() {
    let logger = Arc::new(TestLogger::new());
    let service = service_with_memory()
        .with_logger(BoxLogger::new(logger.clone()));

    service.handle(&Trigger::empty());

    let events = logger.events();
    assert_eq!(1, events.len());
    assert_eq!(InvocationOutcome::Success { count: 1 }, events[0].outcome);

    let failing = CounterService::new(BoxedStorage::new(FailingStorage), "visitors")
        .with_logger(BoxLogger::new(logger.clone()));
    failing.handle(&Trigger::empty());

    let events = logger.events();
    assert_eq!(2, events.len());
    assert_eq!(InvocationOutcome::StorageFailure, events[1].outcome);
}

#[test]
fn sqlite_increment_bootstrap_and_sequence() {
    let storage = SqliteStorage::in_memory(SqliteSchema::new("visits")).unwrap();

    assert_eq!(None, storage.current("visitors").unwrap());
    assert_eq!(1, storage.increment("visitors").unwrap());
    assert_eq!(2, storage.increment("visitors").unwrap());
    assert_eq!(3, storage.increment("visitors").unwrap());
    assert_eq!(Some(3), storage.current("visitors").unwrap());
    assert_eq!(None, storage.current("some-other-key").unwrap());
}

#[test]
fn sqlite_custom_identifiers() {
    let schema = SqliteSchema::new("resume_counters")
        .with_key_column("record_id")
        .with_count_column("visit_count");
    let storage = SqliteStorage::in_memory(schema).unwrap();

    assert_eq!(1, storage.increment("visitors").unwrap());
    assert_eq!(Some(1), storage.current("visitors").unwrap());
}

#[test]
fn sqlite_rejects_invalid_identifiers() {
    let result = SqliteStorage::in_memory(SqliteSchema::new("visits; drop table visits"));
    match result {
        Err(SqliteStorageConnectionError::InvalidIdentifier { .. }) => {},
        other => panic!("expected InvalidIdentifier error, got: {other:?}"),
    }
}

#[test]
fn sqlite_counter_service_end_to_end() {
    let storage = SqliteStorage::in_memory(SqliteSchema::new("visits")).unwrap();
    let service = CounterService::new(BoxedStorage::new(storage.clone()), "visitors");

    assert_eq!(1, count_of(&service.handle(&Trigger::empty())));
    assert_eq!(2, count_of(&service.handle(&Trigger::empty())));
    assert_eq!(Some(2), storage.current("visitors").unwrap());
}

#[test]
fn config_defaults() {
    let config = ServerConfig::parse(b"
counter:
  storage:
    type: sqlite
    table: visits
").unwrap();

    assert_eq!(8080, config.http_port);
    assert_eq!(8081, config.metrics_port);
    assert_eq!("visitors", config.counter.key);
    assert!(config.metrics.is_none());
    assert!(config.logger.is_none());

    match &config.counter.storage {
        StorageConfig::Sqlite { path, table, key_column, count_column } => {
            assert_eq!("data/counter.db", path);
            assert_eq!("visits", table);
            assert_eq!("pk", key_column);
            assert_eq!("visitCount", count_column);
        },
        other => panic!("expected sqlite storage config, got: {other:?}"),
    }
}

#[test]
fn config_without_store_identifier_is_fatal() {
    let result = ServerConfig::parse(b"
counter:
  storage:
    type: sqlite
");
    match result {
        Err(ConfigError::FailedToParse(_)) => {},
        other => panic!("expected FailedToParse error, got: {other:?}"),
    }
}

#[test]
fn config_rejects_invalid_identifier() {
    let result = ServerConfig::parse(b"
counter:
  storage:
    type: sqlite
    table: \"visits; drop table visits\"
");
    match result {
        Err(ConfigError::InvalidIdentifier { identifier }) => assert_eq!("visits; drop table visits", identifier),
        other => panic!("expected InvalidIdentifier error, got: {other:?}"),
    }
}

struct ConfigCleanupGuard;

impl Drop for ConfigCleanupGuard {
    fn drop(&mut self) {
        fs::remove_file("data/test-config.yaml").unwrap();
    }
}

#[test]
fn config_paths_resolve_against_config_directory() {
    fs::create_dir_all("data").unwrap();
    fs::write("data/test-config.yaml", "counter:\n  storage:\n    type: sqlite\n    table: visits\n").unwrap();
    let _guard = ConfigCleanupGuard;

    let config = ServerConfig::load(current_dir().unwrap().join("data/test-config.yaml")).unwrap();

    assert_eq!(
        current_dir().unwrap().join("data").join("data/counter.db"),
        config.resolve_path("data/counter.db")
    );
}

#[test]
fn config_metrics_section() {
    let config = ServerConfig::parse(b"
counter:
  key: hits
  storage:
    type: memory
metrics:
  namespace: resume
  name: PageView
  sink:
    type: http
    endpoint: http://localhost:9000/events
").unwrap();

    let metrics = config.metrics.unwrap();
    assert_eq!("resume", metrics.namespace);
    assert_eq!("PageView", metrics.name);
    match metrics.sink {
        SinkConfig::Http { endpoint } => assert_eq!("http://localhost:9000/events", endpoint),
        other => panic!("expected http sink config, got: {other:?}"),
    }
}

#[test]
fn config_metrics_sink_defaults_to_prometheus() {
    let config = ServerConfig::parse(b"
counter:
  storage:
    type: memory
metrics: {}
").unwrap();

    match config.metrics.unwrap().sink {
        SinkConfig::Prometheus => {},
        other => panic!("expected prometheus sink config, got: {other:?}"),
    }
}

#[test]
fn service_built_from_config() {
    let config = ServerConfig::parse(b"
counter:
  storage:
    type: memory
metrics:
  sink:
    type: noop
logger:
  type: noop
").unwrap();

    let metrics = Metrics::new();
    let service = build_service(&config, &metrics).unwrap();

    assert_eq!(1, count_of(&service.handle(&Trigger::empty())));
    assert_eq!(2, count_of(&service.handle(&Trigger::empty())));
}

#[test]
fn prometheus_sink_shows_up_in_encoded_registry() {
    let metrics = Metrics::new();
    let sink = metrics.usage_sink();

    sink.record(UsageEvent::default()).unwrap();
    sink.record(UsageEvent::default()).unwrap();

    let encoded = metrics.encode().unwrap();
    assert!(encoded.contains("usage_events_total"));
    assert!(encoded.contains("page_view"));
    assert!(encoded.contains(" 2"));
}

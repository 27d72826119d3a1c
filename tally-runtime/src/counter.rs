use {
    std::time::Instant,
    tracing::error,
    tally_core::{Trigger, Envelope, CountBody, HEADER_CONTENT_TYPE, HEADER_ALLOW_ORIGIN, CONTENT_TYPE_JSON},
    crate::{
        kv::{BoxedStorage, CounterStorage},
        logs::{BoxLogger, NoopLogger, Logger, InvocationEvent, InvocationOutcome},
        metrics::{BoxedSink, MetricSink, UsageEvent},
    },
};

pub const DEFAULT_COUNTER_KEY: &str = "visitors";

const RESPONSE_BODY_INTERNAL_ERROR: &str = "{\"message\":\"Internal server error\"}";

/// The counter handler. Stateless per invocation: all counter state lives in
/// the storage backend, everything held here is immutable configuration and
/// long-lived handles shared read-only across concurrent invocations.
pub struct CounterService {
    storage: BoxedStorage,
    key: String,
    sink: Option<BoxedSink>,
    usage_event: UsageEvent,
    logger: BoxLogger,
}

impl CounterService {
    pub fn new(storage: BoxedStorage, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            sink: None,
            usage_event: UsageEvent::default(),
            logger: BoxLogger::new(NoopLogger::new()),
        }
    }

    pub fn with_sink(mut self, sink: BoxedSink, usage_event: UsageEvent) -> Self {
        self.sink = Some(sink);
        self.usage_event = usage_event;
        self
    }

    pub fn with_logger(mut self, logger: BoxLogger) -> Self {
        self.logger = logger;
        self
    }

    /// One invocation: a single atomic increment against the store, then a
    /// structured response. Never fails past this boundary; any storage error
    /// is logged here and translated to the generic failure envelope.
    pub fn handle(&self, _trigger: &Trigger) -> Envelope {
        let started_at = Instant::now();

        match self.storage.increment(&self.key) {
            Ok(count) => {
                let envelope = response_success(count);
                self.emit_usage();
                self.log_invocation(InvocationOutcome::Success { count }, started_at);
                envelope
            },
            Err(err) => {
                error!("failed to increment counter: {err:?}");
                self.log_invocation(InvocationOutcome::StorageFailure, started_at);
                response_internal_error()
            }
        }
    }

    // runs outside the success/failure decision: a sink outage must never
    // turn a successful increment into a reported failure.
    fn emit_usage(&self) {
        let sink = match self.sink.as_ref() {
            Some(v) => v,
            None => return,
        };
        if let Err(err) = sink.record(self.usage_event.clone()) {
            error!("failed to record usage event: {err:?}");
        }
    }

    fn log_invocation(&self, outcome: InvocationOutcome, started_at: Instant) {
        self.logger.log(InvocationEvent {
            outcome,
            total_time_millis: started_at.elapsed().as_millis() as u64,
        });
    }
}

fn response_success(count: u64) -> Envelope {
    let body = match serde_json::to_string(&CountBody { count }) {
        Ok(v) => v,
        Err(err) => {
            error!("failed to encode count body: {err:?}");
            return response_internal_error();
        }
    };

    Envelope::new(200)
        .with_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)
        .with_header(HEADER_ALLOW_ORIGIN, "*")
        .with_body(body)
}

pub(crate) fn response_internal_error() -> Envelope {
    Envelope::new(500)
        .with_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON)
        .with_body(RESPONSE_BODY_INTERNAL_ERROR)
}

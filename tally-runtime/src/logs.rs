use {
    std::sync::Arc,
    serde::{Serialize, Deserialize},
};

/// One record per handler invocation, delivered to the configured logger.
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct InvocationEvent {
    pub outcome: InvocationOutcome,
    pub total_time_millis: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub enum InvocationOutcome {
    Success {
        count: u64,
    },
    StorageFailure,
}

pub trait Logger {
    fn log(&self, event: InvocationEvent);
}

pub struct BoxLogger {
    inner: Box<dyn Logger + Send + Sync>,
}

impl BoxLogger {
    pub fn new<T: Logger + Send + Sync + 'static>(inner: T) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }
}

impl Logger for BoxLogger {
    fn log(&self, event: InvocationEvent) {
        self.inner.log(event)
    }
}

pub struct StdoutLogger {}

impl StdoutLogger {
    pub fn new() -> Self {
        Self {}
    }
}

impl Logger for StdoutLogger {
    fn log(&self, event: InvocationEvent) {
        println!("tally | {event:?}");
    }
}

pub struct NoopLogger {}

impl NoopLogger {
    pub fn new() -> Self {
        Self {}
    }
}

impl Logger for NoopLogger {
    fn log(&self, _event: InvocationEvent) {}
}

impl<T: Logger> Logger for Arc<T> {
    fn log(&self, event: InvocationEvent) {
        self.as_ref().log(event);
    }
}

use {
    std::sync::{Arc, Mutex, atomic::{AtomicBool, Ordering}},
    tally_runtime::{
        kv::{CounterStorage, MemoryStorage, StorageError},
        logs::{Logger, InvocationEvent},
        metrics::{MetricSink, MetricsError, UsageEvent},
    },
};

pub struct TestLogger {
    events: Mutex<Vec<InvocationEvent>>,
}

impl TestLogger {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<InvocationEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Logger for TestLogger {
    fn log(&self, event: InvocationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct RecordingSink {
    events: Mutex<Vec<UsageEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<UsageEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MetricSink for RecordingSink {
    fn record(&self, event: UsageEvent) -> Result<(), MetricsError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub struct FailingSink;

impl MetricSink for FailingSink {
    fn record(&self, _event: UsageEvent) -> Result<(), MetricsError> {
        Err(MetricsError::FailedToRecord { reason: "sink made unavailable for this test".to_owned() })
    }
}

pub struct FailingStorage;

impl CounterStorage for FailingStorage {
    fn increment(&self, _key: &str) -> Result<u64, StorageError> {
        Err(StorageError::InternalError { description: "backend made unavailable for this test".to_owned() })
    }

    fn current(&self, _key: &str) -> Result<Option<u64>, StorageError> {
        Err(StorageError::InternalError { description: "backend made unavailable for this test".to_owned() })
    }
}

/// Memory-backed storage whose write path can be switched off to simulate a
/// backend outage. Reads stay up so tests can verify the record afterwards.
#[derive(Clone, Default)]
pub struct OutageStorage {
    inner: MemoryStorage,
    outage: Arc<AtomicBool>,
}

impl OutageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outage(&self, outage: bool) {
        self.outage.store(outage, Ordering::SeqCst);
    }
}

impl CounterStorage for OutageStorage {
    fn increment(&self, key: &str) -> Result<u64, StorageError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StorageError::InternalError { description: "simulated backend outage".to_owned() });
        }
        self.inner.increment(key)
    }

    fn current(&self, key: &str) -> Result<Option<u64>, StorageError> {
        self.inner.current(key)
    }
}

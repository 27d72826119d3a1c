use {
    std::{convert::Infallible, net::SocketAddr, pin::Pin, sync::Arc},
    tracing::{info, error},
    tokio::{net::TcpListener, sync::mpsc},
    hyper::{Request, body::{Incoming, Bytes}, Response, server::conn::http1, http::StatusCode},
    hyper_util::rt::{TokioIo, TokioTimer},
    http_body_util::Full,
    thiserror::Error,
    serde::Serialize,
    prometheus::{
        TextEncoder,
        Registry,
        IntGauge,
        IntCounter,
        IntCounterVec,
        register_int_gauge_with_registry,
        register_int_counter_with_registry,
        register_int_counter_vec_with_registry,
    },
};

pub const DEFAULT_METRIC_NAMESPACE: &str = "tally";
pub const DEFAULT_METRIC_NAME: &str = "page_view";

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub(crate) http_requests_total: IntCounter,
    pub(crate) http_requests_in_flight: IntGauge,
    usage_events_total: IntCounterVec,
}

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("failed to collect: {reason}")]
    FailedToCollect {
        reason: String,
    },

    #[error("failed to record usage event: {reason}")]
    FailedToRecord {
        reason: String,
    },
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = register_int_counter_with_registry!("http_requests_total", "total http requests processed", registry).unwrap();
        let http_requests_in_flight = register_int_gauge_with_registry!("http_requests_in_flight", "http requests being processed", registry).unwrap();
        let usage_events_total = register_int_counter_vec_with_registry!("usage_events_total", "usage events recorded by the local sink", &["namespace", "name"], registry).unwrap();

        Self {
            http_requests_total,
            http_requests_in_flight,
            usage_events_total,
            registry,
        }
    }

    pub fn encode(&self) -> Result<String, MetricsError> {
        let metrics = self.registry.gather();
        let encoder = TextEncoder::new();
        encoder.encode_to_string(&metrics)
            .map_err(|err| MetricsError::FailedToCollect { reason: format!("{err:?}") })
    }

    /// Usage sink backed by this registry.
    pub fn usage_sink(&self) -> PrometheusSink {
        PrometheusSink {
            usage_events_total: self.usage_events_total.clone(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// One counted unit of usage, tagged with a fixed namespace and metric name.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct UsageEvent {
    pub namespace: String,
    pub name: String,
    pub value: u64,
}

impl UsageEvent {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            value: 1,
        }
    }
}

impl Default for UsageEvent {
    fn default() -> Self {
        Self::new(DEFAULT_METRIC_NAMESPACE, DEFAULT_METRIC_NAME)
    }
}

/// Fire-and-forget target for usage events. Callers log and discard the
/// error; a sink failure must never change an already-built response.
pub trait MetricSink {
    fn record(&self, event: UsageEvent) -> Result<(), MetricsError>;
}

#[derive(Clone)]
pub struct BoxedSink {
    inner: Arc<Box<dyn MetricSink + Send + Sync>>,
}

impl BoxedSink {
    pub fn new<T: MetricSink + Send + Sync + 'static>(inner: T) -> Self {
        Self {
            inner: Arc::new(Box::new(inner)),
        }
    }
}

impl MetricSink for BoxedSink {
    fn record(&self, event: UsageEvent) -> Result<(), MetricsError> {
        self.inner.record(event)
    }
}

impl<T: MetricSink> MetricSink for Arc<T> {
    fn record(&self, event: UsageEvent) -> Result<(), MetricsError> {
        self.as_ref().record(event)
    }
}

pub struct NoopSink;

impl MetricSink for NoopSink {
    fn record(&self, _event: UsageEvent) -> Result<(), MetricsError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct PrometheusSink {
    usage_events_total: IntCounterVec,
}

impl MetricSink for PrometheusSink {
    fn record(&self, event: UsageEvent) -> Result<(), MetricsError> {
        self.usage_events_total.with_label_values(&[&event.namespace, &event.name]).inc_by(event.value);
        Ok(())
    }
}

/// Pushes usage events to an external ingestion endpoint. `record` only
/// enqueues; a background task owns the connection and drains the queue, so
/// event delivery never blocks an invocation.
pub struct HttpSink {
    tx: mpsc::Sender<UsageEvent>,
    _publisher_task: tokio::task::JoinHandle<()>,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        let (tx, mut rx) = mpsc::channel(1024);
        let publisher_task = tokio::task::spawn(async move {
            info!("publishing usage events to {endpoint}");
            let client = reqwest::Client::new();

            loop {
                let event: UsageEvent = match rx.recv().await {
                    Some(v) => v,
                    None => break,
                };

                match client.post(&endpoint).json(&event).send().await {
                    Ok(response) => if !response.status().is_success() {
                        error!("metrics sink rejected usage event: {}", response.status());
                    },
                    Err(err) => error!("failed to push usage event: {err:?}"),
                }
            }
        });

        Self {
            tx,
            _publisher_task: publisher_task,
        }
    }
}

impl MetricSink for HttpSink {
    fn record(&self, event: UsageEvent) -> Result<(), MetricsError> {
        self.tx.try_send(event)
            .map_err(|err| MetricsError::FailedToRecord { reason: format!("usage event queue unavailable: {err:?}") })
    }
}

pub async fn run_metrics_server(metrics: Metrics, port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = match TcpListener::bind(addr).await {
        Ok(v) => v,
        Err(err) => {
            error!("failed to create TcpListener for metrics server: {err:?}");
            return;
        }
    };

    info!("running metrics server on {addr:?}");

    let metrics_server = MetricsServer::new(metrics);

    loop {
        let (tcp, _) = match listener.accept().await {
            Ok(v) => v,
            Err(err) => {
                error!("failed to accept connection in metrics server: {err:?}");
                continue;
            }
        };
        let io = TokioIo::new(tcp);
        let metrics_server = metrics_server.clone();
        tokio::task::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .timer(TokioTimer::new())
                .serve_connection(io, metrics_server)
                .await {
                    error!("error while handling metrics request: {err:?}");
                }
        });
    }
}

#[derive(Clone)]
struct MetricsServer {
    metrics: Metrics,
}

impl MetricsServer {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            metrics,
        }
    }
}

impl hyper::service::Service<Request<Incoming>> for MetricsServer {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, _req: Request<Incoming>) -> Self::Future {
        let metrics = match self.metrics.encode() {
            Ok(v) => v,
            Err(err) => {
                error!("failed to encode metrics: {err:?}");
                return Box::pin(async move {
                    let mut response = Response::new(Full::new(Bytes::from("internal server error.\n")));
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                    Ok(response)
                });
            }
        };
        Box::pin(async move { Ok(Response::new(Full::new(Bytes::from(metrics)))) })
    }
}

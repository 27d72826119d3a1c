use {
    std::{net::SocketAddr, sync::Arc},
    tokio::net::TcpListener,
    tracing::{info, error},
    thiserror::Error,
    hyper::server::conn::http1,
    hyper_util::rt::{TokioIo, TokioTimer},
    crate::{
        config::{ServerConfig, StorageConfig, SinkConfig, LoggerConfig},
        counter::CounterService,
        kv::{BoxedStorage, SqliteStorage, SqliteSchema, MemoryStorage, SqliteStorageConnectionError},
        logs::{BoxLogger, StdoutLogger, NoopLogger},
        metrics::{Metrics, BoxedSink, HttpSink, NoopSink, UsageEvent, run_metrics_server},
        http::HttpHandler,
    },
};

pub struct TallyServer {
    config: ServerConfig,
    service: Arc<CounterService>,
    metrics: Metrics,
}

#[derive(Error, Debug)]
pub enum ServerInitError {
    #[error("failed to open counter storage: {0:?}")]
    StorageInitError(SqliteStorageConnectionError),
}

impl TallyServer {
    pub fn new(config: ServerConfig) -> Result<Self, ServerInitError> {
        let metrics = Metrics::new();
        let service = Arc::new(build_service(&config, &metrics)?);

        Ok(Self {
            config,
            service,
            metrics,
        })
    }

    pub async fn serve(&self) {
        info!("starting tally server");

        tokio::join!(
            self.run_http_listener(),
            run_metrics_server(self.metrics.clone(), self.config.metrics_port),
        );
    }

    async fn run_http_listener(&self) {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.http_port).into();
        let listener = match TcpListener::bind(addr).await {
            Ok(v) => v,
            Err(err) => {
                error!("failed to bind tcp listener for http server: {err:?}");
                return;
            }
        };

        info!("started http server on {addr:?}");

        let handler = HttpHandler::new(self.service.clone(), self.metrics.clone());

        loop {
            let (tcp, _) = match listener.accept().await {
                Ok(v) => v,
                Err(err) => {
                    error!("failed to accept http connection: {err:?}");
                    continue;
                }
            };
            let io = TokioIo::new(tcp);

            let handler = handler.clone();
            tokio::task::spawn(async move {
                if let Err(err) = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .serve_connection(io, handler)
                    .await {
                        error!("error while handling http request: {err:?}");
                    }
            });
        }
    }
}

pub fn build_service(config: &ServerConfig, metrics: &Metrics) -> Result<CounterService, ServerInitError> {
    let storage = build_storage(config)?;

    let mut service = CounterService::new(storage, config.counter.key.clone())
        .with_logger(create_logger(config.logger.as_ref()));

    if let Some(metrics_config) = config.metrics.as_ref() {
        let sink = match &metrics_config.sink {
            SinkConfig::Prometheus => BoxedSink::new(metrics.usage_sink()),
            SinkConfig::Http { endpoint } => BoxedSink::new(HttpSink::new(endpoint.clone())),
            SinkConfig::Noop => BoxedSink::new(NoopSink),
        };
        service = service.with_sink(sink, UsageEvent::new(metrics_config.namespace.clone(), metrics_config.name.clone()));
    }

    Ok(service)
}

fn build_storage(config: &ServerConfig) -> Result<BoxedStorage, ServerInitError> {
    Ok(match &config.counter.storage {
        StorageConfig::Sqlite { path, table, key_column, count_column } => {
            let schema = SqliteSchema::new(table.clone())
                .with_key_column(key_column.clone())
                .with_count_column(count_column.clone());
            let storage = if path == ":memory:" {
                SqliteStorage::in_memory(schema)
            } else {
                SqliteStorage::new(config.resolve_path(path), schema)
            }.map_err(ServerInitError::StorageInitError)?;
            BoxedStorage::new(storage)
        },
        StorageConfig::Memory => BoxedStorage::new(MemoryStorage::new()),
    })
}

fn create_logger(config: Option<&LoggerConfig>) -> BoxLogger {
    match config {
        None | Some(LoggerConfig::Stdout) => BoxLogger::new(StdoutLogger::new()),
        Some(LoggerConfig::Noop) => BoxLogger::new(NoopLogger::new()),
    }
}

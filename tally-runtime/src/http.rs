use {
    std::{convert::Infallible, sync::Arc},
    tracing::error,
    tokio::sync::oneshot,
    hyper::{Request, Response, body::{Incoming, Bytes}, http::StatusCode, header::{HeaderName, HeaderValue}},
    http_body_util::Full,
    futures::future::BoxFuture,
    prometheus::IntGauge,
    tally_core::{Trigger, Envelope},
    crate::{counter::{CounterService, response_internal_error}, metrics::Metrics},
};

/// Invocation boundary: every http request is exactly one handler invocation,
/// request contents are never inspected.
#[derive(Clone)]
pub struct HttpHandler {
    service: Arc<CounterService>,
    metrics: Metrics,
}

impl HttpHandler {
    pub fn new(service: Arc<CounterService>, metrics: Metrics) -> Self {
        Self {
            service,
            metrics,
        }
    }
}

impl hyper::service::Service<Request<Incoming>> for HttpHandler {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn call(&self, _req: Request<Incoming>) -> Self::Future {
        self.metrics.http_requests_in_flight.inc();
        let metric_guard_in_flight = MetricGaugeDecreaseGuard::wrap(self.metrics.http_requests_in_flight.clone());

        // storage calls block, so the invocation runs off the accept loop and
        // replies through a oneshot channel.
        let (tx, rx) = oneshot::channel();
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || {
            let envelope = service.handle(&Trigger::empty());
            if tx.send(envelope).is_err() {
                error!("http connection dropped before the response was ready");
            }
        });

        let metrics = self.metrics.clone();
        Box::pin(async move {
            let envelope = match rx.await {
                Ok(v) => v,
                Err(err) => {
                    error!("counter invocation dropped its reply channel: {err:?}");
                    response_internal_error()
                }
            };

            let response = envelope_to_response(envelope);
            metrics.http_requests_total.inc();
            drop(metric_guard_in_flight);
            Ok(response)
        })
    }
}

fn envelope_to_response(envelope: Envelope) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(envelope.body)));
    *response.status_mut() = StatusCode::from_u16(envelope.status_code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in &envelope.headers {
        match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            },
            _ => error!("failed to encode response header: {name}"),
        }
    }

    response
}

struct MetricGaugeDecreaseGuard {
    gauge: IntGauge,
}

impl MetricGaugeDecreaseGuard {
    fn wrap(gauge: IntGauge) -> Self {
        Self { gauge }
    }
}

impl Drop for MetricGaugeDecreaseGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

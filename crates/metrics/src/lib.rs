//! Metrics and tracing setup for weathervane.
//!
//! Provides a global [`AggregatorMetrics`] singleton backed by the
//! `prometheus` crate, plus an optional lightweight HTTP server for
//! Prometheus scraping.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::OnceLock;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// Global metrics instance.
static METRICS: OnceLock<AggregatorMetrics> = OnceLock::new();

/// Retrieve (or lazily create) the global metrics singleton.
pub fn metrics() -> &'static AggregatorMetrics {
    METRICS.get_or_init(AggregatorMetrics::new)
}

/// All Prometheus metrics for a weathervane aggregator.
pub struct AggregatorMetrics {
    pub registry: Registry,

    // ── Connection counters ──
    pub connections_accepted: IntCounter,
    pub connections_open: IntGauge,

    // ── Request counters ──
    pub requests_by_method: IntCounterVec,
    pub responses_by_status: IntCounterVec,

    // ── Record lifecycle ──
    pub puts_admitted: IntCounter,
    pub records_expired: IntCounter,
    pub records_dropped_on_disconnect: IntCounter,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for AggregatorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregatorMetrics").finish_non_exhaustive()
    }
}

impl AggregatorMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let connections_accepted = IntCounter::with_opts(Opts::new(
            "weathervane_connections_accepted_total",
            "Total TCP connections accepted",
        ))
        .expect("connections_accepted counter");
        let connections_open = IntGauge::with_opts(Opts::new(
            "weathervane_connections_open",
            "Currently open connections",
        ))
        .expect("connections_open gauge");

        let requests_by_method = IntCounterVec::new(
            Opts::new(
                "weathervane_requests_total",
                "Inbound requests received, by method",
            ),
            &["method"],
        )
        .expect("requests_by_method counter vec");
        let responses_by_status = IntCounterVec::new(
            Opts::new(
                "weathervane_responses_total",
                "Responses sent, by status code",
            ),
            &["status"],
        )
        .expect("responses_by_status counter vec");

        let puts_admitted = IntCounter::with_opts(Opts::new(
            "weathervane_puts_admitted_total",
            "PUT requests that passed validation and bumped the update counter",
        ))
        .expect("puts_admitted counter");
        let records_expired = IntCounter::with_opts(Opts::new(
            "weathervane_records_expired_total",
            "Records removed by the expiry sweep",
        ))
        .expect("records_expired counter");
        let records_dropped_on_disconnect = IntCounter::with_opts(Opts::new(
            "weathervane_records_dropped_on_disconnect_total",
            "Records removed because their last writer disconnected",
        ))
        .expect("records_dropped_on_disconnect counter");

        // Register all metrics
        registry
            .register(Box::new(connections_accepted.clone()))
            .expect("register connections_accepted");
        registry
            .register(Box::new(connections_open.clone()))
            .expect("register connections_open");
        registry
            .register(Box::new(requests_by_method.clone()))
            .expect("register requests_by_method");
        registry
            .register(Box::new(responses_by_status.clone()))
            .expect("register responses_by_status");
        registry
            .register(Box::new(puts_admitted.clone()))
            .expect("register puts_admitted");
        registry
            .register(Box::new(records_expired.clone()))
            .expect("register records_expired");
        registry
            .register(Box::new(records_dropped_on_disconnect.clone()))
            .expect("register records_dropped_on_disconnect");

        Self {
            registry,
            connections_accepted,
            connections_open,
            requests_by_method,
            responses_by_status,
            puts_admitted,
            records_expired,
            records_dropped_on_disconnect,
        }
    }
}

/// Encode all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let m = metrics();
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder
        .encode(&m.registry.gather(), &mut buf)
        .expect("prometheus text encoding");
    String::from_utf8(buf).expect("prometheus output is valid UTF-8")
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let body = encode_metrics();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid HTTP response"))
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────

//! Prometheus metrics for the mapsync server.
//!
//! This module provides:
//! - Metrics registry with counters and gauges
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Prometheus metrics for the mapsync server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Handshakes by outcome (`accepted` or a disconnect reason).
    pub handshakes_total: CounterVec,
    /// Packets received after the handshake, by packet name.
    pub packets_received_total: CounterVec,
    /// Frames skipped because their packet id is not registered.
    pub packets_skipped_total: Counter,
    /// Tiles queued for delivery to other sessions.
    pub tiles_relayed_total: Counter,
    /// Sessions past the handshake.
    pub sessions_active: Gauge,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "mapsync_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "mapsync_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Handshakes
        let handshakes_total = CounterVec::new(
            Opts::new("mapsync_handshakes_total", "Total handshakes by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(handshakes_total.clone()))?;

        // Packets
        let packets_received_total = CounterVec::new(
            Opts::new(
                "mapsync_packets_received_total",
                "Total packets received by packet type",
            ),
            &["packet"],
        )?;
        registry.register(Box::new(packets_received_total.clone()))?;

        let packets_skipped_total = Counter::with_opts(Opts::new(
            "mapsync_packets_skipped_total",
            "Total frames skipped for an unknown packet id",
        ))?;
        registry.register(Box::new(packets_skipped_total.clone()))?;

        // Relay
        let tiles_relayed_total = Counter::with_opts(Opts::new(
            "mapsync_tiles_relayed_total",
            "Total tiles queued for other sessions",
        ))?;
        registry.register(Box::new(tiles_relayed_total.clone()))?;

        let sessions_active = Gauge::with_opts(Opts::new(
            "mapsync_sessions_active",
            "Number of sessions that completed the handshake",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            handshakes_total,
            packets_received_total,
            packets_skipped_total,
            tiles_relayed_total,
            sessions_active,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    Ok(route(req.uri().path(), &metrics))
}

fn route(path: &str, metrics: &Metrics) -> Response<Full<Bytes>> {
    match path {
        "/metrics" => match metrics.encode() {
            Ok(body) => {
                let mut response = text_response(StatusCode::OK, body);
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(
                        "text/plain; version=0.0.4; charset=utf-8",
                    ),
                );
                response
            }
            Err(e) => {
                tracing::error!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
            }
        },
        "/health" | "/healthz" => text_response(StatusCode::OK, "OK"),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

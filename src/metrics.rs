//! Lightweight HTTP server exposing Prometheus metrics on `/metrics`.
//!
//! Adapted from the source toolkit's `utils::metrics`: a hyper server on its
//! own Tokio task, serving whatever the global [`prometheus`] registry has
//! accumulated. The counters below are this crate's own — message
//! throughput, retries, DLQ outcomes, and error-channel drops — registered
//! once via `lazy_static`.

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use lazy_static::lazy_static;
use log::{error, warn};
use prometheus::{register_int_counter, IntCounter};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

static NOTFOUND: &[u8] = b"404: Not Found";

lazy_static! {
    pub static ref MESSAGES_PROCESSED: IntCounter = register_int_counter!(
        "streamforge_messages_processed_total",
        "Messages whose terminal outcome was a commit"
    )
    .unwrap();
    pub static ref MESSAGES_RETRIED: IntCounter = register_int_counter!(
        "streamforge_retry_attempts_total",
        "Handler retry attempts made"
    )
    .unwrap();
    pub static ref DLQ_PUBLISHED: IntCounter = register_int_counter!(
        "streamforge_dlq_published_total",
        "Messages handed to the DLQ strategy after retries were exhausted"
    )
    .unwrap();
    pub static ref DLQ_FAILED: IntCounter = register_int_counter!(
        "streamforge_dlq_failed_total",
        "DLQ strategy invocations that themselves failed"
    )
    .unwrap();
    pub static ref HANDLER_PANICS: IntCounter = register_int_counter!(
        "streamforge_handler_panics_total",
        "Handler panics recovered by the worker pool"
    )
    .unwrap();
    pub static ref ERRORS_DROPPED: IntCounter = register_int_counter!(
        "streamforge_errors_dropped_total",
        "Errors dropped by a full error channel"
    )
    .unwrap();
}

/// Errors that can occur while running the metrics server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetricsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),
}

/// Starts the metrics server on `port`, returning a [`JoinHandle`] the
/// caller may await or abort.
pub fn start_http_server(port: u16) -> JoinHandle<Result<(), MetricsError>> {
    let server = MetricsServer { port };
    tokio::spawn(async move {
        let result = server.run_server().await;
        warn!("metrics HTTP server stopped: {:?}", result);
        result
    })
}

struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    async fn run_server(&self) -> Result<(), MetricsError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;

        loop {
            let (stream, _) = listener.accept().await?;
            self.handle_connection(stream).await;
        }
    }

    async fn handle_connection(&self, stream: tokio::net::TcpStream) {
        let io = TokioIo::new(stream);
        let service = service_fn(|req| self.routes(req));
        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            error!("failed to serve metrics connection: {:?}", err);
        }
    }

    async fn routes(&self, req: Request<Incoming>) -> Result<Response<BoxBody>, MetricsError> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/metrics") => self.get_metrics(),
            _ => not_found(),
        }
    }

    fn get_metrics(&self) -> Result<Response<BoxBody>, MetricsError> {
        let encoder = prometheus::TextEncoder::new();
        let body = encoder
            .encode_to_string(&prometheus::gather())
            .unwrap_or_default();
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(full(body))?)
    }
}

fn not_found() -> Result<Response<BoxBody>, MetricsError> {
    Ok(Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(full(NOTFOUND))?)
}

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

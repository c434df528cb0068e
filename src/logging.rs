use axum::{
    body::Body,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::panic;
use tracing::{error, info, info_span, Instrument};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::constants::{DEFAULT_LOG_FILTER, LOG_FILE_PREFIX, REQUEST_ID_HEADER};
use crate::redaction::RedactingWriter;
use crate::streaming::RelayState;
use crate::types::RequestId;

/// Installs the global subscriber: stdout plus a daily-rolling file, both
/// redacted. Keep the guard alive for the life of the process.
pub fn init_tracing(log_dir: &str) -> WorkerGuard {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::new(DEFAULT_LOG_FILTER),
    };

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("Failed to create log directory {}: {}", log_dir, e);
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(RedactingWriter::new(file_appender));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(|| RedactingWriter::new(std::io::stdout())))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(tracing_error::ErrorLayer::default())
        .init();

    guard
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = match panic_info.location() {
            Some(l) => format!("{}:{}:{}", l.file(), l.line(), l.column()),
            None => "unknown location".to_string(),
        };

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Tags each request with an id, runs it inside a `request` span and echoes
/// the id back in `x-request-id`.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = RequestId::generate();
    if let Ok(val) = HeaderValue::from_str(&request_id.0) {
        req.headers_mut().insert(REQUEST_ID_HEADER, val);
    }

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path()
    );
    let mut response = next.run(req).instrument(span).await;
    if let Ok(val) = HeaderValue::from_str(&request_id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, val);
    }
    response
}

/// Per-relay counters, logged once when the relay ends.
#[derive(Debug, Default, Clone)]
pub struct RelayMetric {
    pub deltas: usize,
    pub noise: usize,
    pub text_chars: usize,
}

impl RelayMetric {
    pub fn record_delta(&mut self, content: &str) {
        self.deltas += 1;
        self.text_chars += content.chars().count();
    }

    pub fn record_noise(&mut self) {
        self.noise += 1;
    }

    pub fn log_summary(&self, state: RelayState, origin: &str) {
        info!(
            target: "relay",
            "[STREAM END] Origin: {} | State: {} | Deltas: {} | Noise: {} | Text: {} chars",
            origin,
            state.as_str(),
            self.deltas,
            self.noise,
            self.text_chars
        );
    }
}

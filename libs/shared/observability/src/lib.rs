//! Structured logging/tracing initialization and the `MetricsSink`
//! contract (§6), backed by the `prometheus` crate's text exposition
//! format. Grounded in the teacher's `init_tracing` (dual compact/JSON
//! formatting layer, global panic hook) — see DESIGN.md.

pub mod metrics;

pub use metrics::PrometheusMetricsSink;

use std::panic;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber for `service_name`.
///
/// - `RUST_LOG` takes priority; otherwise defaults to `<service>=debug` in
///   debug builds and `<service>=info` in release, with `tower_http`,
///   `hyper` and `libsql` pinned to `warn`.
/// - Debug builds get compact, human-readable output; release builds emit
///   flattened JSON events for log-pipeline ingestion.
/// - Installs a panic hook that logs the panic location and payload through
///   `tracing::error!` before the default panic behavior runs, so panics in
///   spawned tasks (health loop, job workers) are never silently lost.
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if cfg!(debug_assertions) { "debug" } else { "info" };
        format!("{service_name}={level},tower_http=warn,hyper=warn,libsql=warn").into()
    });

    if cfg!(debug_assertions) {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().flatten_event(true))
            .init();
    }

    let service = service_name.to_string();
    panic::set_hook(Box::new(move |info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string panic payload>");
        tracing::error!(target: "panic", service = %service, location = %location, "panic: {payload}");
    }));

    tracing::info!(service = %service_name, "tracing initialized");
}

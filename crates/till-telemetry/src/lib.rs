//! Tracing and metrics initialization shared by the till services.
//!
//! Call [`init`] once at the top of `main` before emitting any events,
//! then [`register_prometheus`] if the service exposes a `/metrics`
//! endpoint. Services render the returned [`PrometheusHandle`] from
//! their own HTTP routers; no side-channel listener is spawned.

use std::io::IsTerminal as _;

use eyre::WrapErr as _;
pub use metrics_exporter_prometheus::PrometheusHandle;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    filter::{
        EnvFilter,
        LevelFilter,
    },
    fmt,
    layer::SubscriberExt as _,
    registry,
    util::SubscriberInitExt as _,
};

/// Registers a global tracing subscriber.
///
/// Events are formatted for humans when stdout is a terminal and as
/// flattened JSON otherwise. `filter_directives` follows the
/// `tracing_subscriber::EnvFilter` syntax and defaults to `info` level.
///
/// # Errors
///
/// Returns an error if the filter directives fail to parse or if a
/// global subscriber is already installed.
pub fn init(filter_directives: &str) -> eyre::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(filter_directives)
        .wrap_err("failed parsing configured filter directives")?;

    let (json_log, human_log) = if std::io::stdout().is_terminal() {
        (None, Some(fmt::layer()))
    } else {
        (Some(fmt::layer().json().flatten_event(true)), None)
    };

    registry()
        .with(human_log)
        .with(json_log)
        .with(env_filter)
        .try_init()
        .wrap_err("failed initializing telemetry stack")
}

/// Installs the process-global Prometheus metrics recorder.
///
/// Returns the handle that renders the current exposition text; services
/// serve it from their `GET /metrics` route.
///
/// # Errors
///
/// Returns an error if a metrics recorder is already installed.
pub fn register_prometheus() -> eyre::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("failed installing prometheus metrics recorder")
}

use std::{
    fmt::Write as _,
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use snowbot_util::{AppConfig, Environment};

const DEFAULT_FILTER: &str = "info";
const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

const COUNTERS: &[(&str, &str)] = &[
    ("eventsub_ingress_total", "EventSub deliveries accepted, by message type"),
    ("eventsub_invalid_signature_total", "EventSub deliveries rejected as unverified, by route"),
    ("relay_messages_total", "Chat messages emitted for notifications, by kind"),
    ("relay_duplicates_total", "Notifications suppressed as immediate repeats, by kind"),
    ("chat_commands_total", "Chat commands answered, by command"),
    ("chat_messages_sent_total", "Chat lines written to the IRC connection"),
    ("user_token_exchanges_total", "Broadcaster authorization-code exchanges, by result"),
    ("reconcile_runs_total", "Subscription reconciliation attempts, by result"),
];

static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_INSTALL: Mutex<()> = Mutex::new(());
static STARTED: OnceLock<Instant> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to install prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::Json,
            Environment::Development | Environment::Test => Self::Pretty,
        }
    }
}

fn build_git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Installs the global subscriber: JSON lines in production, pretty output otherwise.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    let format = LogFormat::for_environment(config.environment);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with((format == LogFormat::Json).then(|| {
            tracing_fmt::layer()
                .with_target(false)
                .with_timer(UtcTime::rfc_3339())
                .json()
        }))
        .with((format == LogFormat::Pretty).then(|| {
            tracing_fmt::layer()
                .with_target(false)
                .with_timer(UtcTime::rfc_3339())
                .pretty()
        }))
        .try_init()?;

    tracing::info!(
        stage = "telemetry",
        env = %config.environment.as_str(),
        version = BUILD_VERSION,
        git_sha = build_git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let _install = METRICS_INSTALL
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = METRICS.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    for &(name, description) in COUNTERS {
        describe_counter!(name, description);
    }
    describe_histogram!(
        "webhook_ack_latency_seconds",
        "Seconds taken to acknowledge an EventSub delivery"
    );
    STARTED.get_or_init(Instant::now);

    Ok(METRICS.get_or_init(|| handle).clone())
}

/// Recorder output followed by the build-info and uptime gauges.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let uptime = STARTED
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();
    let _ = write!(
        body,
        "# TYPE app_build_info gauge\n\
         app_build_info{{version=\"{BUILD_VERSION}\",git=\"{}\"}} 1\n\
         # TYPE app_uptime_seconds gauge\n\
         app_uptime_seconds {uptime}\n",
        build_git_sha()
    );
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_logs_as_json() {
        assert_eq!(
            LogFormat::for_environment(Environment::Production),
            LogFormat::Json
        );
        assert_eq!(
            LogFormat::for_environment(Environment::Development),
            LogFormat::Pretty
        );
        assert_eq!(LogFormat::for_environment(Environment::Test), LogFormat::Pretty);
    }

    #[test]
    fn repeated_metrics_init_reuses_recorder() {
        init_metrics().expect("metrics init");
        let handle = init_metrics().expect("second init reuses the recorder");

        let body = render_metrics(&handle);
        assert!(body.contains(&format!("app_build_info{{version=\"{BUILD_VERSION}\"")));
        assert!(body.contains("app_uptime_seconds "));
    }
}

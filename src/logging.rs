//! # Structured Logging Module
//!
//! Environment-aware console logging using the tracing ecosystem.
//!
//! Every coordination, monitoring and notification log line carries
//! `correlation_id` as its first field so one deployment attempt can be followed
//! from admission through its final notification.
//!
//! ```bash
//! # explicit filter wins over the environment default
//! export RUST_LOG=shipyard_core=debug
//! # machine-readable output for log shippers
//! export SHIPYARD_LOG_FORMAT=json
//! ```

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ConfigManager;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// Safe to call more than once and safe to call when the host already installed a
/// global subscriber.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json_output = std::env::var("SHIPYARD_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let console_layer = if json_output {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(std::io::stdout().is_terminal())
                .with_filter(filter)
                .boxed()
        };

        if tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json_output,
            "Structured logging initialized"
        );
    });
}

/// Default log level for an environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        "staging" => "info",
        _ => "debug",
    }
}

/// Log a coordination decision or registry mutation
pub fn log_coordination_operation(
    operation: &str,
    correlation_id: Option<&str>,
    environment: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        correlation_id = correlation_id,
        operation = %operation,
        environment = %environment,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "COORDINATION_OPERATION"
    );
}

/// Log a monitor lifecycle step
pub fn log_monitor_operation(
    operation: &str,
    correlation_id: &str,
    target_name: &str,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        correlation_id = %correlation_id,
        operation = %operation,
        target_name = %target_name,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "MONITOR_OPERATION"
    );
}

/// Log a notification delivery outcome
pub fn log_notification_operation(
    operation: &str,
    correlation_id: Option<&str>,
    message_id: &str,
    kind: &str,
    attempt: u32,
    details: Option<&str>,
) {
    tracing::info!(
        correlation_id = correlation_id,
        operation = %operation,
        message_id = %message_id,
        kind = %kind,
        attempt = attempt,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "NOTIFICATION_OPERATION"
    );
}

/// Log an error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}

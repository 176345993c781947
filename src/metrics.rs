//! # Coordination Metrics
//!
//! OpenTelemetry counters for the coordination, monitoring and notification
//! layers. The library never installs an exporter: unless the host process sets a
//! global meter provider, every instrument here is a no-op.
//!
//! Instruments are built once, on first use, against the meter available at that
//! moment. Install the meter provider before starting the system.
//!
//! ```rust
//! use shipyard_core::metrics;
//! use opentelemetry::KeyValue;
//!
//! metrics::registrations_total().add(1, &[KeyValue::new("environment", "staging")]);
//! ```

use opentelemetry::metrics::{Counter, Meter};
use std::sync::OnceLock;

static SHIPYARD_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    SHIPYARD_METER.get_or_init(|| opentelemetry::global::meter("shipyard-core"))
}

fn counter(
    cell: &'static OnceLock<Counter<u64>>,
    name: &'static str,
    description: &'static str,
) -> &'static Counter<u64> {
    cell.get_or_init(|| meter().u64_counter(name).with_description(description).build())
}

// Coordination

/// Deployments admitted into an environment slot
///
/// Labels: durable
pub fn registrations_total() -> &'static Counter<u64> {
    static REGISTRATIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &REGISTRATIONS_TOTAL,
        "shipyard.coordination.registrations.total",
        "Deployments admitted into an environment slot",
    )
}

/// Registration attempts rejected because the slot was taken
///
/// Labels: environment
pub fn conflicts_total() -> &'static Counter<u64> {
    static CONFLICTS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &CONFLICTS_TOTAL,
        "shipyard.coordination.conflicts.total",
        "Registration attempts rejected with BUSY",
    )
}

/// Decisions made from the orchestrator feed because the registry was unavailable
///
/// Labels: environment
pub fn degraded_decisions_total() -> &'static Counter<u64> {
    static DEGRADED_DECISIONS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &DEGRADED_DECISIONS_TOTAL,
        "shipyard.coordination.degraded_decisions.total",
        "Admission decisions taken in degraded mode",
    )
}

/// Registry records removed by the maintenance pass
pub fn purged_records_total() -> &'static Counter<u64> {
    static PURGED_RECORDS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &PURGED_RECORDS_TOTAL,
        "shipyard.registry.purged_records.total",
        "Stale registry records purged",
    )
}

// Monitoring

/// Monitor incarnations restarted by the supervisor
///
/// Labels: target_name
pub fn monitor_restarts_total() -> &'static Counter<u64> {
    static MONITOR_RESTARTS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &MONITOR_RESTARTS_TOTAL,
        "shipyard.monitor.restarts.total",
        "Monitor restarts performed by the supervisor",
    )
}

/// Deployments flagged as stalled
///
/// Labels: target_name
pub fn stalls_total() -> &'static Counter<u64> {
    static STALLS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(&STALLS_TOTAL, "shipyard.monitor.stalls.total", "Deployments flagged as stalled")
}

/// Terminal outcomes observed by monitors
///
/// Labels: target_name, outcome
pub fn terminal_events_total() -> &'static Counter<u64> {
    static TERMINAL_EVENTS_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &TERMINAL_EVENTS_TOTAL,
        "shipyard.monitor.terminal_events.total",
        "Terminal deployment outcomes observed",
    )
}

// Notification

/// Notifications accepted by the transport
///
/// Labels: kind
pub fn notifications_delivered_total() -> &'static Counter<u64> {
    static NOTIFICATIONS_DELIVERED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &NOTIFICATIONS_DELIVERED_TOTAL,
        "shipyard.notifier.delivered.total",
        "Notifications delivered",
    )
}

/// Failed delivery attempts that were rescheduled
///
/// Labels: kind
pub fn notifications_retried_total() -> &'static Counter<u64> {
    static NOTIFICATIONS_RETRIED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &NOTIFICATIONS_RETRIED_TOTAL,
        "shipyard.notifier.retried.total",
        "Notification delivery attempts rescheduled",
    )
}

/// Notifications moved to the dead-letter set
///
/// Labels: kind, reason
pub fn notifications_dead_lettered_total() -> &'static Counter<u64> {
    static NOTIFICATIONS_DEAD_LETTERED_TOTAL: OnceLock<Counter<u64>> = OnceLock::new();
    counter(
        &NOTIFICATIONS_DEAD_LETTERED_TOTAL,
        "shipyard.notifier.dead_lettered.total",
        "Notifications that exhausted their retries",
    )
}

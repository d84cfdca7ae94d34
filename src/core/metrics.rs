//! Prometheus metrics for the mother bot, the tenant supervisor and the
//! conversation layer.

// Metric names are static; registration only fails on a duplicate name.
#![allow(clippy::expect_used)]

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec,
};

// ======================
// SUPERVISOR
// ======================

/// Tenant bots currently polling
pub static RUNNING_TENANTS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("storehub_running_tenants", "Number of tenant bots currently polling")
        .expect("register storehub_running_tenants")
});

/// Tenant lifecycle transitions
/// Labels: transition (start/stop/crash/start_failed)
pub static TENANT_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "storehub_tenant_transitions_total",
        "Tenant lifecycle transitions by kind",
        &["transition"]
    )
    .expect("register storehub_tenant_transitions_total")
});

// ======================
// EVENT PIPELINE
// ======================

/// Inbound events accepted for processing
/// Labels: scope (mother/store)
pub static EVENTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("storehub_events_total", "Inbound events by bot scope", &["scope"])
        .expect("register storehub_events_total")
});

/// Events currently queued or running per scope
pub static EVENTS_IN_FLIGHT: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "storehub_events_in_flight",
        "Events queued or running by bot scope",
        &["scope"]
    )
    .expect("register storehub_events_in_flight")
});

/// Events rejected by the membership gate
pub static GATE_REJECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "storehub_gate_rejections_total",
        "Events short-circuited by the membership gate"
    )
    .expect("register storehub_gate_rejections_total")
});

// ======================
// CONVERSATIONS
// ======================

/// Sessions dropped because their payload could not be decoded
pub static CORRUPT_SESSIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "storehub_corrupt_sessions_total",
        "Sessions cleared because the stored state was unreadable"
    )
    .expect("register storehub_corrupt_sessions_total")
});

/// Step inputs that failed validation
/// Labels: state
pub static VALIDATION_REJECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "storehub_validation_rejections_total",
        "Flow inputs rejected with a re-prompt",
        &["state"]
    )
    .expect("register storehub_validation_rejections_total")
});

/// Completed flows
/// Labels: flow
pub static FLOWS_COMPLETED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("storehub_flows_completed_total", "Completed flows by name", &["flow"])
        .expect("register storehub_flows_completed_total")
});

/// Touch every metric so it shows up in the first scrape.
pub fn init_metrics() {
    Lazy::force(&RUNNING_TENANTS);
    Lazy::force(&TENANT_TRANSITIONS_TOTAL);
    Lazy::force(&EVENTS_TOTAL);
    Lazy::force(&EVENTS_IN_FLIGHT);
    Lazy::force(&GATE_REJECTIONS_TOTAL);
    Lazy::force(&CORRUPT_SESSIONS_TOTAL);
    Lazy::force(&VALIDATION_REJECTIONS_TOTAL);
    Lazy::force(&FLOWS_COMPLETED_TOTAL);
    log::info!("Metrics registry initialized");
}

pub fn record_transition(transition: &str) {
    TENANT_TRANSITIONS_TOTAL.with_label_values(&[transition]).inc();
}

//! Reconcile metrics. Side-channel only.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

pub use nsclass_core::{
    APPLIED_RESOURCES_METRIC as APPLIED, DISCOVERY_REFRESH_METRIC as DISCOVERY_REFRESH,
    PRUNED_RESOURCES_METRIC as PRUNED, RECONCILE_DURATION_METRIC as DURATION, RECONCILE_ERRORS_METRIC as ERRORS,
};

pub fn describe() {
    describe_counter!(APPLIED, "Total number of resources applied by namespaceclass controller");
    describe_counter!(PRUNED, "Total number of resources pruned by namespaceclass controller");
    describe_counter!(ERRORS, "Total reconcile errors");
    describe_counter!(DISCOVERY_REFRESH, "API discovery runs");
    describe_histogram!(DURATION, Unit::Seconds, "Duration of reconcile loops");
}

pub fn reconcile_error(namespace: &str, phase: &'static str) {
    counter!(ERRORS, "namespace" => namespace.to_string(), "phase" => phase).increment(1);
}

pub fn reconcile_duration(namespace: &str, class: &str, secs: f64) {
    histogram!(DURATION, "namespace" => namespace.to_string(), "class" => class.to_string()).record(secs);
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/metrics.rs
*
* This module defines and registers the Prometheus metrics that the
* policy-watcher exposes on `/metrics`.
*
* Using `lazy_static`, the metrics are created only once and are shared
* safely across all concurrent reconciliation loops and the web server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::notifier::{Alert, AlertStatus};
use lazy_static::lazy_static;
use prometheus::{opts, register_int_counter_vec, register_int_gauge_vec, IntCounterVec, IntGaugeVec, Registry};

// --- Metric Definitions ---

lazy_static! {
    /// 1 while a (rule, object) pair is violated, 0 once it recovered.
    pub static ref VIOLATION: IntGaugeVec =
        register_int_gauge_vec!(
            opts!("policy_watcher_violation", "Whether a rule is currently violated by an object."),
            &["rule_kind", "rule_name", "resource_namespace", "resource_name", "resource_kind"]
        ).unwrap();

    /// Delivery attempts per notifier, labeled `result` = "success" | "failure".
    pub static ref NOTIFICATIONS_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "policy_watcher_notifications_total",
            "Total number of alert deliveries attempted.",
            &["notifier", "result"]
        ).unwrap();

    /// Failed reconciles, labeled by the kind of object reconciled.
    pub static ref RECONCILE_ERRORS_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "policy_watcher_reconcile_errors_total",
            "Total number of failed reconciliations.",
            &["subject"]
        ).unwrap();
}

/// Creates a new Prometheus registry and registers all custom metrics.
///
/// This function is intended to be called once at operator startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(VIOLATION.clone()))?;
    r.register(Box::new(NOTIFICATIONS_TOTAL.clone()))?;
    r.register(Box::new(RECONCILE_ERRORS_TOTAL.clone()))?;
    Ok(r)
}

/// Mirrors the lifecycle state of `alert` into the violation gauge.
pub fn record_violation(alert: &Alert) {
    let value = match alert.status {
        AlertStatus::Pending | AlertStatus::Firing => 1,
        AlertStatus::Recovering | AlertStatus::Error => 0,
    };
    VIOLATION
        .with_label_values(&[
            alert.rule_kind.as_str(),
            alert.rule_name.as_str(),
            alert.resource_namespace.as_str(),
            alert.resource_name.as_str(),
            alert.resource_kind.as_str(),
        ])
        .set(value);
}

pub fn record_notification(notifier: &str, success: bool) {
    let result = if success { "success" } else { "failure" };
    NOTIFICATIONS_TOTAL.with_label_values(&[notifier, result]).inc();
}

pub fn record_reconcile_error(subject: &str) {
    RECONCILE_ERRORS_TOTAL.with_label_values(&[subject]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_gauge_follows_status() {
        let mut alert = Alert {
            rule_kind: "ClusterPodHealthRule".into(),
            rule_name: "metrics-test".into(),
            resource_kind: "Pod".into(),
            resource_namespace: "shop".into(),
            resource_name: "web-0".into(),
            ..Default::default()
        };
        let gauge = || {
            VIOLATION
                .with_label_values(&["ClusterPodHealthRule", "metrics-test", "shop", "web-0", "Pod"])
                .get()
        };

        alert.status = AlertStatus::Firing;
        record_violation(&alert);
        assert_eq!(gauge(), 1);

        alert.status = AlertStatus::Recovering;
        record_violation(&alert);
        assert_eq!(gauge(), 0);
    }

    #[test]
    fn test_registry_exposes_metric_families() {
        record_reconcile_error("Pod");
        let registry = create_and_register_metrics().unwrap();
        let names: Vec<String> = registry.gather().iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"policy_watcher_reconcile_errors_total".to_string()));
    }
}

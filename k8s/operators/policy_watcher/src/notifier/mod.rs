/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/notifier/mod.rs
*
* The in-memory side of a `Notifier`: a keyed set of alerts moving through
* pending -> firing -> recovering, and the periodic flush that delivers
* them. One alert exists per (rule, object) pair, so a violation that lasts
* for days is announced once and its end is announced once.
*
* Transitions on `set_alert`:
*
*   incoming   | none      pending   firing      recovering  error
*   -----------+------------------------------------------------------
*   violation  | pending   pending   firing      firing      pending
*   recovery   | (drop)    delete    recovering  recovering  delete
*
* A pending alert whose first send is in flight counts as announced, so its
* recovery is kept and sent. A flush is split into `begin_notify`, `deliver`
* and `finish_notify` so the webhook calls run without the notifier lock.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod alert;
pub mod cache;
pub mod sink;

pub use alert::{Alert, AlertStatus, ResourceRef, RuleRef};
pub use cache::NotifierCache;
pub use sink::{NotificationSink, SinkConfig, SlackSink};

use crate::crds::{Notifier as NotifierResource, NotifierStatus, Severity};
use crate::error::Result;
use crate::metrics;
use crate::utils;
use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One alert handed to the sink.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub key: String,
    pub alert: Alert,
}

/// What one flush sends, detached from the notifier it came from.
#[derive(Debug, Clone)]
pub struct Outbox {
    pub sink: SinkConfig,
    pub deliveries: Vec<Delivery>,
}

/// Sends `outbox` in order until `deadline` runs out. `None` marks the
/// deliveries that were never attempted.
pub async fn deliver(sink: &dyn NotificationSink, outbox: &Outbox, deadline: Duration) -> Vec<Option<Result<()>>> {
    let until = Instant::now() + deadline;
    let mut results = Vec::with_capacity(outbox.deliveries.len());
    for delivery in &outbox.deliveries {
        match tokio::time::timeout_at(until, sink.send(&outbox.sink, &delivery.alert)).await {
            Ok(result) => results.push(Some(result)),
            Err(_) => {
                warn!(
                    pending = outbox.deliveries.len() - results.len(),
                    ?deadline,
                    "Flush deadline reached, deferring remaining alerts"
                );
                break;
            }
        }
    }
    results.resize_with(outbox.deliveries.len(), || None);
    results
}

/// Outcome of one flush.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Notifier {
    pub name: String,
    pub interval: Duration,
    pub default_severity: Severity,
    pub sink: SinkConfig,
    pub checked_at: Option<String>,
    alerts: BTreeMap<String, Alert>,
    /// Keys present in the last persisted status.
    persisted: BTreeSet<String>,
    /// Keys handed to the sink by the flush currently running.
    in_flight: BTreeSet<String>,
}

impl Notifier {
    pub fn new(name: impl Into<String>, interval: Duration, default_severity: Severity, sink: SinkConfig) -> Self {
        Self {
            name: name.into(),
            interval,
            default_severity,
            sink,
            checked_at: None,
            alerts: BTreeMap::new(),
            persisted: BTreeSet::new(),
            in_flight: BTreeSet::new(),
        }
    }

    /// Builds a notifier from its resource, restoring the alerts it persisted.
    pub fn from_resource(resource: &NotifierResource, sink: SinkConfig) -> Self {
        let mut notifier = Self::new(resource.name_any(), Duration::ZERO, Severity::Default, sink.clone());
        notifier.configure(resource, sink);
        if let Some(status) = &resource.status {
            notifier.restore(status);
        }
        notifier
    }

    /// Applies a new spec without touching tracked alerts.
    pub fn configure(&mut self, resource: &NotifierResource, sink: SinkConfig) {
        self.interval = Duration::from_secs(resource.spec.notify_interval_seconds.max(1) as u64);
        self.default_severity = resource.spec.default_severity;
        self.sink = sink;
    }

    fn restore(&mut self, status: &NotifierStatus) {
        self.checked_at = status.checked_at.clone();
        for (key, alert) in &status.alerts {
            self.alerts.insert(key.clone(), alert.clone());
            self.persisted.insert(key.clone());
        }
    }

    pub fn alerts(&self) -> &BTreeMap<String, Alert> {
        &self.alerts
    }

    #[cfg(test)]
    pub fn alert(&self, key: &str) -> Option<&Alert> {
        self.alerts.get(key)
    }

    /// Merges one evaluation result into the tracked alerts.
    pub fn set_alert(&mut self, mut alert: Alert) {
        if alert.severity == Severity::Default {
            alert.severity = self.default_severity;
        }
        let key = alert.key();
        let prior = self.alerts.get(&key).map(|a| a.status);

        if alert.violated {
            alert.status = match prior {
                Some(AlertStatus::Firing) | Some(AlertStatus::Recovering) => AlertStatus::Firing,
                _ => AlertStatus::Pending,
            };
            alert.error = None;
            self.alerts.insert(key, alert);
            return;
        }

        let reason = alert.message;
        self.recover(&key, &reason);
    }

    /// Recovery of a tracked alert. Undelivered alerts simply vanish, unless
    /// their announcement is being sent right now.
    fn recover(&mut self, key: &str, reason: &str) {
        let Some(prior) = self.alerts.remove(key) else {
            return;
        };
        let in_flight = self.in_flight.contains(key);
        match prior.status {
            AlertStatus::Pending | AlertStatus::Error if !in_flight => {
                debug!(notifier = %self.name, key, "Dropping undelivered alert");
                metrics::record_violation(&Alert {
                    status: AlertStatus::Recovering,
                    ..prior
                });
            }
            AlertStatus::Recovering => {
                self.alerts.insert(key.to_string(), prior);
            }
            AlertStatus::Firing | AlertStatus::Pending | AlertStatus::Error => {
                let mut recovered = prior.recovered(reason);
                recovered.status = AlertStatus::Recovering;
                recovered.error = None;
                self.alerts.insert(key.to_string(), recovered);
            }
        }
    }

    fn recover_matching<F>(&mut self, reason: &str, matches: F) -> usize
    where
        F: Fn(&Alert) -> bool,
    {
        let keys: Vec<String> = self
            .alerts
            .iter()
            .filter(|(_, a)| matches(a))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.recover(key, reason);
        }
        keys.len()
    }

    /// Recovers every alert produced by `rule`.
    pub fn clear_rule_alerts(&mut self, rule: &RuleRef, reason: &str) -> usize {
        self.recover_matching(reason, |a| rule.owns(a))
    }

    /// Recovers every alert about `resource`, whatever rule produced it.
    pub fn clear_resource_alerts(&mut self, resource: &ResourceRef, reason: &str) -> usize {
        self.recover_matching(reason, |a| resource.matches(a))
    }

    /// Recovers everything, e.g. when the notifier itself goes away.
    pub fn clear_all_alerts(&mut self, reason: &str) -> usize {
        self.recover_matching(reason, |_| true)
    }

    /// Whether the flush interval has elapsed since the last `notify`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !utils::checked_recently(self.checked_at.as_deref(), now, self.interval)
    }

    /// Time left until the next flush is due.
    pub fn due_in(&self, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.checked_at.as_deref().and_then(utils::parse_rfc3339) else {
            return Duration::ZERO;
        };
        let elapsed = now.signed_duration_since(last).to_std().unwrap_or(Duration::ZERO);
        self.interval.saturating_sub(elapsed)
    }

    /// Picks the alerts the next flush has to send and marks them in flight.
    ///
    /// Recovering alerts that will never be sent (suppressed, or below the
    /// severity floor) are dropped right away. The sends themselves happen
    /// without the notifier lock, see `deliver`.
    pub fn begin_notify(&mut self) -> Outbox {
        let mut deliveries = Vec::new();
        let mut silent = Vec::new();
        for (key, alert) in &self.alerts {
            let below_floor = alert.severity < self.sink.min_severity;
            if !alert.suppressed && !below_floor && alert.status != AlertStatus::Firing {
                deliveries.push(Delivery {
                    key: key.clone(),
                    alert: alert.clone(),
                });
            } else if alert.status == AlertStatus::Recovering {
                silent.push(key.clone());
            }
        }
        for key in silent {
            if let Some(alert) = self.alerts.remove(&key) {
                metrics::record_violation(&alert);
            }
        }
        self.in_flight = deliveries.iter().map(|d| d.key.clone()).collect();
        Outbox {
            sink: self.sink.clone(),
            deliveries,
        }
    }

    /// Applies the outcome of the sends started by `begin_notify`.
    ///
    /// Pending alerts become firing once sent. A failed send leaves the alert
    /// pending with the error recorded, so the next pass retries it.
    /// Recovering alerts get one attempt and are dropped either way. An alert
    /// whose send was never attempted stays as it is.
    pub fn finish_notify(&mut self, outbox: Outbox, results: Vec<Option<Result<()>>>) -> NotifyReport {
        let mut report = NotifyReport::default();
        for (delivery, result) in outbox.deliveries.into_iter().zip(results) {
            let key = delivery.key;
            let sent_as = delivery.alert.status;
            match &result {
                Some(Ok(())) => {
                    report.delivered += 1;
                    metrics::record_notification(&self.name, true);
                }
                Some(Err(e)) => {
                    report.failed += 1;
                    metrics::record_notification(&self.name, false);
                    warn!(notifier = %self.name, key = %key, error = %e, "Failed to deliver alert");
                }
                None => {}
            }

            let Some(current) = self.alerts.get_mut(&key) else {
                continue;
            };
            match (sent_as, current.status, result) {
                // Recovered while its first announcement was in flight.
                (AlertStatus::Pending | AlertStatus::Error, AlertStatus::Recovering, Some(Ok(()))) => {}
                (AlertStatus::Pending | AlertStatus::Error, AlertStatus::Recovering, _) => {
                    if let Some(gone) = self.alerts.remove(&key) {
                        metrics::record_violation(&gone);
                    }
                }
                (AlertStatus::Pending | AlertStatus::Error, AlertStatus::Pending | AlertStatus::Error, Some(Ok(()))) => {
                    current.error = None;
                    current.status = AlertStatus::Firing;
                }
                (AlertStatus::Pending | AlertStatus::Error, AlertStatus::Pending | AlertStatus::Error, Some(Err(e))) => {
                    current.error = Some(e.to_string());
                }
                (AlertStatus::Recovering, AlertStatus::Recovering, Some(_)) => {
                    if let Some(gone) = self.alerts.remove(&key) {
                        metrics::record_violation(&gone);
                    }
                }
                _ => {}
            }
        }

        for alert in self.alerts.values() {
            metrics::record_violation(alert);
        }
        self.in_flight.clear();
        self.checked_at = Some(utils::now_rfc3339());
        report
    }

    /// `begin_notify`, `deliver` and `finish_notify` in one go. Holds
    /// `&mut self` across the sends, so it is meant for notifiers that rule
    /// reconciles can no longer reach.
    pub async fn notify(&mut self, sink: &dyn NotificationSink, deadline: Duration) -> NotifyReport {
        let outbox = self.begin_notify();
        let results = deliver(sink, &outbox, deadline).await;
        self.finish_notify(outbox, results)
    }

    /// Merge patch for the notifier status. Keys dropped since the last
    /// persist are written as `null` so the server removes them.
    pub fn status_patch(&self) -> Result<Value, serde_json::Error> {
        let mut alerts = Map::new();
        for key in &self.persisted {
            if !self.alerts.contains_key(key) {
                alerts.insert(key.clone(), Value::Null);
            }
        }
        for (key, alert) in &self.alerts {
            alerts.insert(key.clone(), serde_json::to_value(alert)?);
        }
        Ok(json!({
            "status": {
                "checkedAt": self.checked_at,
                "alerts": alerts,
            }
        }))
    }

    /// Keys of the tracked alerts, taken together with `status_patch`.
    pub fn alert_keys(&self) -> BTreeSet<String> {
        self.alerts.keys().cloned().collect()
    }

    /// Records which keys the last successful status write contained.
    pub fn mark_persisted(&mut self, keys: BTreeSet<String>) {
        self.persisted = keys;
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/notifier/cache.rs
*
* Process-wide set of live notifiers. Rule reconcilers push alerts in here,
* the notifier reconciler flushes them out. Each notifier has its own lock,
* which is never held across a webhook call, so pushing an alert never waits
* on delivery.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{Alert, Notifier, ResourceRef, RuleRef, SinkConfig};
use crate::crds::Notifier as NotifierResource;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

pub type SharedNotifier = Arc<Mutex<Notifier>>;

#[derive(Debug, Default)]
pub struct NotifierCache {
    notifiers: RwLock<HashMap<String, SharedNotifier>>,
}

impl NotifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<SharedNotifier> {
        self.notifiers.read().await.get(name).cloned()
    }

    #[cfg(test)]
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.notifiers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registers `resource`, or reconfigures it if it is already known.
    /// Alerts persisted in the resource status are only loaded the first time.
    pub async fn upsert(&self, resource: &NotifierResource, sink: SinkConfig) -> SharedNotifier {
        let name = resource.name_any();
        if let Some(existing) = self.get(&name).await {
            existing.lock().await.configure(resource, sink);
            return existing;
        }
        let mut notifiers = self.notifiers.write().await;
        notifiers
            .entry(name)
            .or_insert_with(|| Arc::new(Mutex::new(Notifier::from_resource(resource, sink))))
            .clone()
    }

    pub async fn remove(&self, name: &str) -> Option<SharedNotifier> {
        self.notifiers.write().await.remove(name)
    }

    async fn all(&self) -> Vec<SharedNotifier> {
        self.notifiers.read().await.values().cloned().collect()
    }

    /// Hands `alert` to each named notifier. Unknown names are skipped.
    pub async fn set_alert(&self, notifiers: &[String], alert: &Alert) {
        for name in notifiers {
            match self.get(name).await {
                Some(notifier) => notifier.lock().await.set_alert(alert.clone()),
                None => warn!(notifier = %name, key = %alert.key(), "Notifier not found, dropping alert"),
            }
        }
    }

    pub async fn set_alerts(&self, notifiers: &[String], alerts: &[Alert]) {
        for alert in alerts {
            self.set_alert(notifiers, alert).await;
        }
    }

    /// Recovers the alerts of `rule` in every notifier.
    pub async fn clear_rule_alerts(&self, rule: &RuleRef, reason: &str) -> usize {
        let mut cleared = 0;
        for notifier in self.all().await {
            cleared += notifier.lock().await.clear_rule_alerts(rule, reason);
        }
        cleared
    }

    /// Recovers the alerts of `rule` in notifiers the rule no longer targets.
    pub async fn clear_rule_alerts_except(&self, rule: &RuleRef, keep: &[String], reason: &str) -> usize {
        let mut cleared = 0;
        for notifier in self.all().await {
            let mut notifier = notifier.lock().await;
            if !keep.contains(&notifier.name) {
                cleared += notifier.clear_rule_alerts(rule, reason);
            }
        }
        cleared
    }

    /// Recovers the alerts about `resource` in every notifier.
    pub async fn clear_resource_alerts(&self, resource: &ResourceRef, reason: &str) -> usize {
        let mut cleared = 0;
        for notifier in self.all().await {
            cleared += notifier.lock().await.clear_resource_alerts(resource, reason);
        }
        cleared
    }
}

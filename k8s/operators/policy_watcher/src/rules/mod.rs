/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/mod.rs
*
* The rule engine. A `Rule` is the uniform, in-memory view of any rule CRD:
* its scope, notification settings, policy parameters and violation status.
*
* Architecture:
* - `Policy` is a closed sum type with one variant per policy family; the
*   family modules (`hpa`, `pdb`, `namespace`, `service`, `unused`,
*   `pod_health`) each produce a `Finding` for one object.
* - `Rule::evaluate` checks one object and records the verdict in the rule's
*   `RuleStatus`; `Rule::evaluate_all` re-checks every object the rule
*   applies to and sweeps violations whose object disappeared.
* - Evaluation only mutates the in-memory `Rule`. Persisting the status and
*   dispatching the resulting alerts is the reconciler's job.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod catalog;
pub mod kind;
pub mod selector;
pub mod status;
pub mod target;

mod hpa;
mod namespace;
mod pdb;
mod pod_health;
mod service;
mod unused;

#[cfg(test)]
pub mod testing;

pub use catalog::RuleCatalog;
pub use kind::{RuleKind, RuleResource};
pub use target::{identity, split_identity, Target, TargetKind};

use crate::crds::*;
use crate::error::{Error, Result};
use crate::notifier::{Alert, AlertStatus, RuleRef};
use crate::store::ObjectStore;
use crate::utils::now_rfc3339;
use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use selector::selector_matches;
use serde_json::json;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

/// Finalizer that holds a rule until its alerts are flushed.
pub const FINALIZER: &str = "watcher.ph.io/alert-cleanup";

pub const DEFAULT_MESSAGE_TEMPLATE: &str =
    "[{{severity}}] {{resourceKind}} `{{resourceName}}` {{message}}";

/// The verdict of one policy check on one object.
#[derive(Clone, Debug, PartialEq)]
pub struct Finding {
    pub violated: bool,
    pub message: String,
}

impl Finding {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            violated: false,
            message: message.into(),
        }
    }

    pub fn violated(message: impl Into<String>) -> Self {
        Self {
            violated: true,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Policy {
    HpaScaleTarget,
    HpaReplicasPercentage(HpaReplicasPercentagePolicy),
    PdbMinAllowedDisruption(PdbMinAllowedDisruptionPolicy),
    NamespaceLabel(NamespaceLabelPolicy),
    ServiceSelector,
    UnusedSecret(UnusedObjectPolicy),
    UnusedConfigMap(UnusedObjectPolicy),
    PodHealth(PodHealthPolicy),
}

#[derive(Clone, Debug, PartialEq)]
pub enum RuleScope {
    /// Applies cluster-wide except in the listed namespaces.
    Cluster { ignore_namespaces: Vec<String> },
    /// Applies inside the rule's own namespace to objects the selector matches.
    Namespaced { selector: Selector },
}

#[derive(Clone, Debug)]
pub struct Rule {
    pub kind: RuleKind,
    /// Empty for cluster-scoped rules.
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub scope: RuleScope,
    pub notification: Notification,
    pub policy: Policy,
    pub status: RuleStatus,
    /// The status as last read from or written to the API server.
    persisted: RuleStatus,
    pub finalizers: Vec<String>,
    pub deleting: bool,
}

impl Rule {
    pub fn rule_ref(&self) -> RuleRef {
        RuleRef {
            kind: self.kind.as_str().to_string(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Key of this rule in the catalog: `Kind/namespace/name`.
    pub fn key(&self) -> String {
        rule_key(self.kind, &self.namespace, &self.name)
    }

    /// Namespaced rules never ignore a namespace.
    pub fn is_ignored(&self, namespace: &str) -> bool {
        match &self.scope {
            RuleScope::Cluster { ignore_namespaces } => {
                ignore_namespaces.iter().any(|n| n == namespace)
            }
            RuleScope::Namespaced { .. } => false,
        }
    }

    /// Builds the alert for `identity` of `kind` and records the verdict.
    pub fn settle(&mut self, kind: TargetKind, identity: &str, finding: Finding) -> Alert {
        self.status.set_violation(identity, finding.violated);
        let (namespace, name) = split_identity(identity);
        Alert {
            rule_kind: self.kind.as_str().to_string(),
            rule_name: self.name.clone(),
            resource_kind: kind.as_str().to_string(),
            resource_namespace: namespace.to_string(),
            resource_name: name.to_string(),
            violated: finding.violated,
            suppressed: self.notification.suppressed,
            severity: self.notification.severity,
            message_template: self
                .notification
                .custom_message_template
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_MESSAGE_TEMPLATE.to_string()),
            message: finding.message,
            status: AlertStatus::Pending,
            error: None,
        }
    }

    /// Evaluates one object. A violation is a normal result; errors are
    /// reserved for wiring mistakes and store failures.
    pub async fn evaluate<S: ObjectStore>(&mut self, store: &S, target: &Target) -> Result<Vec<Alert>> {
        let kind = target.kind();
        if !self.kind.targets().contains(&kind) {
            return Err(Error::TypeMismatch {
                rule: self.key(),
                expected: self
                    .kind
                    .targets()
                    .iter()
                    .map(TargetKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                found: kind.as_str().to_string(),
            });
        }

        let scope_ns = target.scope_namespace();
        if self.is_ignored(scope_ns) {
            return Ok(vec![self.settle(kind, &target.identity(), Finding::ok("namespace is ignored"))]);
        }

        let primary = kind == self.kind.primary_target();
        if let RuleScope::Namespaced { selector } = &self.scope {
            let excluded = scope_ns != self.namespace || (primary && !selector_matches(selector, target));
            if excluded {
                if !primary {
                    return Ok(Vec::new());
                }
                return Ok(vec![self.settle(kind, &target.identity(), Finding::ok("excluded by selector"))]);
            }
        }

        let policy = self.policy.clone();
        let finding = match (&policy, target) {
            (Policy::HpaScaleTarget, Target::Hpa(h)) => hpa::scale_target(store, h).await?,
            (Policy::HpaReplicasPercentage(p), Target::Hpa(h)) => hpa::replicas_percentage(p, h)?,
            (Policy::PdbMinAllowedDisruption(p), Target::Pdb(budget)) => {
                pdb::min_allowed_disruption(store, p, budget).await?
            }
            (Policy::NamespaceLabel(p), Target::Namespace(ns)) => namespace::required_labels(p, ns),
            (Policy::ServiceSelector, Target::Service(svc)) => service::selector_matches_pods(store, svc).await?,
            (Policy::UnusedSecret(p), Target::Secret(secret)) => {
                unused::owner_unused(store, p, TargetKind::Secret, &secret.metadata).await?
            }
            (Policy::UnusedConfigMap(p), Target::ConfigMap(cm)) => {
                unused::owner_unused(store, p, TargetKind::ConfigMap, &cm.metadata).await?
            }
            (Policy::UnusedSecret(_), Target::Pod(pod)) => {
                return Ok(self.recheck_unused_owners(TargetKind::Secret, pod));
            }
            (Policy::UnusedConfigMap(_), Target::Pod(pod)) => {
                return Ok(self.recheck_unused_owners(TargetKind::ConfigMap, pod));
            }
            (Policy::PodHealth(p), Target::Pod(pod)) => pod_health::check(p, pod),
            _ => {
                return Err(Error::TypeMismatch {
                    rule: self.key(),
                    expected: self.kind.primary_target().as_str().to_string(),
                    found: kind.as_str().to_string(),
                })
            }
        };
        Ok(vec![self.settle(kind, &target.identity(), finding)])
    }

    /// Pod path of the unused-object rules: clears owners the pod now uses.
    fn recheck_unused_owners(&mut self, owner_kind: TargetKind, pod: &Pod) -> Vec<Alert> {
        let pod_ns = pod.metadata.namespace.clone().unwrap_or_default();
        let owners: Vec<String> = self
            .status
            .violations
            .keys()
            .filter_map(|id| match split_identity(id) {
                (ns, name) if ns == pod_ns => Some(name.to_string()),
                _ => None,
            })
            .collect();
        unused::pod_references(pod, owner_kind, owners.iter().map(String::as_str))
            .into_iter()
            .map(|(owner, finding)| self.settle(owner_kind, &identity(&pod_ns, &owner), finding))
            .collect()
    }

    /// Re-evaluates every object this rule applies to. Objects in
    /// `overridden_namespaces` belong to namespaced rules and are cleared.
    pub async fn evaluate_all<S: ObjectStore>(
        &mut self,
        store: &S,
        overridden_namespaces: &BTreeSet<String>,
    ) -> Result<Vec<Alert>> {
        let primary = self.kind.primary_target();
        let (namespace, labels) = match &self.scope {
            RuleScope::Namespaced { selector } => (
                self.namespace.clone(),
                crate::store::label_selector(&selector.match_labels),
            ),
            RuleScope::Cluster { .. } => (String::new(), None),
        };
        let objects = primary.list(store, &namespace, labels.as_deref()).await?;
        debug!(rule = %self.key(), count = objects.len(), "Evaluating all objects");

        let mut alerts = Vec::new();
        let mut seen = BTreeSet::new();
        for object in &objects {
            seen.insert(object.identity());
            if overridden_namespaces.contains(object.scope_namespace()) {
                alerts.push(self.settle(primary, &object.identity(), Finding::ok("governed by a namespace rule")));
                continue;
            }
            alerts.extend(self.evaluate(store, object).await?);
        }

        let stale: Vec<String> = self
            .status
            .violations
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            alerts.push(self.settle(primary, &id, Finding::ok("deleted or no longer selected")));
        }
        Ok(alerts)
    }

    /// Grace period before `target` may be evaluated. Zero for most kinds.
    pub fn delay(&self, target: &Target) -> Duration {
        match (&self.policy, target) {
            (Policy::UnusedSecret(p), Target::Secret(o)) => unused::remaining_delay(p, &o.metadata, Utc::now()),
            (Policy::UnusedConfigMap(p), Target::ConfigMap(o)) => {
                unused::remaining_delay(p, &o.metadata, Utc::now())
            }
            _ => Duration::ZERO,
        }
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers.iter().any(|f| f == FINALIZER)
    }

    /// Returns whether the list changed.
    pub fn set_finalizer(&mut self) -> bool {
        if self.has_finalizer() {
            return false;
        }
        self.finalizers.push(FINALIZER.to_string());
        true
    }

    /// Returns whether the list changed.
    pub fn remove_finalizer(&mut self) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != FINALIZER);
        before != self.finalizers.len()
    }

    /// Writes the finalizer list, guarded by the resource version it was read at.
    pub async fn persist_finalizers<S: ObjectStore>(&self, store: &S) -> Result<()> {
        let patch = json!({
            "metadata": {
                "finalizers": self.finalizers,
                "resourceVersion": self.resource_version,
            }
        });
        self.kind.patch(store, &self.namespace, &self.name, &patch).await
    }

    /// Whether the set of violating objects changed since the last persist.
    pub fn status_changed(&self) -> bool {
        self.status.membership_differs(&self.persisted)
    }

    pub fn persisted_checked_at(&self) -> Option<&str> {
        self.persisted.checked_at.as_deref()
    }

    pub async fn persist_status<S: ObjectStore>(&mut self, store: &S) -> Result<()> {
        if self.status.checked_at.is_none() {
            self.status.checked_at = Some(now_rfc3339());
        }
        let patch = self.status.patch_from(&self.persisted);
        self.kind
            .patch_status(store, &self.namespace, &self.name, &patch)
            .await?;
        self.persisted = self.status.clone();
        Ok(())
    }

    /// Replaces the status with a newer copy kept by the catalog.
    pub(crate) fn adopt_status(&mut self, status: RuleStatus) {
        self.persisted = status.clone();
        self.status = status;
    }
}

pub fn rule_key(kind: RuleKind, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind.as_str(), namespace, name)
}

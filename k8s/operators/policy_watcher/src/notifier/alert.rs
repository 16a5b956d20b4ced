/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/notifier/alert.rs
*
* The `Alert` record produced by rule evaluation and owned by a notifier,
* together with its delivery status and dedup key.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::Severity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Separator of the four dedup-key segments. Kubernetes names never contain it.
pub const KEY_SEPARATOR: char = '/';

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Violation detected but not yet delivered.
    #[default]
    Pending,
    /// Delivered; no further sends while the violation lasts.
    Firing,
    /// Violation cleared; sent once more and then dropped.
    Recovering,
    /// Restored from a status written by an older release that tagged failed sends.
    Error,
}

/// Identifies the rule an alert came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RuleRef {
    pub kind: String,
    /// Empty for cluster-scoped rules.
    pub namespace: String,
    pub name: String,
}

impl RuleRef {
    /// Whether `alert` was produced by this rule. Namespaced rules only own
    /// alerts about objects in their own namespace.
    pub fn owns(&self, alert: &Alert) -> bool {
        alert.rule_kind == self.kind
            && alert.rule_name == self.name
            && (self.namespace.is_empty() || alert.resource_namespace == self.namespace)
    }
}

impl std::fmt::Display for RuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Identifies a watched object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn matches(&self, alert: &Alert) -> bool {
        alert.resource_kind == self.kind
            && alert.resource_namespace == self.namespace
            && alert.resource_name == self.name
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub rule_kind: String,
    pub rule_name: String,
    pub resource_kind: String,
    #[serde(default)]
    pub resource_namespace: String,
    pub resource_name: String,
    /// True for a violation, false for a recovery.
    #[serde(default)]
    pub violated: bool,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub message_template: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Alert {
    /// `ruleKind/ruleName/resourceNamespace/resourceName`.
    pub fn key(&self) -> String {
        [
            self.rule_kind.as_str(),
            self.rule_name.as_str(),
            self.resource_namespace.as_str(),
            self.resource_name.as_str(),
        ]
        .join(&KEY_SEPARATOR.to_string())
    }

    /// Turns this alert into the recovery of itself, prefixing the message
    /// with `reason` unless it already carries it.
    pub fn recovered(mut self, reason: &str) -> Self {
        self.violated = false;
        if !reason.is_empty() && !self.message.starts_with(reason) {
            self.message = format!("{}: {}", reason, self.message);
        }
        self
    }
}

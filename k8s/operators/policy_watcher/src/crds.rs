/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/crds.rs
*
* This file defines the Rust data structures that correspond to our Custom
* Resource Definitions (CRDs). By using the `kube::CustomResource` derive macro,
* we create a strongly-typed representation of our custom APIs.
*
* Architecture:
* - Rule resources live in `crds/rules.rs`. Every policy family comes as a
*   cluster-scoped kind (applies cluster-wide, carries `ignoreNamespaces`) and,
*   where it makes sense, a namespaced kind (carries a `Selector`). The
*   namespaced kind overrides the cluster kind inside its namespace.
* - The `Notifier` resource lives in `crds/notifier.rs`; it names a delivery
*   target and persists the alerts it currently tracks in its status.
* - The fragments shared by all rule kinds (`Notification`, `Selector`,
*   `Severity`, `RuleStatus`) are defined here.
* - `serde` attributes map idiomatic Rust `snake_case` to Kubernetes
*   `camelCase`, and `schemars` generates the OpenAPI v3 schema.
*
* SPDX-License-Identifier: Apache-2.0
*/

mod notifier;
mod rules;

pub use notifier::*;
pub use rules::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert severity. Variants are ordered from least to most severe.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unset; resolved to the notifier's default severity on delivery.
    #[default]
    Default,
    Info,
    Warning,
    Critical,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "default",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How violations of a rule are announced.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Names of `Notifier` resources that receive this rule's alerts.
    pub notifiers: Vec<String>,
    #[serde(default)]
    pub suppressed: bool,
    #[serde(default)]
    pub severity: Severity,
    /// Overrides the default "[{{severity}}] {{resourceKind}} `{{resourceName}}` {{message}}".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_message_template: Option<String>,
}

/// Scopes a namespaced rule to part of its namespace. Empty matches everything.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

/// Persisted per-rule violation set.
///
/// Keys of `violations` are `namespace/name` (empty namespace for
/// cluster-scoped objects); values are RFC 3339 detection times.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<String>,
    #[serde(default)]
    pub violations: BTreeMap<String, String>,
}

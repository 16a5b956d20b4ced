/*
 * Copyright (C) 2025 Pedro Henrique / phkaiser13
 *
 * File: k8s/operators/policy_watcher/src/crds/notifier.rs
 *
 * The cluster-scoped `Notifier` resource: where alerts go, how often they
 * are flushed, and the alerts currently tracked (persisted in status so they
 * survive operator restarts).
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use super::Severity;
use crate::notifier::Alert;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "Notifier",
    status = "NotifierStatus",
    shortname = "ntf",
    printcolumn = r#"{"name":"Interval", "type":"integer", "jsonPath":".spec.notifyIntervalSeconds"}"#,
    printcolumn = r#"{"name":"Checked", "type":"string", "jsonPath":".status.checkedAt"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NotifierSpec {
    #[serde(default = "default_notify_interval_seconds")]
    pub notify_interval_seconds: i64,
    /// Severity given to alerts whose rule leaves it unset.
    #[serde(default)]
    pub default_severity: Severity,
    pub slack: SlackConfig,
}

fn default_notify_interval_seconds() -> i64 {
    60
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Inline webhook URL. Ignored when `webhookUrlSecretRef` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url_secret_ref: Option<SecretKeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Alerts below this severity are tracked but never sent.
    #[serde(default)]
    pub min_severity: Severity,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_secret_key")]
    pub key: String,
}

fn default_secret_key() -> String {
    "webhookUrl".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotifierStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<String>,
    /// Tracked alerts keyed by `ruleKind/ruleName/namespace/name`.
    #[serde(default)]
    pub alerts: BTreeMap<String, Alert>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults() {
        let spec: NotifierSpec = serde_json::from_value(json!({
            "slack": {"webhookUrlSecretRef": {"namespace": "ops", "name": "slack"}}
        }))
        .unwrap();
        assert_eq!(spec.notify_interval_seconds, 60);
        assert_eq!(spec.default_severity, Severity::Default);
        let secret_ref = spec.slack.webhook_url_secret_ref.unwrap();
        assert_eq!(secret_ref.key, "webhookUrl");
        assert_eq!(spec.slack.min_severity, Severity::Default);
    }
}

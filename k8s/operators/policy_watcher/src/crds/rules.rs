/*
 * Copyright (C) 2025 Pedro Henrique / phkaiser13
 *
 * File: k8s/operators/policy_watcher/src/crds/rules.rs
 *
 * This file defines the rule Custom Resources. Each policy family has a
 * cluster-scoped kind (prefixed `Cluster`) and, except for the namespace
 * label family, a namespaced kind with the same policy parameters.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use super::{Notification, RuleStatus, Selector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// --- Policy parameters ---

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HpaReplicasPercentagePolicy {
    /// Violated when `currentReplicas / maxReplicas >= percent / 100`.
    pub percent: u32,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PdbMinAllowedDisruptionPolicy {
    /// Values below 1 are treated as 1.
    #[serde(default = "default_min_allowed_disruption")]
    pub min_allowed_disruption: i32,
}

fn default_min_allowed_disruption() -> i32 {
    1
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceLabelPolicy {
    /// Required labels. An empty value only requires the key to be present.
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnusedObjectPolicy {
    /// Grace period after creation before an unreferenced object is reported.
    #[serde(default = "default_initial_delay_seconds")]
    pub initial_delay_seconds: i64,
}

fn default_initial_delay_seconds() -> i64 {
    300
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodHealthPolicy {
    /// Violated when any container restarted more often than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<i32>,
    /// Container waiting reasons that count as unhealthy.
    #[serde(default = "default_unhealthy_reasons")]
    pub unhealthy_reasons: Vec<String>,
}

pub fn default_unhealthy_reasons() -> Vec<String> {
    ["CrashLoopBackOff", "ImagePullBackOff", "ErrImagePull", "CreateContainerConfigError"]
        .iter()
        .map(|r| r.to_string())
        .collect()
}

// --- HPA scale target ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterHpaScaleTargetRule",
    status = "RuleStatus",
    shortname = "chpast"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHpaScaleTargetRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "HpaScaleTargetRule",
    namespaced,
    status = "RuleStatus",
    shortname = "hpast"
)]
#[serde(rename_all = "camelCase")]
pub struct HpaScaleTargetRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
}

// --- HPA replicas percentage ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterHpaReplicasPercentageRule",
    status = "RuleStatus",
    shortname = "chparp"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHpaReplicasPercentageRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: HpaReplicasPercentagePolicy,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "HpaReplicasPercentageRule",
    namespaced,
    status = "RuleStatus",
    shortname = "hparp"
)]
#[serde(rename_all = "camelCase")]
pub struct HpaReplicasPercentageRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: HpaReplicasPercentagePolicy,
}

// --- PDB minimum allowed disruption ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterPdbMinAllowedDisruptionRule",
    status = "RuleStatus",
    shortname = "cpdbmad"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPdbMinAllowedDisruptionRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: PdbMinAllowedDisruptionPolicy,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "PdbMinAllowedDisruptionRule",
    namespaced,
    status = "RuleStatus",
    shortname = "pdbmad"
)]
#[serde(rename_all = "camelCase")]
pub struct PdbMinAllowedDisruptionRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: PdbMinAllowedDisruptionPolicy,
}

// --- Namespace labels (cluster only) ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterNamespaceLabelRule",
    status = "RuleStatus",
    shortname = "cnslabel"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNamespaceLabelRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: NamespaceLabelPolicy,
}

// --- Service selector matches pods ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterServiceSelectorRule",
    status = "RuleStatus",
    shortname = "csvcsel"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceSelectorRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ServiceSelectorRule",
    namespaced,
    status = "RuleStatus",
    shortname = "svcsel"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSelectorRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
}

// --- Unused Secret ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterUnusedSecretRule",
    status = "RuleStatus",
    shortname = "cunusedsec"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUnusedSecretRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: UnusedObjectPolicy,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "UnusedSecretRule",
    namespaced,
    status = "RuleStatus",
    shortname = "unusedsec"
)]
#[serde(rename_all = "camelCase")]
pub struct UnusedSecretRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: UnusedObjectPolicy,
}

// --- Unused ConfigMap ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterUnusedConfigMapRule",
    status = "RuleStatus",
    shortname = "cunusedcm"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUnusedConfigMapRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: UnusedObjectPolicy,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "UnusedConfigMapRule",
    namespaced,
    status = "RuleStatus",
    shortname = "unusedcm"
)]
#[serde(rename_all = "camelCase")]
pub struct UnusedConfigMapRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: UnusedObjectPolicy,
}

// --- Pod health ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "ClusterPodHealthRule",
    status = "RuleStatus",
    shortname = "cpodhealth"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPodHealthRuleSpec {
    #[serde(default)]
    pub ignore_namespaces: Vec<String>,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: PodHealthPolicy,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "watcher.ph.io",
    version = "v1alpha1",
    kind = "PodHealthRule",
    namespaced,
    status = "RuleStatus",
    shortname = "podhealth"
)]
#[serde(rename_all = "camelCase")]
pub struct PodHealthRuleSpec {
    #[serde(default)]
    pub selector: Selector,
    pub notification: Notification,
    #[serde(flatten)]
    pub policy: PodHealthPolicy,
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/kind.rs
*
* The closed set of rule kinds and the glue from each typed rule resource to
* the uniform `Rule` the engine evaluates.
*
* Architecture:
* - `RuleKind` names every rule CRD and knows its scope, its namespaced
*   counterpart and the object kinds it watches.
* - `with_rule_type!` dispatches from a `RuleKind` value to the typed CRD so
*   loads, lists and patches stay generic over `ObjectStore`.
* - `RuleResource` extracts scope, notification and policy from a typed CRD;
*   the `cluster_rule!` / `namespaced_rule!` macros implement it.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::target::TargetKind;
use super::{Policy, Rule, RuleScope};
use crate::crds::*;
use crate::error::Result;
use crate::store::{Object, ObjectStore};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::ApiResource;
use kube::{CustomResourceExt, ResourceExt};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    ClusterHpaScaleTarget,
    HpaScaleTarget,
    ClusterHpaReplicasPercentage,
    HpaReplicasPercentage,
    ClusterPdbMinAllowedDisruption,
    PdbMinAllowedDisruption,
    ClusterNamespaceLabel,
    ClusterServiceSelector,
    ServiceSelector,
    ClusterUnusedSecret,
    UnusedSecret,
    ClusterUnusedConfigMap,
    UnusedConfigMap,
    ClusterPodHealth,
    PodHealth,
}

/// Runs `$body` with `$ty` aliased to the CRD type of `$kind`.
macro_rules! with_rule_type {
    ($kind:expr, $ty:ident => $body:expr) => {
        match $kind {
            RuleKind::ClusterHpaScaleTarget => { type $ty = ClusterHpaScaleTargetRule; $body }
            RuleKind::HpaScaleTarget => { type $ty = HpaScaleTargetRule; $body }
            RuleKind::ClusterHpaReplicasPercentage => { type $ty = ClusterHpaReplicasPercentageRule; $body }
            RuleKind::HpaReplicasPercentage => { type $ty = HpaReplicasPercentageRule; $body }
            RuleKind::ClusterPdbMinAllowedDisruption => { type $ty = ClusterPdbMinAllowedDisruptionRule; $body }
            RuleKind::PdbMinAllowedDisruption => { type $ty = PdbMinAllowedDisruptionRule; $body }
            RuleKind::ClusterNamespaceLabel => { type $ty = ClusterNamespaceLabelRule; $body }
            RuleKind::ClusterServiceSelector => { type $ty = ClusterServiceSelectorRule; $body }
            RuleKind::ServiceSelector => { type $ty = ServiceSelectorRule; $body }
            RuleKind::ClusterUnusedSecret => { type $ty = ClusterUnusedSecretRule; $body }
            RuleKind::UnusedSecret => { type $ty = UnusedSecretRule; $body }
            RuleKind::ClusterUnusedConfigMap => { type $ty = ClusterUnusedConfigMapRule; $body }
            RuleKind::UnusedConfigMap => { type $ty = UnusedConfigMapRule; $body }
            RuleKind::ClusterPodHealth => { type $ty = ClusterPodHealthRule; $body }
            RuleKind::PodHealth => { type $ty = PodHealthRule; $body }
        }
    };
}

impl RuleKind {
    pub const ALL: [RuleKind; 15] = [
        RuleKind::ClusterHpaScaleTarget,
        RuleKind::HpaScaleTarget,
        RuleKind::ClusterHpaReplicasPercentage,
        RuleKind::HpaReplicasPercentage,
        RuleKind::ClusterPdbMinAllowedDisruption,
        RuleKind::PdbMinAllowedDisruption,
        RuleKind::ClusterNamespaceLabel,
        RuleKind::ClusterServiceSelector,
        RuleKind::ServiceSelector,
        RuleKind::ClusterUnusedSecret,
        RuleKind::UnusedSecret,
        RuleKind::ClusterUnusedConfigMap,
        RuleKind::UnusedConfigMap,
        RuleKind::ClusterPodHealth,
        RuleKind::PodHealth,
    ];

    /// The CRD kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::ClusterHpaScaleTarget => "ClusterHpaScaleTargetRule",
            RuleKind::HpaScaleTarget => "HpaScaleTargetRule",
            RuleKind::ClusterHpaReplicasPercentage => "ClusterHpaReplicasPercentageRule",
            RuleKind::HpaReplicasPercentage => "HpaReplicasPercentageRule",
            RuleKind::ClusterPdbMinAllowedDisruption => "ClusterPdbMinAllowedDisruptionRule",
            RuleKind::PdbMinAllowedDisruption => "PdbMinAllowedDisruptionRule",
            RuleKind::ClusterNamespaceLabel => "ClusterNamespaceLabelRule",
            RuleKind::ClusterServiceSelector => "ClusterServiceSelectorRule",
            RuleKind::ServiceSelector => "ServiceSelectorRule",
            RuleKind::ClusterUnusedSecret => "ClusterUnusedSecretRule",
            RuleKind::UnusedSecret => "UnusedSecretRule",
            RuleKind::ClusterUnusedConfigMap => "ClusterUnusedConfigMapRule",
            RuleKind::UnusedConfigMap => "UnusedConfigMapRule",
            RuleKind::ClusterPodHealth => "ClusterPodHealthRule",
            RuleKind::PodHealth => "PodHealthRule",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    pub fn is_namespaced(&self) -> bool {
        !self.as_str().starts_with("Cluster")
    }

    /// The namespaced kind that overrides this cluster kind inside a namespace.
    pub fn namespaced_counterpart(&self) -> Option<RuleKind> {
        match self {
            RuleKind::ClusterHpaScaleTarget => Some(RuleKind::HpaScaleTarget),
            RuleKind::ClusterHpaReplicasPercentage => Some(RuleKind::HpaReplicasPercentage),
            RuleKind::ClusterPdbMinAllowedDisruption => Some(RuleKind::PdbMinAllowedDisruption),
            RuleKind::ClusterServiceSelector => Some(RuleKind::ServiceSelector),
            RuleKind::ClusterUnusedSecret => Some(RuleKind::UnusedSecret),
            RuleKind::ClusterUnusedConfigMap => Some(RuleKind::UnusedConfigMap),
            RuleKind::ClusterPodHealth => Some(RuleKind::PodHealth),
            _ => None,
        }
    }

    /// The cluster kind a namespaced kind overrides.
    pub fn cluster_counterpart(&self) -> Option<RuleKind> {
        Self::ALL
            .into_iter()
            .find(|k| k.namespaced_counterpart() == Some(*self))
    }

    /// Watched object kinds, primary kind first.
    pub fn targets(&self) -> &'static [TargetKind] {
        match self {
            RuleKind::ClusterHpaScaleTarget
            | RuleKind::HpaScaleTarget
            | RuleKind::ClusterHpaReplicasPercentage
            | RuleKind::HpaReplicasPercentage => &[TargetKind::Hpa],
            RuleKind::ClusterPdbMinAllowedDisruption | RuleKind::PdbMinAllowedDisruption => {
                &[TargetKind::Pdb]
            }
            RuleKind::ClusterNamespaceLabel => &[TargetKind::Namespace],
            RuleKind::ClusterServiceSelector | RuleKind::ServiceSelector => &[TargetKind::Service],
            RuleKind::ClusterUnusedSecret | RuleKind::UnusedSecret => {
                &[TargetKind::Secret, TargetKind::Pod]
            }
            RuleKind::ClusterUnusedConfigMap | RuleKind::UnusedConfigMap => {
                &[TargetKind::ConfigMap, TargetKind::Pod]
            }
            RuleKind::ClusterPodHealth | RuleKind::PodHealth => &[TargetKind::Pod],
        }
    }

    pub fn primary_target(&self) -> TargetKind {
        self.targets()[0]
    }

    /// Cluster kinds that watch `target`.
    pub fn cluster_kinds_watching(target: TargetKind) -> Vec<RuleKind> {
        Self::ALL
            .into_iter()
            .filter(|k| !k.is_namespaced() && k.targets().contains(&target))
            .collect()
    }

    pub fn api_resource(&self) -> ApiResource {
        with_rule_type!(self, R => ApiResource::erase::<R>(&()))
    }

    pub fn crd(&self) -> CustomResourceDefinition {
        with_rule_type!(self, R => R::crd())
    }

    fn scope<'a>(&self, namespace: &'a str) -> Option<&'a str> {
        if self.is_namespaced() && !namespace.is_empty() {
            Some(namespace)
        } else {
            None
        }
    }

    pub async fn load<S: ObjectStore>(&self, store: &S, namespace: &str, name: &str) -> Result<Option<Rule>> {
        let ns = self.scope(namespace);
        with_rule_type!(self, R => Ok(store.get::<R>(ns, name).await?.map(|r| Rule::from_resource(&r))))
    }

    /// Lists rules of this kind; `namespace` empty means every namespace.
    pub async fn list<S: ObjectStore>(&self, store: &S, namespace: &str) -> Result<Vec<Rule>> {
        let ns = self.scope(namespace);
        with_rule_type!(self, R => Ok(store
            .list::<R>(ns, None)
            .await?
            .iter()
            .map(Rule::from_resource)
            .collect()))
    }

    pub async fn patch<S: ObjectStore>(&self, store: &S, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let ns = self.scope(namespace);
        with_rule_type!(self, R => store.merge_patch::<R>(ns, name, patch).await)
    }

    pub async fn patch_status<S: ObjectStore>(&self, store: &S, namespace: &str, name: &str, patch: &Value) -> Result<()> {
        let ns = self.scope(namespace);
        with_rule_type!(self, R => store.merge_patch_status::<R>(ns, name, patch).await)
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed rule CRD.
pub trait RuleResource: Object {
    const KIND: RuleKind;
    fn scope(&self) -> RuleScope;
    fn notification(&self) -> &Notification;
    fn policy(&self) -> Policy;
    fn rule_status(&self) -> Option<&RuleStatus>;
}

macro_rules! cluster_rule {
    ($ty:ty, $kind:expr, |$spec:ident| $policy:expr) => {
        impl RuleResource for $ty {
            const KIND: RuleKind = $kind;
            fn scope(&self) -> RuleScope {
                RuleScope::Cluster {
                    ignore_namespaces: self.spec.ignore_namespaces.clone(),
                }
            }
            fn notification(&self) -> &Notification {
                &self.spec.notification
            }
            fn policy(&self) -> Policy {
                let $spec = &self.spec;
                $policy
            }
            fn rule_status(&self) -> Option<&RuleStatus> {
                self.status.as_ref()
            }
        }
    };
}

macro_rules! namespaced_rule {
    ($ty:ty, $kind:expr, |$spec:ident| $policy:expr) => {
        impl RuleResource for $ty {
            const KIND: RuleKind = $kind;
            fn scope(&self) -> RuleScope {
                RuleScope::Namespaced {
                    selector: self.spec.selector.clone(),
                }
            }
            fn notification(&self) -> &Notification {
                &self.spec.notification
            }
            fn policy(&self) -> Policy {
                let $spec = &self.spec;
                $policy
            }
            fn rule_status(&self) -> Option<&RuleStatus> {
                self.status.as_ref()
            }
        }
    };
}

cluster_rule!(ClusterHpaScaleTargetRule, RuleKind::ClusterHpaScaleTarget, |_spec| Policy::HpaScaleTarget);
namespaced_rule!(HpaScaleTargetRule, RuleKind::HpaScaleTarget, |_spec| Policy::HpaScaleTarget);
cluster_rule!(ClusterHpaReplicasPercentageRule, RuleKind::ClusterHpaReplicasPercentage, |spec| {
    Policy::HpaReplicasPercentage(spec.policy.clone())
});
namespaced_rule!(HpaReplicasPercentageRule, RuleKind::HpaReplicasPercentage, |spec| {
    Policy::HpaReplicasPercentage(spec.policy.clone())
});
cluster_rule!(ClusterPdbMinAllowedDisruptionRule, RuleKind::ClusterPdbMinAllowedDisruption, |spec| {
    Policy::PdbMinAllowedDisruption(spec.policy.clone())
});
namespaced_rule!(PdbMinAllowedDisruptionRule, RuleKind::PdbMinAllowedDisruption, |spec| {
    Policy::PdbMinAllowedDisruption(spec.policy.clone())
});
cluster_rule!(ClusterNamespaceLabelRule, RuleKind::ClusterNamespaceLabel, |spec| {
    Policy::NamespaceLabel(spec.policy.clone())
});
cluster_rule!(ClusterServiceSelectorRule, RuleKind::ClusterServiceSelector, |_spec| Policy::ServiceSelector);
namespaced_rule!(ServiceSelectorRule, RuleKind::ServiceSelector, |_spec| Policy::ServiceSelector);
cluster_rule!(ClusterUnusedSecretRule, RuleKind::ClusterUnusedSecret, |spec| {
    Policy::UnusedSecret(spec.policy.clone())
});
namespaced_rule!(UnusedSecretRule, RuleKind::UnusedSecret, |spec| Policy::UnusedSecret(spec.policy.clone()));
cluster_rule!(ClusterUnusedConfigMapRule, RuleKind::ClusterUnusedConfigMap, |spec| {
    Policy::UnusedConfigMap(spec.policy.clone())
});
namespaced_rule!(UnusedConfigMapRule, RuleKind::UnusedConfigMap, |spec| {
    Policy::UnusedConfigMap(spec.policy.clone())
});
cluster_rule!(ClusterPodHealthRule, RuleKind::ClusterPodHealth, |spec| Policy::PodHealth(spec.policy.clone()));
namespaced_rule!(PodHealthRule, RuleKind::PodHealth, |spec| Policy::PodHealth(spec.policy.clone()));

impl Rule {
    pub fn from_resource<R: RuleResource>(resource: &R) -> Self {
        let meta = resource.meta();
        let status = resource.rule_status().cloned().unwrap_or_default();
        Rule {
            kind: R::KIND,
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: resource.name_any(),
            uid: meta.uid.clone(),
            resource_version: meta.resource_version.clone(),
            scope: resource.scope(),
            notification: resource.notification().clone(),
            policy: resource.policy(),
            persisted: status.clone(),
            status,
            finalizers: meta.finalizers.clone().unwrap_or_default(),
            deleting: meta.deletion_timestamp.is_some(),
        }
    }
}

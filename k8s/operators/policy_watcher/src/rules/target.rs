/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/target.rs
*
* The closed set of object kinds rules can watch, and a tagged union over
* their typed representations.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::Result;
use crate::store::ObjectStore;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ApiResource;
use serde_json::json;
use std::collections::BTreeMap;

/// Annotation recording when an object was last evaluated.
pub const LAST_CHECKED_ANNOTATION: &str = "watcher.ph.io/last-checked";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    Namespace,
    Pod,
    Service,
    Secret,
    ConfigMap,
    Hpa,
    Pdb,
}

/// Runs `$body` with `$ty` aliased to the typed object of `$kind`.
macro_rules! with_target_type {
    ($kind:expr, $ty:ident => $body:expr) => {
        match $kind {
            TargetKind::Namespace => {
                type $ty = Namespace;
                $body
            }
            TargetKind::Pod => {
                type $ty = Pod;
                $body
            }
            TargetKind::Service => {
                type $ty = Service;
                $body
            }
            TargetKind::Secret => {
                type $ty = Secret;
                $body
            }
            TargetKind::ConfigMap => {
                type $ty = ConfigMap;
                $body
            }
            TargetKind::Hpa => {
                type $ty = HorizontalPodAutoscaler;
                $body
            }
            TargetKind::Pdb => {
                type $ty = PodDisruptionBudget;
                $body
            }
        }
    };
}

impl TargetKind {
    pub const ALL: [TargetKind; 7] = [
        TargetKind::Namespace,
        TargetKind::Pod,
        TargetKind::Service,
        TargetKind::Secret,
        TargetKind::ConfigMap,
        TargetKind::Hpa,
        TargetKind::Pdb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Namespace => "Namespace",
            TargetKind::Pod => "Pod",
            TargetKind::Service => "Service",
            TargetKind::Secret => "Secret",
            TargetKind::ConfigMap => "ConfigMap",
            TargetKind::Hpa => "HorizontalPodAutoscaler",
            TargetKind::Pdb => "PodDisruptionBudget",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, TargetKind::Namespace)
    }

    pub fn api_resource(&self) -> ApiResource {
        with_target_type!(self, T => ApiResource::erase::<T>(&()))
    }

    fn scope<'a>(&self, namespace: &'a str) -> Option<&'a str> {
        if self.is_namespaced() && !namespace.is_empty() {
            Some(namespace)
        } else {
            None
        }
    }

    pub async fn get<S: ObjectStore>(
        &self,
        store: &S,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Target>> {
        let ns = self.scope(namespace);
        with_target_type!(self, T => Ok(store.get::<T>(ns, name).await?.map(Target::from)))
    }

    /// Lists objects of this kind; `namespace` empty means every namespace.
    pub async fn list<S: ObjectStore>(
        &self,
        store: &S,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Target>> {
        let ns = self.scope(namespace);
        with_target_type!(self, T => Ok(store
            .list::<T>(ns, label_selector)
            .await?
            .into_iter()
            .map(Target::from)
            .collect()))
    }

    /// Stamps the debounce annotation on an object.
    pub async fn mark_checked<S: ObjectStore>(
        &self,
        store: &S,
        namespace: &str,
        name: &str,
        at: &str,
    ) -> Result<()> {
        let ns = self.scope(namespace);
        let patch = json!({"metadata": {"annotations": {LAST_CHECKED_ANNOTATION: at}}});
        with_target_type!(self, T => store.merge_patch::<T>(ns, name, &patch).await)
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A watched object of one of the supported kinds.
#[derive(Clone, Debug)]
pub enum Target {
    Namespace(Namespace),
    Pod(Pod),
    Service(Service),
    Secret(Secret),
    ConfigMap(ConfigMap),
    Hpa(HorizontalPodAutoscaler),
    Pdb(PodDisruptionBudget),
}

macro_rules! target_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(impl From<$ty> for Target {
            fn from(obj: $ty) -> Self {
                Target::$variant(obj)
            }
        })*
    };
}

target_from!(
    Namespace(Namespace),
    Pod(Pod),
    Service(Service),
    Secret(Secret),
    ConfigMap(ConfigMap),
    Hpa(HorizontalPodAutoscaler),
    Pdb(PodDisruptionBudget),
);

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Namespace(_) => TargetKind::Namespace,
            Target::Pod(_) => TargetKind::Pod,
            Target::Service(_) => TargetKind::Service,
            Target::Secret(_) => TargetKind::Secret,
            Target::ConfigMap(_) => TargetKind::ConfigMap,
            Target::Hpa(_) => TargetKind::Hpa,
            Target::Pdb(_) => TargetKind::Pdb,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Target::Namespace(o) => &o.metadata,
            Target::Pod(o) => &o.metadata,
            Target::Service(o) => &o.metadata,
            Target::Secret(o) => &o.metadata,
            Target::ConfigMap(o) => &o.metadata,
            Target::Hpa(o) => &o.metadata,
            Target::Pdb(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace; empty for cluster-scoped objects.
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// `namespace/name`, the key of `RuleStatus.violations`.
    pub fn identity(&self) -> String {
        identity(self.namespace(), self.name())
    }

    /// The namespace this object belongs to for ignore lists and rule
    /// precedence. A Namespace object belongs to itself.
    pub fn scope_namespace(&self) -> &str {
        match self {
            Target::Namespace(_) => self.name(),
            _ => self.namespace(),
        }
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.meta().labels.as_ref()
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

pub fn identity(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Splits `namespace/name`. An identity without a separator is a bare name.
pub fn split_identity(identity: &str) -> (&str, &str) {
    identity.split_once('/').unwrap_or(("", identity))
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/unused.rs
*
* Unused Secret / ConfigMap policy.
*
* Two evaluation paths share the reference scan:
* - owner path: a Secret or ConfigMap changed, so every pod of its namespace
*   is scanned for a reference to it;
* - pod path: a pod changed, so only the owners currently flagged as unused
*   in that namespace are re-checked against this one pod.
*
* A reference is a volume (plain or projected), an `envFrom` source, an
* `env[].valueFrom` key selector, or (secrets only) an image pull secret.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::target::TargetKind;
use super::Finding;
use crate::crds::UnusedObjectPolicy;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::utils::created_at;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::time::Duration;

/// Name of a referenced object, if set.
trait RefName {
    fn ref_name(&self) -> Option<&str>;
}

impl RefName for String {
    fn ref_name(&self) -> Option<&str> {
        Some(self.as_str()).filter(|n| !n.is_empty())
    }
}

impl RefName for Option<String> {
    fn ref_name(&self) -> Option<&str> {
        self.as_deref().filter(|n| !n.is_empty())
    }
}

fn containers(spec: &PodSpec) -> impl Iterator<Item = &Container> {
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
}

/// Describes where `pod` references the `kind` object called `name`.
pub fn find_reference(pod: &Pod, kind: TargetKind, name: &str) -> Option<String> {
    let spec = pod.spec.as_ref()?;
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let is_secret = kind == TargetKind::Secret;

    for volume in spec.volumes.iter().flatten() {
        let direct = if is_secret {
            volume.secret.as_ref().and_then(|s| s.secret_name.ref_name()) == Some(name)
        } else {
            volume.config_map.as_ref().and_then(|c| c.name.ref_name()) == Some(name)
        };
        let projected = volume
            .projected
            .as_ref()
            .and_then(|p| p.sources.as_ref())
            .map_or(false, |sources| {
                sources.iter().any(|src| {
                    if is_secret {
                        src.secret.as_ref().and_then(|s| s.name.ref_name()) == Some(name)
                    } else {
                        src.config_map.as_ref().and_then(|c| c.name.ref_name()) == Some(name)
                    }
                })
            });
        if !(direct || projected) {
            continue;
        }
        let mounted_by = containers(spec).find(|c| {
            c.volume_mounts
                .iter()
                .flatten()
                .any(|m| m.name == volume.name)
        });
        return Some(match mounted_by {
            Some(c) => format!("pod `{}` container `{}`", pod_name, c.name),
            None => format!("pod `{}` volume `{}`", pod_name, volume.name),
        });
    }

    for container in containers(spec) {
        let from_env_from = container.env_from.iter().flatten().any(|src| {
            if is_secret {
                src.secret_ref.as_ref().and_then(|s| s.name.ref_name()) == Some(name)
            } else {
                src.config_map_ref.as_ref().and_then(|c| c.name.ref_name()) == Some(name)
            }
        });
        let from_env = container.env.iter().flatten().any(|var| {
            let Some(source) = var.value_from.as_ref() else {
                return false;
            };
            if is_secret {
                source.secret_key_ref.as_ref().and_then(|s| s.name.ref_name()) == Some(name)
            } else {
                source.config_map_key_ref.as_ref().and_then(|c| c.name.ref_name()) == Some(name)
            }
        });
        if from_env_from || from_env {
            return Some(format!("pod `{}` container `{}`", pod_name, container.name));
        }
    }

    if is_secret
        && spec
            .image_pull_secrets
            .iter()
            .flatten()
            .any(|s| s.name.ref_name() == Some(name))
    {
        return Some(format!("pod `{}` image pull secret", pod_name));
    }
    None
}

/// Grace period still left before `meta` may be reported as unused.
pub fn remaining_delay(policy: &UnusedObjectPolicy, meta: &ObjectMeta, now: DateTime<Utc>) -> Duration {
    let Some(created) = created_at(meta) else {
        return Duration::ZERO;
    };
    let age = now.signed_duration_since(created).num_seconds();
    let remaining = policy.initial_delay_seconds - age;
    if remaining > 0 {
        Duration::from_secs(remaining as u64)
    } else {
        Duration::ZERO
    }
}

/// Owner path: scans every pod in the owner's namespace.
pub async fn owner_unused<S: ObjectStore>(
    store: &S,
    policy: &UnusedObjectPolicy,
    kind: TargetKind,
    meta: &ObjectMeta,
) -> Result<Finding> {
    if !remaining_delay(policy, meta, Utc::now()).is_zero() {
        return Ok(Finding::ok(format!(
            "{} was created less than {}s ago",
            kind, policy.initial_delay_seconds
        )));
    }

    let name = meta.name.as_deref().unwrap_or_default();
    let pods: Vec<Pod> = store.list(meta.namespace.as_deref(), None).await?;
    Ok(
        match pods.iter().find_map(|p| find_reference(p, kind, name)) {
            Some(location) => Finding::ok(format!("{} is used by {}", kind, location)),
            None => Finding::violated(format!("{} is not used by any pod", kind)),
        },
    )
}

/// Pod path: which of the currently unused `owners` does `pod` now reference.
pub fn pod_references<'a>(
    pod: &Pod,
    kind: TargetKind,
    owners: impl IntoIterator<Item = &'a str>,
) -> Vec<(String, Finding)> {
    owners
        .into_iter()
        .filter_map(|owner| {
            find_reference(pod, kind, owner).map(|location| {
                (
                    owner.to_string(),
                    Finding::ok(format!("{} is used by {}", kind, location)),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{config_map, meta, pod, pod_from, pod_with_container, secret, LONG_AGO};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn policy() -> UnusedObjectPolicy {
        UnusedObjectPolicy { initial_delay_seconds: 300 }
    }

    #[tokio::test]
    async fn test_secret_becomes_used_through_env_from() {
        let store = MemoryStore::new();
        let db = secret("shop", "db-creds", LONG_AGO);
        store.insert(&pod("shop", "idle", &[]));

        let finding = owner_unused(&store, &policy(), TargetKind::Secret, &db.metadata)
            .await
            .unwrap();
        assert!(finding.violated);

        store.insert(&pod_with_container(
            "shop",
            "web-0",
            json!({"envFrom": [{"secretRef": {"name": "db-creds"}}]}),
        ));
        let finding = owner_unused(&store, &policy(), TargetKind::Secret, &db.metadata)
            .await
            .unwrap();
        assert!(!finding.violated);
        assert_eq!(finding.message, "Secret is used by pod `web-0` container `app`");
    }

    #[test]
    fn test_references_by_volume_key_ref_and_pull_secret() {
        let mounted = pod_from(json!({
            "metadata": {"namespace": "shop", "name": "web-0"},
            "spec": {
                "volumes": [
                    {"name": "cfg", "configMap": {"name": "settings"}},
                    {"name": "all", "projected": {"sources": [{"secret": {"name": "tls"}}]}}
                ],
                "imagePullSecrets": [{"name": "registry"}],
                "containers": [{
                    "name": "app",
                    "volumeMounts": [{"name": "cfg", "mountPath": "/etc/app"}],
                    "env": [{"name": "TOKEN", "valueFrom": {"secretKeyRef": {"name": "api", "key": "t"}}}]
                }]
            }
        }));

        assert_eq!(
            find_reference(&mounted, TargetKind::ConfigMap, "settings").as_deref(),
            Some("pod `web-0` container `app`")
        );
        assert_eq!(
            find_reference(&mounted, TargetKind::Secret, "tls").as_deref(),
            Some("pod `web-0` volume `all`")
        );
        assert!(find_reference(&mounted, TargetKind::Secret, "api").is_some());
        assert!(find_reference(&mounted, TargetKind::Secret, "registry").is_some());
        assert!(find_reference(&mounted, TargetKind::ConfigMap, "registry").is_none());
        assert!(find_reference(&mounted, TargetKind::ConfigMap, "tls").is_none());
    }

    #[tokio::test]
    async fn test_config_map_mounted_as_volume_is_used() {
        let store = MemoryStore::new();
        let settings = config_map("shop", "settings", LONG_AGO);
        let orphan = config_map("shop", "orphan", LONG_AGO);
        store.insert(&pod_from(json!({
            "metadata": {"namespace": "shop", "name": "web-0"},
            "spec": {
                "volumes": [{"name": "cfg", "configMap": {"name": "settings"}}],
                "containers": [{"name": "app"}]
            }
        })));

        let used = owner_unused(&store, &policy(), TargetKind::ConfigMap, &settings.metadata)
            .await
            .unwrap();
        assert!(!used.violated);
        assert!(used.message.starts_with("ConfigMap is used by pod `web-0`"));

        let unused = owner_unused(&store, &policy(), TargetKind::ConfigMap, &orphan.metadata)
            .await
            .unwrap();
        assert!(unused.violated);
    }

    #[test]
    fn test_pod_path_only_reports_newly_referenced_owners() {
        let p = pod_with_container(
            "shop",
            "web-0",
            json!({"env": [{"name": "A", "valueFrom": {"configMapKeyRef": {"name": "flags", "key": "a"}}}]}),
        );
        let found = pod_references(&p, TargetKind::ConfigMap, ["flags", "legacy"]);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "flags");
        assert!(!found[0].1.violated);
    }

    #[tokio::test]
    async fn test_young_objects_are_not_reported() {
        let store = MemoryStore::new();
        let fresh = secret("shop", "new", &crate::utils::now_rfc3339());
        let finding = owner_unused(&store, &policy(), TargetKind::Secret, &fresh.metadata)
            .await
            .unwrap();
        assert!(!finding.violated);

        let delay = remaining_delay(&policy(), &fresh.metadata, Utc::now());
        assert!(delay > Duration::from_secs(290) && delay <= Duration::from_secs(300));
        assert_eq!(remaining_delay(&policy(), &meta("shop", "x"), Utc::now()), Duration::ZERO);
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/testing.rs
*
* Object builders shared by the rule and reconciler tests.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::*;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};

pub const LONG_AGO: &str = "2020-01-01T00:00:00Z";

fn labels_json(labels: &[(&str, &str)]) -> Value {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

pub fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some(ns.into()).filter(|n: &String| !n.is_empty()),
        name: Some(name.into()),
        ..Default::default()
    }
}

pub fn namespace(name: &str, labels: &[(&str, &str)]) -> Namespace {
    serde_json::from_value(json!({
        "metadata": {"name": name, "labels": labels_json(labels)}
    }))
    .unwrap()
}

pub fn pod(ns: &str, name: &str, labels: &[(&str, &str)]) -> Pod {
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name, "labels": labels_json(labels)},
        "spec": {"containers": [{"name": "app", "image": "app:1"}]}
    }))
    .unwrap()
}

/// A pod whose `app` container carries `container` merged over the default.
pub fn pod_with_container(ns: &str, name: &str, container: Value) -> Pod {
    let mut c = json!({"name": "app", "image": "app:1"});
    if let (Some(base), Some(extra)) = (c.as_object_mut(), container.as_object()) {
        base.extend(extra.clone());
    }
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name},
        "spec": {"containers": [c]}
    }))
    .unwrap()
}

pub fn pod_from(value: Value) -> Pod {
    serde_json::from_value(value).unwrap()
}

pub fn secret(ns: &str, name: &str, created: &str) -> Secret {
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name, "creationTimestamp": created}
    }))
    .unwrap()
}

pub fn config_map(ns: &str, name: &str, created: &str) -> ConfigMap {
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name, "creationTimestamp": created}
    }))
    .unwrap()
}

pub fn service(ns: &str, name: &str, selector: &[(&str, &str)]) -> Service {
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name},
        "spec": {"selector": labels_json(selector)}
    }))
    .unwrap()
}

pub fn hpa(ns: &str, name: &str, target_kind: &str, max: i32, current: i32) -> HorizontalPodAutoscaler {
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name},
        "spec": {
            "scaleTargetRef": {"apiVersion": "apps/v1", "kind": target_kind, "name": name},
            "maxReplicas": max
        },
        "status": {"currentReplicas": current, "desiredReplicas": current}
    }))
    .unwrap()
}

pub fn pdb(ns: &str, name: &str, budget: Value, match_labels: &[(&str, &str)]) -> PodDisruptionBudget {
    let mut spec = json!({"selector": {"matchLabels": labels_json(match_labels)}});
    if let (Some(base), Some(extra)) = (spec.as_object_mut(), budget.as_object()) {
        base.extend(extra.clone());
    }
    serde_json::from_value(json!({
        "metadata": {"namespace": ns, "name": name},
        "spec": spec
    }))
    .unwrap()
}

pub fn notification(notifiers: &[&str]) -> Notification {
    Notification {
        notifiers: notifiers.iter().map(|n| n.to_string()).collect(),
        ..Default::default()
    }
}

pub fn cluster_pod_health_rule(name: &str, ignore: &[&str]) -> ClusterPodHealthRule {
    let mut rule = ClusterPodHealthRule::new(
        name,
        ClusterPodHealthRuleSpec {
            ignore_namespaces: ignore.iter().map(|n| n.to_string()).collect(),
            notification: notification(&["slack"]),
            policy: PodHealthPolicy {
                max_restarts: Some(5),
                unhealthy_reasons: default_unhealthy_reasons(),
            },
        },
    );
    rule.metadata.uid = Some(format!("uid-{}", name));
    rule
}

pub fn pod_health_rule(ns: &str, name: &str, selector: Selector) -> PodHealthRule {
    let mut rule = PodHealthRule::new(
        name,
        PodHealthRuleSpec {
            selector,
            notification: notification(&["slack"]),
            policy: PodHealthPolicy {
                max_restarts: Some(5),
                unhealthy_reasons: default_unhealthy_reasons(),
            },
        },
    );
    rule.metadata.namespace = Some(ns.into());
    rule.metadata.uid = Some(format!("uid-{}-{}", ns, name));
    rule
}

pub fn crashing_pod(ns: &str, name: &str) -> Pod {
    pod_from(json!({
        "metadata": {"namespace": ns, "name": name},
        "spec": {"containers": [{"name": "app", "image": "app:1"}]},
        "status": {
            "phase": "Running",
            "containerStatuses": [{
                "name": "app", "image": "app:1", "imageID": "", "ready": false,
                "restartCount": 1,
                "state": {"waiting": {"reason": "CrashLoopBackOff"}}
            }]
        }
    }))
}

pub fn healthy_pod(ns: &str, name: &str) -> Pod {
    pod_from(json!({
        "metadata": {"namespace": ns, "name": name},
        "spec": {"containers": [{"name": "app", "image": "app:1"}]},
        "status": {
            "phase": "Running",
            "containerStatuses": [{
                "name": "app", "image": "app:1", "imageID": "", "ready": true,
                "restartCount": 0,
                "state": {"running": {}}
            }]
        }
    }))
}

pub fn notifier_resource(name: &str) -> Notifier {
    serde_json::from_value(json!({
        "apiVersion": "watcher.ph.io/v1alpha1",
        "kind": "Notifier",
        "metadata": {"name": name, "uid": format!("uid-{}", name)},
        "spec": {"slack": {"webhookUrl": "https://hooks.slack.test/x"}}
    }))
    .unwrap()
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/hpa.rs
*
* HorizontalPodAutoscaler policies: the scale target must exist, and the
* current replica count must stay below a percentage of maxReplicas.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::Finding;
use crate::crds::HpaReplicasPercentagePolicy;
use crate::error::{Error, Result};
use crate::store::ObjectStore;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;

pub async fn scale_target<S: ObjectStore>(store: &S, hpa: &HorizontalPodAutoscaler) -> Result<Finding> {
    let ns = hpa.metadata.namespace.as_deref();
    let spec = hpa.spec.as_ref().ok_or(Error::MissingObjectKey("spec"))?;
    let target = &spec.scale_target_ref;

    let exists = match target.kind.as_str() {
        "Deployment" => store.get::<Deployment>(ns, &target.name).await?.is_some(),
        "ReplicaSet" => store.get::<ReplicaSet>(ns, &target.name).await?.is_some(),
        other => return Err(Error::UnsupportedScaleTarget(other.to_string())),
    };

    Ok(if exists {
        Finding::ok(format!("scale target {} `{}` exists", target.kind, target.name))
    } else {
        Finding::violated(format!("scale target {} `{}` not found", target.kind, target.name))
    })
}

pub fn replicas_percentage(policy: &HpaReplicasPercentagePolicy, hpa: &HorizontalPodAutoscaler) -> Result<Finding> {
    let spec = hpa.spec.as_ref().ok_or(Error::MissingObjectKey("spec"))?;
    if spec.max_replicas <= 0 {
        return Err(Error::InvalidObject(format!(
            "HPA {} has maxReplicas {}",
            hpa.metadata.name.as_deref().unwrap_or_default(),
            spec.max_replicas
        )));
    }
    let current = hpa
        .status
        .as_ref()
        .and_then(|s| s.current_replicas)
        .unwrap_or(0);

    let ratio = current as f64 / spec.max_replicas as f64;
    Ok(if ratio >= policy.percent as f64 / 100.0 {
        Finding::violated(format!("HPA percentage is >= {}%", policy.percent))
    } else {
        Finding::ok(format!("HPA percentage is within threshold (< {}%)", policy.percent))
    })
}

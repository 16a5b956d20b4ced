/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/pod_health.rs
*
* Pod health policy: the pod must not have failed, and none of its
* containers may restart too often or sit waiting for a known-bad reason.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::Finding;
use crate::crds::PodHealthPolicy;
use k8s_openapi::api::core::v1::Pod;

pub fn check(policy: &PodHealthPolicy, pod: &Pod) -> Finding {
    let Some(status) = pod.status.as_ref() else {
        return Finding::ok("pod has no status yet");
    };

    let mut problems = Vec::new();
    if status.phase.as_deref() == Some("Failed") {
        problems.push("pod phase is Failed".to_string());
    }

    let statuses = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());
    for cs in statuses {
        if let Some(max) = policy.max_restarts {
            if cs.restart_count > max {
                problems.push(format!(
                    "container `{}` restarted {} times (max {})",
                    cs.name, cs.restart_count, max
                ));
            }
        }
        let waiting = cs
            .state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref());
        if let Some(reason) = waiting {
            if policy.unhealthy_reasons.iter().any(|r| r == reason) {
                problems.push(format!("container `{}` is waiting: {}", cs.name, reason));
            }
        }
    }

    if problems.is_empty() {
        Finding::ok("pod is healthy")
    } else {
        Finding::violated(problems.join("; "))
    }
}

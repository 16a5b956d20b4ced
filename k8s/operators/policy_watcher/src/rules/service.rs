/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/service.rs
*
* Service selector policy: a Service that selects pods must select at least one.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::selector::labels_match;
use super::Finding;
use crate::error::Result;
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::{Pod, Service};

pub async fn selector_matches_pods<S: ObjectStore>(store: &S, svc: &Service) -> Result<Finding> {
    let selector = match svc.spec.as_ref().and_then(|s| s.selector.as_ref()) {
        Some(selector) if !selector.is_empty() => selector,
        _ => return Ok(Finding::ok("service has no selector")),
    };

    let pods: Vec<Pod> = store.list(svc.metadata.namespace.as_deref(), None).await?;
    let matched = pods
        .iter()
        .filter(|p| labels_match(selector, p.metadata.labels.as_ref()))
        .count();

    Ok(if matched == 0 {
        Finding::violated("service selector matches no pods")
    } else {
        Finding::ok(format!("service selector matches {} pod(s)", matched))
    })
}

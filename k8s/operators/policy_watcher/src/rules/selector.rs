/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/selector.rs
*
* Client-side label matching: the rule `Selector`, plain label maps (Service
* selectors) and full `LabelSelector`s (PDBs, including matchExpressions).
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::target::Target;
use crate::crds::Selector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

/// An empty selector matches every object.
pub fn selector_matches(selector: &Selector, target: &Target) -> bool {
    if let Some(name) = selector.name.as_deref().filter(|n| !n.is_empty()) {
        if name != target.name() {
            return false;
        }
    }
    labels_match(&selector.match_labels, target.labels())
}

/// Every `wanted` pair is present in `labels`.
pub fn labels_match(wanted: &BTreeMap<String, String>, labels: Option<&BTreeMap<String, String>>) -> bool {
    wanted
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

/// Evaluates a `LabelSelector` the way `policy/v1` does: an absent selector
/// matches nothing, an empty one matches everything.
pub fn label_selector_matches(
    selector: Option<&LabelSelector>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(selector) = selector else {
        return false;
    };
    let match_labels = selector.match_labels.as_ref();
    let expressions = selector.match_expressions.as_deref().unwrap_or_default();
    match_labels.map_or(true, |wanted| labels_match(wanted, labels))
        && expressions.iter().all(|req| requirement_matches(req, labels))
}

fn requirement_matches(req: &LabelSelectorRequirement, labels: Option<&BTreeMap<String, String>>) -> bool {
    let value = labels.and_then(|l| l.get(&req.key));
    let values = req.values.as_deref().unwrap_or_default();
    match req.operator.as_str() {
        "In" => value.map_or(false, |v| values.contains(v)),
        "NotIn" => value.map_or(true, |v| !values.contains(v)),
        "Exists" => value.is_some(),
        "DoesNotExist" => value.is_none(),
        _ => false,
    }
}

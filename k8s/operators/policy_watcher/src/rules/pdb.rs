/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/pdb.rs
*
* PodDisruptionBudget policy: the budget must leave room to evict at least
* `minAllowedDisruption` of the pods it selects.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::selector::label_selector_matches;
use super::Finding;
use crate::crds::PdbMinAllowedDisruptionPolicy;
use crate::error::{Error, Result};
use crate::store::ObjectStore;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

pub async fn min_allowed_disruption<S: ObjectStore>(
    store: &S,
    policy: &PdbMinAllowedDisruptionPolicy,
    pdb: &PodDisruptionBudget,
) -> Result<Finding> {
    let spec = pdb.spec.as_ref().ok_or(Error::MissingObjectKey("spec"))?;
    let pods: Vec<Pod> = store.list(pdb.metadata.namespace.as_deref(), None).await?;
    let matched = pods
        .iter()
        .filter(|p| label_selector_matches(spec.selector.as_ref(), p.metadata.labels.as_ref()))
        .count() as i32;

    let allowed = match (&spec.max_unavailable, &spec.min_available) {
        (Some(max_unavailable), _) => scaled(max_unavailable, matched)?,
        (None, Some(min_available)) => matched - scaled(min_available, matched)?,
        (None, None) => matched,
    }
    .max(0);

    let expected = policy.min_allowed_disruption.max(1);
    Ok(if allowed < expected {
        Finding::violated(format!(
            "PDB doesnt have enough disruption pod (expect {}, but currently is {})",
            expected, allowed
        ))
    } else {
        Finding::ok(format!(
            "PDB allows {} disruption(s) (expect at least {})",
            allowed, expected
        ))
    })
}

/// Resolves an absolute or percentage value against `total`, rounding up.
fn scaled(value: &IntOrString, total: i32) -> Result<i32> {
    match value {
        IntOrString::Int(n) => Ok(*n),
        IntOrString::String(raw) => {
            let percent: i64 = raw
                .strip_suffix('%')
                .and_then(|p| p.trim().parse().ok())
                .ok_or_else(|| Error::InvalidObject(format!("invalid PDB value '{}'", raw)))?;
            Ok(((percent * total as i64 + 99) / 100) as i32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{pdb, pod};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn store_with_pods(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store.insert(&pod("shop", &format!("web-{}", i), &[("app", "web")]));
        }
        store.insert(&pod("shop", "db-0", &[("app", "db")]));
        store
    }

    #[tokio::test]
    async fn test_min_available_leaves_no_disruption() {
        let store = store_with_pods(2);
        let policy = PdbMinAllowedDisruptionPolicy { min_allowed_disruption: 2 };
        let budget = pdb("shop", "web", json!({"minAvailable": 2}), &[("app", "web")]);

        let finding = min_allowed_disruption(&store, &policy, &budget).await.unwrap();
        assert!(finding.violated);
        assert_eq!(
            finding.message,
            "PDB doesnt have enough disruption pod (expect 2, but currently is 0)"
        );
    }

    #[tokio::test]
    async fn test_max_unavailable_percentage_rounds_up() {
        let store = store_with_pods(3);
        let policy = PdbMinAllowedDisruptionPolicy { min_allowed_disruption: 1 };
        let budget = pdb("shop", "web", json!({"maxUnavailable": "34%"}), &[("app", "web")]);

        let finding = min_allowed_disruption(&store, &policy, &budget).await.unwrap();
        assert!(!finding.violated, "{}", finding.message);
    }

    #[tokio::test]
    async fn test_minimum_below_one_is_raised_to_one() {
        let store = store_with_pods(1);
        let policy = PdbMinAllowedDisruptionPolicy { min_allowed_disruption: 0 };
        let budget = pdb("shop", "web", json!({"maxUnavailable": 0}), &[("app", "web")]);

        let finding = min_allowed_disruption(&store, &policy, &budget).await.unwrap();
        assert!(finding.violated);
        assert!(finding.message.contains("expect 1"));
    }

    #[test]
    fn test_scaled_values() {
        assert_eq!(scaled(&IntOrString::Int(3), 10).unwrap(), 3);
        assert_eq!(scaled(&IntOrString::String("50%".into()), 3).unwrap(), 2);
        assert!(scaled(&IntOrString::String("half".into()), 3).is_err());
    }
}

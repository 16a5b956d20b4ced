/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/namespace.rs
*
* Namespace label policy.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::Finding;
use crate::crds::NamespaceLabelPolicy;
use k8s_openapi::api::core::v1::Namespace;

pub fn required_labels(policy: &NamespaceLabelPolicy, ns: &Namespace) -> Finding {
    let labels = ns.metadata.labels.as_ref();
    let missing: Vec<String> = policy
        .labels
        .iter()
        .filter(|(key, value)| match labels.and_then(|l| l.get(*key)) {
            None => true,
            Some(actual) => !value.is_empty() && actual != *value,
        })
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{}={}", key, value)
            }
        })
        .collect();

    if missing.is_empty() {
        Finding::ok("namespace has all required labels")
    } else {
        Finding::violated(format!(
            "namespace is missing required labels: {}",
            missing.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::namespace;

    fn policy(pairs: &[(&str, &str)]) -> NamespaceLabelPolicy {
        NamespaceLabelPolicy {
            labels: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn test_empty_value_only_requires_key() {
        let p = policy(&[("team", "")]);
        assert!(!required_labels(&p, &namespace("shop", &[("team", "web")])).violated);
        assert!(required_labels(&p, &namespace("shop", &[])).violated);
    }

    #[test]
    fn test_value_mismatch_is_reported() {
        let p = policy(&[("env", "prod"), ("team", "")]);
        let finding = required_labels(&p, &namespace("shop", &[("env", "dev")]));
        assert!(finding.violated);
        assert_eq!(finding.message, "namespace is missing required labels: env=prod, team");
    }
}

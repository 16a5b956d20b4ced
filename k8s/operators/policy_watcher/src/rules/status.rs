/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/status.rs
*
* Violation bookkeeping on `RuleStatus` and the merge patch that persists it.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::RuleStatus;
use crate::utils::now_rfc3339;
use serde_json::{json, Map, Value};

impl RuleStatus {
    /// Records the latest verdict for `identity`. A violation inserts or
    /// refreshes the entry; a non-violation removes it.
    pub fn set_violation(&mut self, identity: &str, violated: bool) {
        let now = now_rfc3339();
        if violated {
            self.violations.insert(identity.to_string(), now.clone());
        } else {
            self.violations.remove(identity);
        }
        self.checked_at = Some(now);
    }

    pub fn is_violated(&self, identity: &str) -> bool {
        self.violations.contains_key(identity)
    }

    /// Whether the set of violating identities differs from `other`.
    pub fn membership_differs(&self, other: &RuleStatus) -> bool {
        !self.violations.keys().eq(other.violations.keys())
    }

    /// Merge patch turning `persisted` into `self`. Keys that disappeared are
    /// written as `null` so the API server drops them.
    pub fn patch_from(&self, persisted: &RuleStatus) -> Value {
        let mut violations: Map<String, Value> = persisted
            .violations
            .keys()
            .filter(|k| !self.violations.contains_key(*k))
            .map(|k| (k.clone(), Value::Null))
            .collect();
        for (k, v) in &self.violations {
            violations.insert(k.clone(), Value::String(v.clone()));
        }
        json!({
            "status": {
                "checkedAt": self.checked_at,
                "violations": violations,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_violation_is_idempotent() {
        let mut status = RuleStatus::default();
        status.set_violation("shop/web", true);
        status.set_violation("shop/web", true);
        assert_eq!(status.violations.len(), 1);
        assert!(status.is_violated("shop/web"));

        status.set_violation("shop/api", false);
        assert_eq!(status.violations.len(), 1);
        assert!(status.checked_at.is_some());

        status.set_violation("shop/web", false);
        assert!(status.violations.is_empty());
    }

    #[test]
    fn test_patch_tombstones_removed_keys() {
        let mut persisted = RuleStatus::default();
        persisted.set_violation("shop/web", true);
        persisted.set_violation("shop/api", true);

        let mut current = persisted.clone();
        current.set_violation("shop/api", false);
        current.set_violation("shop/db", true);

        let patch = current.patch_from(&persisted);
        let violations = &patch["status"]["violations"];
        assert!(violations["shop/api"].is_null());
        assert!(violations.as_object().unwrap().contains_key("shop/api"));
        assert!(violations["shop/web"].is_string());
        assert!(violations["shop/db"].is_string());
        assert!(current.membership_differs(&persisted));
    }
}

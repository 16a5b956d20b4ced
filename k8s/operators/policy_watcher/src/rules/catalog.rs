/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/rules/catalog.rs
*
* Process-wide registry of per-rule locks and last committed statuses.
*
* Locking discipline: the map itself sits behind a short-lived mutex that is
* only held to find or create an entry. Each entry has its own async mutex,
* held for a whole evaluate-persist cycle of that rule; the owned guard
* releases it on every exit path, including `?` returns.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::Rule;
use crate::crds::RuleStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct CatalogEntry {
    /// Status of the last successful evaluation, tagged with the rule uid.
    committed: Option<(Option<String>, RuleStatus)>,
}

impl CatalogEntry {
    /// Brings `rule` up to the last committed status when the object read
    /// from the store lags behind our own writes.
    pub fn checkout(&self, rule: &mut Rule) {
        if let Some((uid, status)) = &self.committed {
            if *uid == rule.uid && status.checked_at > rule.status.checked_at {
                rule.adopt_status(status.clone());
            }
        }
    }

    pub fn commit(&mut self, rule: &Rule) {
        self.committed = Some((rule.uid.clone(), rule.status.clone()));
    }
}

pub type RuleGuard = OwnedMutexGuard<CatalogEntry>;

#[derive(Debug, Default)]
pub struct RuleCatalog {
    entries: Mutex<HashMap<String, Arc<Mutex<CatalogEntry>>>>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the entry for `key`, creating it on first use.
    pub async fn lock(&self, key: &str) -> RuleGuard {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(CatalogEntry::default())))
                .clone()
        };
        entry.lock_owned().await
    }

    /// Forgets a deleted rule. Holders of its guard keep theirs.
    pub async fn remove(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

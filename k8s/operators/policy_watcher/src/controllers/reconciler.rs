/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/controllers/reconciler.rs
*
* Orchestration of rule evaluation. Every watch event, whether it concerns a
* rule or a watched object, becomes a `ReconcileRequest` handled here.
*
* Architecture:
* - Rule requests re-run `evaluate_all` for that one rule, after running the
*   finalizer protocol (add on first sight, flush alerts and release on delete).
* - Resource requests resolve which rules apply to the object: the namespaced
*   rules of a family in the object's namespace if there are any, otherwise
*   every cluster rule of the family not ignoring that namespace. Each rule then
*   evaluates the single object. A missing object is reported as recovered.
* - Each rule is evaluated under its catalog lock. Within that lock the status
*   is persisted before alerts reach the notifiers. Once it is persisted, the
*   hand-off to the notifiers runs as its own task that owns the lock, so a
*   reconcile timeout either hits before any alert moved or not at all.
* - The object is stamped as checked only when at least one rule judged it.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::OperatorConfig;
use crate::error::{Error, Result};
use crate::notifier::{Alert, NotifierCache, ResourceRef, RuleRef};
use crate::rules::catalog::RuleGuard;
use crate::rules::target::LAST_CHECKED_ANNOTATION;
use crate::rules::{identity, rule_key, Finding, Rule, RuleCatalog, RuleKind, Target, TargetKind};
use crate::store::ObjectStore;
use crate::utils;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const RULE_DELETED: &str = "rule deleted";
const OBJECT_GONE: &str = "deleted or no longer selected";
const NOTIFIER_DROPPED: &str = "notifier removed from rule";

/// What a request is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subject {
    Rule(RuleKind),
    Resource(TargetKind),
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subject::Rule(kind) => kind.as_str(),
            Subject::Resource(kind) => kind.as_str(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub subject: Subject,
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
}

impl ReconcileRequest {
    #[cfg(test)]
    pub fn rule(kind: RuleKind, namespace: &str, name: &str) -> Self {
        Self {
            subject: Subject::Rule(kind),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn resource(kind: TargetKind, namespace: &str, name: &str) -> Self {
        Self {
            subject: Subject::Resource(kind),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.subject.as_str(), identity(&self.namespace, &self.name))
    }
}

/// Result of judging one object against one rule.
#[derive(Debug, PartialEq, Eq)]
enum Judgement {
    /// The rule is gone or being deleted.
    Skipped,
    /// The rule wants to see the object again after this long.
    Deferred(Duration),
    Evaluated,
}

#[derive(Debug, PartialEq, Eq)]
enum RuleOutcome {
    Missing,
    Deleted,
    Evaluated { created: bool },
}

pub struct Reconciler<S> {
    store: S,
    rules: RuleCatalog,
    notifiers: Arc<NotifierCache>,
    config: OperatorConfig,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: S, notifiers: Arc<NotifierCache>, config: OperatorConfig) -> Self {
        Self {
            store,
            rules: RuleCatalog::new(),
            notifiers,
            config,
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub fn notifiers(&self) -> &Arc<NotifierCache> {
        &self.notifiers
    }

    #[cfg(test)]
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Delay before a failed request is retried.
    pub fn retry_delay(&self) -> Duration {
        utils::jittered_delay(self.config.retry_min, self.config.retry_max)
    }

    /// Handles one request within the reconcile deadline. `Ok(Some(d))` asks
    /// for the same request again after `d`.
    pub async fn reconcile(&self, request: &ReconcileRequest) -> Result<Option<Duration>> {
        let deadline = self.config.reconcile_timeout;
        match tokio::time::timeout(deadline, self.handle(request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(deadline)),
        }
    }

    async fn handle(&self, request: &ReconcileRequest) -> Result<Option<Duration>> {
        match request.subject {
            Subject::Rule(kind) => self.reconcile_rule(kind, &request.namespace, &request.name).await,
            Subject::Resource(kind) => {
                self.reconcile_resource(kind, &request.namespace, &request.name)
                    .await
            }
        }
    }

    // --- Rule triggers ---

    async fn reconcile_rule(&self, kind: RuleKind, namespace: &str, name: &str) -> Result<Option<Duration>> {
        let outcome = self.sync_rule(kind, namespace, name).await?;

        // A namespaced rule appearing or going away changes which namespaces
        // the cluster rules of its family are responsible for.
        let hand_over = matches!(outcome, RuleOutcome::Deleted | RuleOutcome::Evaluated { created: true });
        if let (true, Some(cluster_kind)) = (hand_over, kind.cluster_counterpart()) {
            for rule in cluster_kind.list(&self.store, "").await? {
                if !rule.deleting {
                    self.sync_rule(cluster_kind, "", &rule.name).await?;
                }
            }
        }

        Ok(match outcome {
            RuleOutcome::Evaluated { .. } => Some(self.config.rule_resync),
            _ => None,
        })
    }

    #[instrument(skip(self))]
    async fn sync_rule(&self, kind: RuleKind, namespace: &str, name: &str) -> Result<RuleOutcome> {
        let key = rule_key(kind, namespace, name);
        let entry = self.rules.lock(&key).await;

        let Some(mut rule) = kind.load(&self.store, namespace, name).await? else {
            let rule = RuleRef {
                kind: kind.as_str().to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            };
            self.notifiers.clear_rule_alerts(&rule, RULE_DELETED).await;
            drop(entry);
            self.rules.remove(&key).await;
            return Ok(RuleOutcome::Missing);
        };

        if rule.deleting {
            if rule.remove_finalizer() {
                let cleared = self.notifiers.clear_rule_alerts(&rule.rule_ref(), RULE_DELETED).await;
                info!(cleared, "Rule is being deleted, releasing finalizer");
                rule.persist_finalizers(&self.store).await?;
            }
            drop(entry);
            self.rules.remove(&key).await;
            return Ok(RuleOutcome::Deleted);
        }

        let created = rule.set_finalizer();
        if created {
            rule.persist_finalizers(&self.store).await?;
        }

        entry.checkout(&mut rule);
        let overridden = self.overridden_namespaces(&rule).await?;
        let alerts = rule.evaluate_all(&self.store, &overridden).await?;

        // Writing the status fires another event for this rule, so an
        // unchanged status is only rewritten once per resync period.
        let stale = !utils::checked_recently(rule.persisted_checked_at(), Utc::now(), self.config.rule_resync);
        rule.status.checked_at = Some(utils::now_rfc3339());
        if stale || rule.status_changed() {
            rule.persist_status(&self.store).await?;
        }

        info!(
            alerts = alerts.len(),
            violations = rule.status.violations.len(),
            "Rule evaluated"
        );
        self.hand_over(entry, rule, alerts, true).await?;
        Ok(RuleOutcome::Evaluated { created })
    }

    /// Delivers the alerts of an evaluation whose status is already stored,
    /// then commits it and releases the rule lock. The work runs on its own
    /// task so that cancelling the reconcile cannot stop it halfway.
    async fn hand_over(&self, mut entry: RuleGuard, rule: Rule, alerts: Vec<Alert>, reroute: bool) -> Result<()> {
        let notifiers = self.notifiers.clone();
        tokio::spawn(async move {
            let targets = &rule.notification.notifiers;
            notifiers.set_alerts(targets, &alerts).await;
            if reroute {
                notifiers
                    .clear_rule_alerts_except(&rule.rule_ref(), targets, NOTIFIER_DROPPED)
                    .await;
            }
            entry.commit(&rule);
        })
        .await?;
        Ok(())
    }

    /// Namespaces where a namespaced rule overrides the cluster rule `rule`.
    async fn overridden_namespaces(&self, rule: &Rule) -> Result<BTreeSet<String>> {
        let Some(namespaced_kind) = rule.kind.namespaced_counterpart() else {
            return Ok(BTreeSet::new());
        };
        Ok(namespaced_kind
            .list(&self.store, "")
            .await?
            .into_iter()
            .filter(|r| !r.deleting)
            .map(|r| r.namespace)
            .collect())
    }

    // --- Resource triggers ---

    #[instrument(skip(self))]
    async fn reconcile_resource(&self, kind: TargetKind, namespace: &str, name: &str) -> Result<Option<Duration>> {
        let object = kind.get(&self.store, namespace, name).await?;

        if let Some(target) = &object {
            let last = target.annotation(LAST_CHECKED_ANNOTATION);
            if utils::checked_recently(last, Utc::now(), self.config.min_check_interval) {
                debug!("Object was checked recently, skipping");
                return Ok(None);
            }
        }

        let scope_namespace = match &object {
            Some(target) => target.scope_namespace().to_string(),
            None if kind == TargetKind::Namespace => name.to_string(),
            None => namespace.to_string(),
        };
        let id = identity(namespace, name);

        let mut retry_in: Option<Duration> = None;
        let mut judged = 0;
        for cluster_kind in RuleKind::cluster_kinds_watching(kind) {
            for (rule_kind, rule_ns, rule_name) in self.resolve(cluster_kind, &scope_namespace).await? {
                match self
                    .evaluate_object(rule_kind, &rule_ns, &rule_name, kind, &id, object.as_ref())
                    .await?
                {
                    Judgement::Evaluated => judged += 1,
                    Judgement::Deferred(delay) => {
                        retry_in = Some(retry_in.map_or(delay, |current| current.min(delay)));
                    }
                    Judgement::Skipped => {}
                }
            }
        }

        match (&object, retry_in) {
            (Some(_), None) if judged > 0 => {
                kind.mark_checked(&self.store, namespace, name, &utils::now_rfc3339())
                    .await?
            }
            (Some(_), None) => debug!("No rule applies to the object"),
            (Some(_), Some(delay)) => debug!(?delay, "Evaluation deferred"),
            (None, _) => {
                let resource = ResourceRef {
                    kind: kind.as_str().to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                };
                self.notifiers.clear_resource_alerts(&resource, OBJECT_GONE).await;
            }
        }
        Ok(retry_in)
    }

    /// Rules of the family of `cluster_kind` that apply in `namespace`.
    async fn resolve(&self, cluster_kind: RuleKind, namespace: &str) -> Result<Vec<(RuleKind, String, String)>> {
        if let Some(namespaced_kind) = cluster_kind.namespaced_counterpart() {
            if !namespace.is_empty() {
                let local: Vec<_> = namespaced_kind
                    .list(&self.store, namespace)
                    .await?
                    .into_iter()
                    .filter(|r| !r.deleting)
                    .map(|r| (namespaced_kind, r.namespace, r.name))
                    .collect();
                if !local.is_empty() {
                    return Ok(local);
                }
            }
        }

        Ok(cluster_kind
            .list(&self.store, "")
            .await?
            .into_iter()
            .filter(|r| !r.deleting && !r.is_ignored(namespace))
            .map(|r| (cluster_kind, String::new(), r.name))
            .collect())
    }

    /// Evaluates one object (or its absence) against one rule.
    #[instrument(skip(self, kind, id, object), fields(rule = %rule_key(rule_kind, rule_ns, rule_name)))]
    async fn evaluate_object(
        &self,
        rule_kind: RuleKind,
        rule_ns: &str,
        rule_name: &str,
        kind: TargetKind,
        id: &str,
        object: Option<&Target>,
    ) -> Result<Judgement> {
        let key = rule_key(rule_kind, rule_ns, rule_name);
        let entry = self.rules.lock(&key).await;

        let Some(mut rule) = rule_kind.load(&self.store, rule_ns, rule_name).await? else {
            return Ok(Judgement::Skipped);
        };
        if rule.deleting {
            return Ok(Judgement::Skipped);
        }
        entry.checkout(&mut rule);

        let alerts = match object {
            Some(target) => {
                let delay = rule.delay(target);
                if !delay.is_zero() {
                    return Ok(Judgement::Deferred(delay));
                }
                rule.evaluate(&self.store, target).await?
            }
            None if kind == rule_kind.primary_target() => {
                vec![rule.settle(kind, id, Finding::ok(OBJECT_GONE))]
            }
            None => Vec::new(),
        };

        if rule.status_changed() {
            rule.status.checked_at = Some(utils::now_rfc3339());
            rule.persist_status(&self.store).await?;
        }
        self.hand_over(entry, rule, alerts, false).await?;
        Ok(Judgement::Evaluated)
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/controllers/notifier_controller.rs
*
* Controller for the `Notifier` resource. It keeps the in-memory notifier in
* the cache in sync with its spec, flushes the notifier's alerts every
* `notifyIntervalSeconds`, and writes the tracked alerts back to the status so
* they survive a restart.
*
* A finalizer holds a deleted notifier until its alerts have been sent out as
* recovered.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{Notifier as NotifierResource, SlackConfig};
use crate::error::{Error, Result};
use crate::metrics;
use crate::notifier::{deliver, NotificationSink, NotifierCache, SinkConfig};
use crate::store::ObjectStore;
use crate::utils;
use chrono::Utc;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher,
    },
    ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, field, info, instrument, warn, Span};

pub const NOTIFIER_FINALIZER: &str = "watcher.ph.io/notifier-cleanup";

const NOTIFIER_DELETED: &str = "notifier deleted";
const MIN_REQUEUE: Duration = Duration::from_secs(1);

/// Notifier lifecycle, independent of the watch machinery.
pub struct NotifierReconciler<S> {
    store: S,
    cache: Arc<NotifierCache>,
    sink: Arc<dyn NotificationSink>,
    /// Upper bound on the webhook calls of one flush.
    flush_timeout: Duration,
}

impl<S: ObjectStore> NotifierReconciler<S> {
    pub fn new(
        store: S,
        cache: Arc<NotifierCache>,
        sink: Arc<dyn NotificationSink>,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            sink,
            flush_timeout,
        }
    }

    /// Resolves the webhook URL, from the referenced Secret when there is one.
    pub async fn resolve_sink(&self, slack: &SlackConfig) -> Result<SinkConfig> {
        let webhook_url = match (&slack.webhook_url_secret_ref, &slack.webhook_url) {
            (Some(secret_ref), _) => {
                let secret: Secret = self
                    .store
                    .get(Some(&secret_ref.namespace), &secret_ref.name)
                    .await?
                    .ok_or_else(|| {
                        Error::InvalidObject(format!(
                            "secret {}/{} not found",
                            secret_ref.namespace, secret_ref.name
                        ))
                    })?;
                secret_value(&secret, &secret_ref.key).ok_or_else(|| {
                    Error::InvalidObject(format!(
                        "secret {}/{} has no key '{}'",
                        secret_ref.namespace, secret_ref.name, secret_ref.key
                    ))
                })?
            }
            (None, Some(url)) if !url.is_empty() => url.clone(),
            _ => return Err(Error::InvalidObject("notifier has no Slack webhook URL".into())),
        };

        Ok(SinkConfig {
            webhook_url,
            channel: slack.channel.clone(),
            username: slack.username.clone(),
            min_severity: slack.min_severity,
        })
    }

    /// Registers or updates the notifier and flushes it when due. Returns the
    /// time until the next flush.
    ///
    /// The notifier lock is only held to pick the alerts to send and to apply
    /// the outcome. Rule reconciles keep adding alerts while the webhook calls
    /// run, bounded by the flush deadline.
    pub async fn apply(&self, resource: &NotifierResource) -> Result<Duration> {
        let sink = self.resolve_sink(&resource.spec.slack).await?;
        let shared = self.cache.upsert(resource, sink).await;

        let outbox = {
            let mut notifier = shared.lock().await;
            if !notifier.is_due(Utc::now()) {
                return Ok(notifier.due_in(Utc::now()).max(MIN_REQUEUE));
            }
            notifier.begin_notify()
        };

        let results = deliver(self.sink.as_ref(), &outbox, self.flush_timeout).await;

        let (name, patch, keys, report) = {
            let mut notifier = shared.lock().await;
            let report = notifier.finish_notify(outbox, results);
            (notifier.name.clone(), notifier.status_patch()?, notifier.alert_keys(), report)
        };
        self.store
            .merge_patch_status::<NotifierResource>(None, &name, &patch)
            .await?;

        let mut notifier = shared.lock().await;
        notifier.mark_persisted(keys);
        info!(
            delivered = report.delivered,
            failed = report.failed,
            tracked = notifier.alerts().len(),
            "Notifier flushed"
        );
        Ok(notifier.due_in(Utc::now()).max(MIN_REQUEUE))
    }

    /// Sends every tracked alert out as recovered and forgets the notifier.
    pub async fn cleanup(&self, resource: &NotifierResource) -> Result<()> {
        let name = resource.name_any();
        if let Some(shared) = self.cache.remove(&name).await {
            let mut notifier = shared.lock().await;
            let cleared = notifier.clear_all_alerts(NOTIFIER_DELETED);
            let report = notifier.notify(self.sink.as_ref(), self.flush_timeout).await;
            info!(cleared, delivered = report.delivered, "Notifier removed");
        }
        Ok(())
    }

    /// Loads every notifier with its persisted alerts, before any rule runs.
    pub async fn preload(&self) -> Result<usize> {
        let resources: Vec<NotifierResource> = self.store.list(None, None).await?;
        let mut loaded = 0;
        for resource in resources.iter().filter(|r| r.metadata.deletion_timestamp.is_none()) {
            let sink = match self.resolve_sink(&resource.spec.slack).await {
                Ok(sink) => sink,
                Err(e) => {
                    warn!(notifier = %resource.name_any(), error = %e, "Webhook not resolvable yet");
                    SinkConfig {
                        min_severity: resource.spec.slack.min_severity,
                        ..Default::default()
                    }
                }
            };
            self.cache.upsert(resource, sink).await;
            loaded += 1;
        }
        Ok(loaded)
    }
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    if let Some(raw) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(raw.0.clone()).ok().map(|s| s.trim().to_string());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|s| s.trim().to_string())
}

// --- Controller wiring ---

struct Context<S> {
    client: Client,
    reconciler: Arc<NotifierReconciler<S>>,
    retry_min: Duration,
    retry_max: Duration,
}

/// Runs the notifier controller until shutdown.
pub async fn run<S: ObjectStore>(
    client: Client,
    reconciler: Arc<NotifierReconciler<S>>,
    retry_min: Duration,
    retry_max: Duration,
) {
    let api: Api<NotifierResource> = Api::all(client.clone());
    let context = Arc::new(Context {
        client,
        reconciler,
        retry_min,
        retry_max,
    });

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(notifier = %obj.name, "Reconciled Notifier"),
                Err(e) => warn!("Notifier reconcile error: {}", e),
            }
        })
        .await;
}

#[instrument(skip(notifier, ctx), fields(notifier = field::Empty))]
async fn reconcile<S: ObjectStore>(notifier: Arc<NotifierResource>, ctx: Arc<Context<S>>) -> Result<Action> {
    Span::current().record("notifier", notifier.name_any().as_str());
    let api: Api<NotifierResource> = Api::all(ctx.client.clone());

    finalizer(&api, NOTIFIER_FINALIZER, notifier, |event| async {
        match event {
            FinalizerEvent::Apply(n) => ctx.reconciler.apply(&n).await.map(Action::requeue),
            FinalizerEvent::Cleanup(n) => {
                ctx.reconciler.cleanup(&n).await?;
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| Error::Finalizer(e.into()))
}

fn error_policy<S: ObjectStore>(notifier: Arc<NotifierResource>, error: &Error, ctx: Arc<Context<S>>) -> Action {
    metrics::record_reconcile_error("Notifier");
    let delay = utils::jittered_delay(ctx.retry_min, ctx.retry_max);
    warn!(notifier = %notifier.name_any(), error = %error, ?delay, "Notifier reconciliation failed");
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::Severity;
    use crate::notifier::sink::RecordingSink;
    use crate::notifier::{Alert, AlertStatus};
    use crate::rules::testing::{meta, notifier_resource};
    use crate::store::MemoryStore;
    use k8s_openapi::ByteString;
    use serde_json::json;
    use std::collections::BTreeMap;

    const FLUSH: Duration = Duration::from_secs(5);

    fn setup() -> (NotifierReconciler<MemoryStore>, Arc<NotifierCache>, Arc<RecordingSink>) {
        let cache = Arc::new(NotifierCache::new());
        let sink = Arc::new(RecordingSink::new());
        let reconciler = NotifierReconciler::new(MemoryStore::new(), cache.clone(), sink.clone(), FLUSH);
        (reconciler, cache, sink)
    }

    fn violation() -> Alert {
        Alert {
            rule_kind: "ClusterPodHealthRule".into(),
            rule_name: "pods".into(),
            resource_kind: "Pod".into(),
            resource_namespace: "shop".into(),
            resource_name: "web-0".into(),
            violated: true,
            severity: Severity::Critical,
            message: "pod phase is Failed".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_apply_flushes_when_due_and_persists_status() {
        let (r, cache, sink) = setup();
        let resource = notifier_resource("slack");
        r.store.insert(&resource);

        let requeue = r.apply(&resource).await.unwrap();
        assert!(requeue > Duration::from_secs(50));

        cache.set_alert(&["slack".to_string()], &violation()).await;
        r.apply(&resource).await.unwrap();
        assert!(sink.sent().is_empty(), "not due yet");

        cache.get("slack").await.unwrap().lock().await.checked_at = None;
        r.apply(&resource).await.unwrap();
        assert_eq!(sink.sent().len(), 1);

        let stored: NotifierResource = r.store.get(None, "slack").await.unwrap().unwrap();
        let status = stored.status.unwrap();
        assert!(status.checked_at.is_some());
        assert_eq!(status.alerts[&violation().key()].status, AlertStatus::Firing);
    }

    #[tokio::test]
    async fn test_slow_webhook_does_not_block_incoming_alerts() {
        let (r, cache, sink) = setup();
        let r = Arc::new(r);
        let resource = notifier_resource("slack");
        r.store.insert(&resource);
        r.apply(&resource).await.unwrap();

        cache.set_alert(&["slack".to_string()], &violation()).await;
        cache.get("slack").await.unwrap().lock().await.checked_at = None;
        sink.set_latency(Duration::from_millis(300));

        let flush = {
            let r = r.clone();
            let resource = resource.clone();
            tokio::spawn(async move { r.apply(&resource).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut late = violation();
        late.resource_name = "web-1".into();
        tokio::time::timeout(
            Duration::from_millis(100),
            cache.set_alert(&["slack".to_string()], &late),
        )
        .await
        .expect("alert accepted while the flush is sending");

        flush.await.unwrap().unwrap();
        assert_eq!(sink.sent().len(), 1);
        let shared = cache.get("slack").await.unwrap();
        let notifier = shared.lock().await;
        assert_eq!(notifier.alerts()[&violation().key()].status, AlertStatus::Firing);
        assert_eq!(notifier.alerts()[&late.key()].status, AlertStatus::Pending);
    }

    #[tokio::test]
    async fn test_webhook_url_from_secret() {
        let (r, _, _) = setup();
        r.store.insert(&Secret {
            metadata: meta("ops", "slack"),
            data: Some(BTreeMap::from([(
                "webhookUrl".to_string(),
                ByteString(b"https://hooks.slack.test/secret\n".to_vec()),
            )])),
            ..Default::default()
        });

        let mut slack: SlackConfig = serde_json::from_value(json!({
            "webhookUrlSecretRef": {"namespace": "ops", "name": "slack"},
            "channel": "#alerts"
        }))
        .unwrap();
        let sink = r.resolve_sink(&slack).await.unwrap();
        assert_eq!(sink.webhook_url, "https://hooks.slack.test/secret");
        assert_eq!(sink.channel.as_deref(), Some("#alerts"));

        if let Some(secret_ref) = slack.webhook_url_secret_ref.as_mut() {
            secret_ref.key = "other".into();
        }
        assert!(matches!(r.resolve_sink(&slack).await, Err(Error::InvalidObject(_))));
        assert!(r.resolve_sink(&SlackConfig::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_sends_recoveries_and_forgets_notifier() {
        let (r, cache, sink) = setup();
        let resource = notifier_resource("slack");
        r.store.insert(&resource);
        r.apply(&resource).await.unwrap();

        cache.set_alert(&["slack".to_string()], &violation()).await;
        let shared = cache.get("slack").await.unwrap();
        shared.lock().await.notify(sink.as_ref(), FLUSH).await;

        r.cleanup(&resource).await.unwrap();
        assert!(cache.get("slack").await.is_none());
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].status, AlertStatus::Recovering);
        assert!(sent[1].message.starts_with("notifier deleted: "));
    }

    #[tokio::test]
    async fn test_preload_restores_persisted_alerts() {
        let (r, cache, _) = setup();
        let alert = Alert {
            status: AlertStatus::Firing,
            ..violation()
        };
        let mut persisted = notifier_resource("slack");
        persisted.status = Some(crate::crds::NotifierStatus {
            checked_at: Some(utils::now_rfc3339()),
            alerts: BTreeMap::from([(alert.key(), alert.clone())]),
        });
        r.store.insert(&persisted);
        r.store.insert(&notifier_resource("pager"));

        assert_eq!(r.preload().await.unwrap(), 2);
        assert_eq!(cache.names().await, vec!["pager".to_string(), "slack".to_string()]);
        let slack = cache.get("slack").await.unwrap();
        assert_eq!(slack.lock().await.alert(&alert.key()), Some(&alert));
    }
}

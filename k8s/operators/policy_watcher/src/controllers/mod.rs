/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/controllers/mod.rs
*
* Watch wiring. Every rule kind and every watched object kind gets its own
* `Controller` over `DynamicObject`, so the fifteen rule CRDs and the seven
* workload kinds share one reconcile function. Each controller only turns its
* events into `ReconcileRequest`s; the decisions are made by `Reconciler`.
*
* A `Controller` never reconciles an object that has left its cache, so the
* deletions of watched objects come from a separate metadata watch per kind.
* Rules hold a finalizer and are seen by their controller while deleting.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod notifier_controller;
pub mod reconciler;

pub use reconciler::{ReconcileRequest, Reconciler, Subject};

use crate::error::Error;
use crate::metrics;
use crate::rules::{RuleKind, TargetKind};
use crate::store::KubeStore;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kube::{
    api::{Api, ApiResource, DynamicObject},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        metadata_watcher, watcher, WatchStreamExt,
    },
    Resource, ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts at handling one deletion before it is left to the rule resync.
const DELETION_ATTEMPTS: usize = 5;

struct Context {
    reconciler: Arc<Reconciler<KubeStore>>,
    subject: Subject,
}

async fn reconcile(obj: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action, Error> {
    let request = ReconcileRequest {
        subject: ctx.subject,
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
    };
    debug!(request = %request, "Reconciling");
    match ctx.reconciler.reconcile(&request).await? {
        Some(delay) => Ok(Action::requeue(delay)),
        None => Ok(Action::await_change()),
    }
}

/// Failed requests come back after a jittered delay, so many rules failing
/// together during an API outage do not retry in lockstep.
fn error_policy(obj: Arc<DynamicObject>, error: &Error, ctx: Arc<Context>) -> Action {
    metrics::record_reconcile_error(ctx.subject.as_str());
    let delay = ctx.reconciler.retry_delay();
    warn!(
        kind = ctx.subject.as_str(),
        namespace = %obj.namespace().unwrap_or_default(),
        object_name = %obj.name_any(),
        error = %error,
        ?delay,
        "Reconciliation failed, retrying"
    );
    Action::requeue(delay)
}

fn watch(
    client: &Client,
    subject: Subject,
    resource: ApiResource,
    reconciler: Arc<Reconciler<KubeStore>>,
) -> BoxFuture<'static, ()> {
    let api = Api::<DynamicObject>::all_with(client.clone(), &resource);
    let context = Arc::new(Context { reconciler, subject });

    Controller::new_with(api, watcher::Config::default(), resource)
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(move |res| async move {
            match res {
                Ok((obj, _)) => debug!(kind = subject.as_str(), object = %obj, "Reconciled"),
                Err(e) => debug!(kind = subject.as_str(), error = %e, "Controller event failed"),
            }
        })
        .boxed()
}

/// The request a watch event stands for, if it reports a deletion.
pub fn deletion_request<K: Resource>(kind: TargetKind, event: &watcher::Event<K>) -> Option<ReconcileRequest> {
    match event {
        watcher::Event::Delete(obj) => Some(ReconcileRequest::resource(
            kind,
            &obj.namespace().unwrap_or_default(),
            &obj.name_any(),
        )),
        _ => None,
    }
}

async fn handle_deletion(reconciler: Arc<Reconciler<KubeStore>>, request: ReconcileRequest) {
    for attempt in 1..=DELETION_ATTEMPTS {
        match reconciler.reconcile(&request).await {
            Ok(_) => {
                debug!(request = %request, "Deletion handled");
                return;
            }
            Err(e) => {
                metrics::record_reconcile_error(request.subject.as_str());
                let delay = reconciler.retry_delay();
                warn!(request = %request, attempt, error = %e, ?delay, "Handling deletion failed");
                tokio::time::sleep(delay).await;
            }
        }
    }
    warn!(request = %request, "Giving up on deletion, the next rule resync will settle it");
}

fn watch_deletions(
    client: &Client,
    kind: TargetKind,
    reconciler: Arc<Reconciler<KubeStore>>,
) -> BoxFuture<'static, ()> {
    let api = Api::<DynamicObject>::all_with(client.clone(), &kind.api_resource());

    metadata_watcher(api, watcher::Config::default())
        .default_backoff()
        .for_each(move |event| {
            let reconciler = reconciler.clone();
            async move {
                match event {
                    Ok(event) => {
                        if let Some(request) = deletion_request(kind, &event) {
                            tokio::spawn(handle_deletion(reconciler, request));
                        }
                    }
                    Err(e) => debug!(kind = kind.as_str(), error = %e, "Deletion watch error"),
                }
            }
        })
        .boxed()
}

/// Runs one controller per rule kind and per watched kind until shutdown.
pub async fn run(client: Client, reconciler: Arc<Reconciler<KubeStore>>) {
    let mut loops = Vec::new();
    for kind in RuleKind::ALL {
        loops.push(watch(&client, Subject::Rule(kind), kind.api_resource(), reconciler.clone()));
    }
    for kind in TargetKind::ALL {
        loops.push(watch(
            &client,
            Subject::Resource(kind),
            kind.api_resource(),
            reconciler.clone(),
        ));
    }
    let controllers = loops.len();
    let deletions = TargetKind::ALL
        .into_iter()
        .map(|kind| watch_deletions(&client, kind, reconciler.clone()))
        .collect::<Vec<_>>();
    info!(controllers, deletion_watches = deletions.len(), "Starting rule and resource controllers");

    // The deletion watches have no shutdown hook; they stop with the controllers.
    tokio::select! {
        _ = futures::future::join_all(loops) => {}
        _ = futures::future::join_all(deletions) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pod(ns: &str, name: &str) -> DynamicObject {
        DynamicObject::new(name, &TargetKind::Pod.api_resource()).within(ns)
    }

    #[test]
    fn test_only_delete_events_become_requests() {
        let gone = deletion_request(TargetKind::Pod, &watcher::Event::Delete(pod("shop", "web-0")));
        assert_eq!(gone, Some(ReconcileRequest::resource(TargetKind::Pod, "shop", "web-0")));

        for event in [
            watcher::Event::Apply(pod("shop", "web-0")),
            watcher::Event::InitApply(pod("shop", "web-0")),
            watcher::Event::Init,
            watcher::Event::InitDone,
        ] {
            assert_eq!(deletion_request(TargetKind::Pod, &event), None);
        }
    }

    #[test]
    fn test_cluster_scoped_deletion_has_empty_namespace() {
        let ns = DynamicObject::new("shop", &TargetKind::Namespace.api_resource());
        let request = deletion_request(TargetKind::Namespace, &watcher::Event::Delete(ns));
        assert_eq!(
            request,
            Some(ReconcileRequest::resource(TargetKind::Namespace, "", "shop"))
        );
    }
}

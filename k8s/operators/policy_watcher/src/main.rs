/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* Archive: k8s/operators/policy_watcher/src/main.rs
*
* Entry point of the policy-watcher operator.
*
* Architecture:
* 1.  **Initialization**: configuration is read from the environment, then
*     `tracing` is set up (JSON logs, plus a Jaeger exporter when enabled).
* 2.  **Notifiers first**: the notifier cache is preloaded from the cluster
*     before any rule runs, so alerts produced by the first evaluations land
*     in notifiers that already know what they delivered before a restart.
* 3.  **Controllers**: one controller per rule kind and per watched object
*     kind (see `controllers::run`) plus the notifier controller, all driven
*     concurrently with the `/metrics` server.
*
* Running the binary with the `crds` argument prints the CustomResourceDefinitions
* of every resource this operator owns and exits.
*
* SPDX-License-Identifier: Apache-2.0 */

use kube::{Client, CustomResourceExt};
use opentelemetry::global;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warp::Filter;

mod config;
mod controllers;
mod crds;
mod error;
mod metrics;
mod notifier;
mod rules;
mod store;
mod utils;

use config::OperatorConfig;
use controllers::notifier_controller::{self, NotifierReconciler};
use controllers::Reconciler;
use notifier::{NotificationSink, NotifierCache, SlackSink};
use rules::RuleKind;
use store::KubeStore;

/// Installs the global subscriber. The Jaeger layer is only built when enabled.
fn init_telemetry(jaeger_enabled: bool) -> Result<(), Box<dyn std::error::Error>> {
    let telemetry = if jaeger_enabled {
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name("policy-watcher")
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Renders the metrics into the Prometheus text format.
async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return Err(warp::reject());
    }

    let response = String::from_utf8_lossy(&buffer).into_owned();
    Ok(warp::reply::with_header(
        response,
        "Content-Type",
        encoder.format_type(),
    ))
}

/// Runs the HTTP server to expose the /metrics endpoint.
async fn run_metrics_server(registry: Arc<Registry>, port: u16) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler);

    info!(port, "Starting metrics server");
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}

fn print_crds() -> Result<(), Box<dyn std::error::Error>> {
    for kind in RuleKind::ALL {
        println!("---\n{}", serde_json::to_string_pretty(&kind.crd())?);
    }
    println!("---\n{}", serde_json::to_string_pretty(&crds::Notifier::crd())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::args().nth(1).as_deref() == Some("crds") {
        return print_crds();
    }

    // 1. Configuration and telemetry
    let config = OperatorConfig::from_env()?;
    init_telemetry(config.jaeger_enabled)?;
    info!(?config, "Telemetry initialized.");

    // 2. Kubernetes client and metrics registry
    let client = Client::try_default().await?;
    let registry = Arc::new(metrics::create_and_register_metrics()?);

    // 3. Notifiers, preloaded before any rule is evaluated
    let notifiers = Arc::new(NotifierCache::new());
    let sink: Arc<dyn NotificationSink> = Arc::new(SlackSink::new());
    let notifier_reconciler = Arc::new(NotifierReconciler::new(
        KubeStore::new(client.clone()),
        notifiers.clone(),
        sink,
        config.flush_timeout,
    ));
    let preloaded = notifier_reconciler.preload().await?;
    info!(notifiers = preloaded, "Notifier cache preloaded.");

    // 4. Rule and resource reconciler
    let reconciler = Arc::new(Reconciler::new(
        KubeStore::new(client.clone()),
        notifiers,
        config.clone(),
    ));

    info!("Policy watcher starting...");

    // 5. The controllers stop on SIGTERM/ctrl-c; the metrics server does not.
    tokio::select! {
        _ = run_metrics_server(registry, config.metrics_port) => {
            error!("Metrics server exited unexpectedly");
        }
        _ = async {
            tokio::join!(
                notifier_controller::run(
                    client.clone(),
                    notifier_reconciler,
                    config.retry_min,
                    config.retry_max,
                ),
                controllers::run(client.clone(), reconciler),
            )
        } => {}
    }

    info!("Policy watcher shutting down.");

    if config.jaeger_enabled {
        global::shutdown_tracer_provider();
    }

    Ok(())
}

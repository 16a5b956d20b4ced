/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/error.rs
*
* Error type shared by the rule engine, the notifier state machine and the
* controllers. Object-store "not found" is never an error: lookups return
* `Option` instead.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Object store error: {0}")]
    Store(String),

    #[error("Rule {rule} cannot evaluate a {found} (expected one of: {expected})")]
    TypeMismatch {
        rule: String,
        expected: String,
        found: String,
    },

    #[error("Unsupported scale target kind '{0}' (expected Deployment or ReplicaSet)")]
    UnsupportedScaleTarget(String),

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Missing object key '{0}' in resource")]
    MissingObjectKey(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Reconcile did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Notification delivery failed: {0}")]
    Sink(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

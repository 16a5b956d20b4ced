/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/config.rs
*
* Runtime settings of the operator, read once from the environment at
* startup. Every setting has a default so the operator runs without any
* configuration in a cluster.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::error::{Error, Result};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_METRICS_PORT: &str = "POLICY_WATCHER_METRICS_PORT";
pub const ENV_MIN_CHECK_INTERVAL: &str = "POLICY_WATCHER_MIN_CHECK_INTERVAL_SECONDS";
pub const ENV_RETRY_MIN: &str = "POLICY_WATCHER_RETRY_MIN_SECONDS";
pub const ENV_RETRY_MAX: &str = "POLICY_WATCHER_RETRY_MAX_SECONDS";
pub const ENV_RULE_RESYNC: &str = "POLICY_WATCHER_RULE_RESYNC_SECONDS";
pub const ENV_RECONCILE_TIMEOUT: &str = "POLICY_WATCHER_RECONCILE_TIMEOUT_SECONDS";
pub const ENV_FLUSH_TIMEOUT: &str = "POLICY_WATCHER_FLUSH_TIMEOUT_SECONDS";
pub const ENV_JAEGER_ENABLED: &str = "POLICY_WATCHER_JAEGER_ENABLED";

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    pub metrics_port: u16,
    /// Events on an object checked less than this long ago are dropped.
    pub min_check_interval: Duration,
    pub retry_min: Duration,
    pub retry_max: Duration,
    /// How often a rule re-runs its full evaluation without any event.
    pub rule_resync: Duration,
    pub reconcile_timeout: Duration,
    /// Upper bound on the webhook calls of one notifier flush.
    pub flush_timeout: Duration,
    pub jaeger_enabled: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: 9090,
            min_check_interval: Duration::from_secs(10),
            retry_min: Duration::from_secs(10),
            retry_max: Duration::from_secs(30),
            rule_resync: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(60),
            flush_timeout: Duration::from_secs(30),
            jaeger_enabled: false,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_secs(parse_or(&lookup, key, default.as_secs())?))
        };

        let config = Self {
            metrics_port: parse_or(&lookup, ENV_METRICS_PORT, defaults.metrics_port)?,
            min_check_interval: secs(ENV_MIN_CHECK_INTERVAL, defaults.min_check_interval)?,
            retry_min: secs(ENV_RETRY_MIN, defaults.retry_min)?,
            retry_max: secs(ENV_RETRY_MAX, defaults.retry_max)?,
            rule_resync: secs(ENV_RULE_RESYNC, defaults.rule_resync)?,
            reconcile_timeout: secs(ENV_RECONCILE_TIMEOUT, defaults.reconcile_timeout)?,
            flush_timeout: secs(ENV_FLUSH_TIMEOUT, defaults.flush_timeout)?,
            jaeger_enabled: parse_or(&lookup, ENV_JAEGER_ENABLED, defaults.jaeger_enabled)?,
        };

        if config.retry_min > config.retry_max {
            return Err(Error::Config(format!(
                "{} ({}s) must not exceed {} ({}s)",
                ENV_RETRY_MIN,
                config.retry_min.as_secs(),
                ENV_RETRY_MAX,
                config.retry_max.as_secs()
            )));
        }
        for (key, value) in [
            (ENV_RECONCILE_TIMEOUT, config.reconcile_timeout),
            (ENV_FLUSH_TIMEOUT, config.flush_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{} must be positive", key)));
            }
        }
        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{}='{}': {}", key, raw, e))),
    }
}

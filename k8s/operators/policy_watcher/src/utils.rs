/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/utils.rs
*
* Small helpers shared by the rule engine and the controllers.
*
* Functions:
* - `now_rfc3339` / `parse_rfc3339`: the timestamp format used in every
*   status field and annotation this operator writes.
* - `created_at`: an object's creation time, read through serde so it does
*   not depend on the timestamp type of the Kubernetes bindings.
* - `jittered_delay`: a uniformly random retry delay.
* - `checked_recently`: the debounce test behind the last-checked annotation.
*
* SPDX-License-Identifier: Apache-2.0
*/

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use rand::Rng;
use std::time::Duration;

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub fn created_at(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let raw = serde_json::to_value(meta.creation_timestamp.as_ref()?).ok()?;
    parse_rfc3339(raw.as_str()?)
}

/// A delay drawn uniformly from `[min, max]`.
pub fn jittered_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let millis = rand::rng().random_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(millis as u64)
}

/// Whether `last_checked` lies less than `interval` before `now`.
/// Unparseable or future timestamps never debounce.
pub fn checked_recently(last_checked: Option<&str>, now: DateTime<Utc>, interval: Duration) -> bool {
    let Some(at) = last_checked.and_then(parse_rfc3339) else {
        return false;
    };
    let elapsed = now.signed_duration_since(at);
    match elapsed.to_std() {
        Ok(elapsed) => elapsed < interval,
        Err(_) => false,
    }
}

/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: k8s/operators/policy_watcher/src/notifier/sink.rs
*
* Delivery side of a notifier: renders an alert into a chat message and
* hands it to the chat service.
*
* SPDX-License-Identifier: Apache-2.0
*/

use super::{Alert, AlertStatus};
use crate::crds::Severity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use notification_manager::{SlackClient, SlackMessage};

/// Resolved delivery settings of one notifier.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SinkConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
    pub min_severity: Severity,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, config: &SinkConfig, alert: &Alert) -> Result<()>;
}

/// Delivers alerts to a Slack incoming webhook.
#[derive(Clone, Debug, Default)]
pub struct SlackSink {
    client: SlackClient,
}

impl SlackSink {
    pub fn new() -> Self {
        Self { client: SlackClient::new() }
    }
}

#[async_trait]
impl NotificationSink for SlackSink {
    async fn send(&self, config: &SinkConfig, alert: &Alert) -> Result<()> {
        let message = SlackMessage::single(
            config.channel.as_deref(),
            config.username.as_deref(),
            color(alert),
            render(alert),
        );
        self.client
            .send(&config.webhook_url, &message)
            .await
            .map_err(|e| Error::Sink(format!("{:#}", e)))
    }
}

/// Attachment color: green for recoveries, otherwise by severity.
pub fn color(alert: &Alert) -> &'static str {
    if alert.status == AlertStatus::Recovering {
        return "#2EB67D";
    }
    match alert.severity {
        Severity::Fatal => "#E01E5A",
        Severity::Critical => "#FF8C00",
        Severity::Warning => "#ECB22E",
        Severity::Info => "#36C5F0",
        Severity::Default => "#9E9E9E",
    }
}

/// `*[Alerting]*` or `*[Recovered]*` followed by the expanded template.
pub fn render(alert: &Alert) -> String {
    let header = if alert.status == AlertStatus::Recovering {
        "*[Recovered]*"
    } else {
        "*[Alerting]*"
    };
    let body = alert
        .message_template
        .replace("{{severity}}", alert.severity.as_str())
        .replace("{{ruleKind}}", &alert.rule_kind)
        .replace("{{ruleName}}", &alert.rule_name)
        .replace("{{resourceKind}}", &alert.resource_kind)
        .replace("{{resourceNamespace}}", &alert.resource_namespace)
        .replace("{{resourceName}}", &alert.resource_name)
        .replace("{{message}}", &alert.message);
    format!("{} {}", header, body)
}

#[cfg(test)]
pub use recording::RecordingSink;

#[cfg(test)]
mod recording {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Captures every delivery; can be switched to fail or to answer slowly.
    #[derive(Default)]
    pub struct RecordingSink {
        sent: Mutex<Vec<Alert>>,
        failing: AtomicBool,
        latency_ms: AtomicU64,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn set_latency(&self, latency: Duration) {
            self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Alert> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, _config: &SinkConfig, alert: &Alert) -> Result<()> {
            let latency = self.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                tokio::time::sleep(Duration::from_millis(latency)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Sink("webhook returned 500".into()));
            }
            self.sent.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::DEFAULT_MESSAGE_TEMPLATE;

    fn alert(status: AlertStatus, severity: Severity) -> Alert {
        Alert {
            rule_kind: "ClusterPodHealthRule".into(),
            rule_name: "pods".into(),
            resource_kind: "Pod".into(),
            resource_namespace: "shop".into(),
            resource_name: "web-0".into(),
            violated: status != AlertStatus::Recovering,
            severity,
            message_template: "[{{severity}}] {{resourceKind}} `{{resourceName}}`: {{message}}".into(),
            message: "pod phase is Failed".into(),
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_expands_placeholders() {
        let text = render(&alert(AlertStatus::Pending, Severity::Critical));
        assert_eq!(text, "*[Alerting]* [critical] Pod `web-0`: pod phase is Failed");

        let text = render(&alert(AlertStatus::Recovering, Severity::Critical));
        assert!(text.starts_with("*[Recovered]* "));
    }

    #[test]
    fn test_default_template_mentions_object() {
        let mut a = alert(AlertStatus::Pending, Severity::Warning);
        a.message_template = DEFAULT_MESSAGE_TEMPLATE.to_string();
        let text = render(&a);
        assert!(text.contains("web-0"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_color_by_severity_and_recovery() {
        assert_eq!(color(&alert(AlertStatus::Pending, Severity::Fatal)), "#E01E5A");
        assert_eq!(color(&alert(AlertStatus::Firing, Severity::Info)), "#36C5F0");
        assert_eq!(color(&alert(AlertStatus::Recovering, Severity::Fatal)), "#2EB67D");
    }
}

/*
 * Copyright (C) 2025 Pedro Henrique / phkaiser13
 *
 * File: src/modules/notification_manager/src/lib.rs
 *
 * This module provides a centralized way to send notifications to chat
 * services. It owns the Slack incoming-webhook payload shape and the HTTP
 * delivery; callers decide what to say and which color to use.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

// --- Public Data Structures ---

/// A Slack incoming-webhook message.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SlackMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub attachments: Vec<SlackAttachment>,
}

/// A single colored block of a Slack message.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SlackAttachment {
    /// Hex color or one of Slack's named colors.
    pub color: String,
    pub text: String,
    pub mrkdwn_in: Vec<&'static str>,
}

impl SlackMessage {
    /// Builds a message with one markdown attachment.
    pub fn single(
        channel: Option<&str>,
        username: Option<&str>,
        color: &str,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.filter(|c| !c.is_empty()).map(str::to_string),
            username: username.filter(|u| !u.is_empty()).map(str::to_string),
            attachments: vec![SlackAttachment {
                color: color.to_string(),
                text: text.into(),
                mrkdwn_in: vec!["text"],
            }],
        }
    }
}

/// Sends messages to Slack incoming webhooks.
#[derive(Clone, Debug)]
pub struct SlackClient {
    client: reqwest::Client,
}

impl Default for SlackClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Posts `message` to `webhook_url`. Non-2xx responses are errors.
    pub async fn send(&self, webhook_url: &str, message: &SlackMessage) -> Result<()> {
        if webhook_url.is_empty() {
            bail!("Slack webhook URL is empty");
        }
        debug!(channel = ?message.channel, "Sending Slack message");

        self.client
            .post(webhook_url)
            .json(message)
            .send()
            .await
            .context("Failed to send request to Slack webhook")?
            .error_for_status()
            .context("Slack webhook returned an error status")?;

        debug!("Slack message sent successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_attachment_payload() {
        let msg = SlackMessage::single(Some("#alerts"), None, "danger", "*[Alerting]* boom");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["channel"], "#alerts");
        assert!(value.get("username").is_none());
        assert_eq!(value["attachments"][0]["color"], "danger");
        assert_eq!(value["attachments"][0]["text"], "*[Alerting]* boom");
        assert_eq!(value["attachments"][0]["mrkdwn_in"][0], "text");
    }

    #[test]
    fn test_empty_channel_is_omitted() {
        let msg = SlackMessage::single(Some(""), Some(""), "good", "ok");
        assert_eq!(msg.channel, None);
        assert_eq!(msg.username, None);
    }

    #[tokio::test]
    async fn test_empty_webhook_is_rejected() {
        let client = SlackClient::new();
        let msg = SlackMessage::single(None, None, "good", "ok");
        assert!(client.send("", &msg).await.is_err());
    }
}

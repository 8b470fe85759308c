//! Slack notifications through an incoming webhook

use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::config::TrainingArgs;

#[derive(Serialize, Debug, PartialEq)]
pub struct SlackMessage<'a> {
    pub channel: &'a str,
    pub username: &'a str,
    pub text: &'a str,
}

pub struct SlackNotifier {
    agent: ureq::Agent,
    webhook_url: String,
    channel: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: &str, channel: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Self {
            agent,
            webhook_url: webhook_url.to_string(),
            channel: channel.to_string(),
        }
    }

    /// The configured notifier, or `None` when Slack logging is off.
    pub fn from_training_args(training: &TrainingArgs) -> Result<Option<Self>> {
        if !training.log_with_slack() {
            return Ok(None);
        }
        let url = training
            .slack_webhook_url
            .as_deref()
            .context("log_with_slack is set but slack_webhook_url is missing")?;
        Ok(Some(Self::new(url, &training.slack_channel)))
    }

    pub fn send_message(&self, username: &str, message: &str) -> Result<()> {
        let body = serde_json::to_string(&SlackMessage {
            channel: &self.channel,
            username,
            text: message,
        })?;
        self.agent
            .post(&self.webhook_url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .context("Failed to send Slack message")?;
        tracing::debug!("Sent Slack message as {}: {}", username, message);
        Ok(())
    }
}

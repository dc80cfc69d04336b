use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::post_json;
use crate::ChannelAdapter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tripwire_common::types::{Alert, OwnerContext, Rule, Severity};

/// Slack incoming-webhook channel using the attachment message format.
pub struct SlackAdapter {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackAdapter {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }

    pub(crate) fn payload(alert: &Alert, rule: &Rule) -> Value {
        serde_json::json!({
            "attachments": [{
                "color": severity_color(alert.severity),
                "title": rule.name,
                "fields": [
                    {"title": "Series", "value": alert.series_ref, "short": true},
                    {"title": "Severity", "value": alert.severity.to_string(), "short": true},
                    {"title": "Condition", "value": format!("`{}`", alert.condition), "short": false},
                    {"title": "Observed", "value": format!("{:.2}", alert.observed_value), "short": true},
                    {"title": "Triggered", "value": alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(), "short": true},
                ],
                "footer": "tripwire",
                "ts": alert.triggered_at.timestamp(),
            }]
        })
    }
}

pub(crate) fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "#28a745",
        Severity::Medium => "#ffc107",
        Severity::High => "#fd7e14",
        Severity::Critical => "#dc3545",
    }
}

#[async_trait]
impl ChannelAdapter for SlackAdapter {
    async fn deliver(&self, alert: &Alert, rule: &Rule, _owner: &OwnerContext) -> Result<()> {
        let payload = Self::payload(alert, rule);
        post_json(&self.client, "slack", &self.webhook_url, &payload).await
    }

    fn channel_name(&self) -> &str {
        "slack"
    }
}

// Plugin

#[derive(Deserialize)]
struct SlackConfig {
    webhook_url: String,
}

pub struct SlackPlugin;

impl ChannelPlugin for SlackPlugin {
    fn name(&self) -> &str {
        "slack"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<SlackConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("slack: {e}")))?;
        Ok(())
    }

    fn create_adapter(&self, config: &Value) -> Result<Arc<dyn ChannelAdapter>> {
        let cfg: SlackConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("slack: {e}")))?;
        Ok(Arc::new(SlackAdapter::new(&cfg.webhook_url)))
    }
}

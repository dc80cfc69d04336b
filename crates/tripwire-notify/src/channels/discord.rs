use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::post_json;
use crate::ChannelAdapter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tripwire_common::types::{Alert, OwnerContext, Rule, Severity};

/// Discord webhook channel using the embed message format.
pub struct DiscordAdapter {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordAdapter {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }

    pub(crate) fn payload(alert: &Alert, rule: &Rule) -> Value {
        serde_json::json!({
            "embeds": [{
                "title": rule.name,
                "color": severity_color(alert.severity),
                "fields": [
                    {"name": "Series", "value": alert.series_ref, "inline": true},
                    {"name": "Severity", "value": alert.severity.to_string(), "inline": true},
                    {"name": "Condition", "value": format!("```{}```", alert.condition), "inline": false},
                    {"name": "Observed", "value": format!("{:.2}", alert.observed_value), "inline": true},
                ],
                "footer": {"text": "tripwire"},
                "timestamp": alert.triggered_at.to_rfc3339(),
            }]
        })
    }
}

/// Discord embed colors are decimal.
pub(crate) fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Low => 0x28A745,
        Severity::Medium => 0xFFC107,
        Severity::High => 0xFD7E14,
        Severity::Critical => 0xDC3545,
    }
}

#[async_trait]
impl ChannelAdapter for DiscordAdapter {
    async fn deliver(&self, alert: &Alert, rule: &Rule, _owner: &OwnerContext) -> Result<()> {
        let payload = Self::payload(alert, rule);
        post_json(&self.client, "discord", &self.webhook_url, &payload).await
    }

    fn channel_name(&self) -> &str {
        "discord"
    }
}

// Plugin

#[derive(Deserialize)]
struct DiscordConfig {
    webhook_url: String,
}

pub struct DiscordPlugin;

impl ChannelPlugin for DiscordPlugin {
    fn name(&self) -> &str {
        "discord"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<DiscordConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("discord: {e}")))?;
        Ok(())
    }

    fn create_adapter(&self, config: &Value) -> Result<Arc<dyn ChannelAdapter>> {
        let cfg: DiscordConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("discord: {e}")))?;
        Ok(Arc::new(DiscordAdapter::new(&cfg.webhook_url)))
    }
}

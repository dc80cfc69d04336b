use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::post_json;
use crate::ChannelAdapter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tripwire_common::types::{Alert, OwnerContext, Rule, Severity};

/// Microsoft Teams webhook channel using the legacy MessageCard format.
pub struct TeamsAdapter {
    client: reqwest::Client,
    webhook_url: String,
}

impl TeamsAdapter {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }

    pub(crate) fn payload(alert: &Alert, rule: &Rule) -> Value {
        serde_json::json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": theme_color(alert.severity),
            "summary": format!("Alert: {}", rule.name),
            "sections": [{
                "activityTitle": rule.name,
                "activitySubtitle": format!("Series: {}", alert.series_ref),
                "facts": [
                    {"name": "Severity", "value": alert.severity.to_string()},
                    {"name": "Condition", "value": alert.condition.to_string()},
                    {"name": "Observed", "value": format!("{:.2}", alert.observed_value)},
                    {"name": "Triggered", "value": alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()},
                ],
                "markdown": true,
            }],
        })
    }
}

pub(crate) fn theme_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "28a745",
        Severity::Medium => "ffc107",
        Severity::High => "fd7e14",
        Severity::Critical => "dc3545",
    }
}

#[async_trait]
impl ChannelAdapter for TeamsAdapter {
    async fn deliver(&self, alert: &Alert, rule: &Rule, _owner: &OwnerContext) -> Result<()> {
        let payload = Self::payload(alert, rule);
        post_json(&self.client, "teams", &self.webhook_url, &payload).await
    }

    fn channel_name(&self) -> &str {
        "teams"
    }
}

// Plugin

#[derive(Deserialize)]
struct TeamsConfig {
    webhook_url: String,
}

pub struct TeamsPlugin;

impl ChannelPlugin for TeamsPlugin {
    fn name(&self) -> &str {
        "teams"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<TeamsConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("teams: {e}")))?;
        Ok(())
    }

    fn create_adapter(&self, config: &Value) -> Result<Arc<dyn ChannelAdapter>> {
        let cfg: TeamsConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("teams: {e}")))?;
        Ok(Arc::new(TeamsAdapter::new(&cfg.webhook_url)))
    }
}

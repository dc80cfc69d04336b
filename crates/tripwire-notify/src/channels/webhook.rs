use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_BODY_LENGTH};
use crate::ChannelAdapter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tripwire_common::types::{Alert, OwnerContext, Rule};

/// Generic JSON webhook channel. The escape hatch for endpoints without a
/// dedicated adapter: POSTs either a fixed JSON document or a rendered
/// `{{placeholder}}` body template.
pub struct WebhookAdapter {
    client: reqwest::Client,
    url: String,
    body_template: Option<String>,
}

impl WebhookAdapter {
    pub fn new(url: &str, body_template: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            body_template,
        }
    }

    pub(crate) fn render_body(&self, alert: &Alert, rule: &Rule) -> String {
        if let Some(template) = &self.body_template {
            template
                .replace("{{alert_id}}", &alert.id)
                .replace("{{rule_id}}", &alert.rule_id)
                .replace("{{rule_name}}", &rule.name)
                .replace("{{series_ref}}", &alert.series_ref)
                .replace("{{severity}}", &alert.severity.to_string())
                .replace("{{condition}}", &alert.condition.to_string())
                .replace("{{value}}", &format!("{:.2}", alert.observed_value))
                .replace("{{timestamp}}", &alert.triggered_at.to_rfc3339())
        } else {
            serde_json::json!({
                "alert_id": alert.id,
                "rule_id": alert.rule_id,
                "rule_name": rule.name,
                "series_ref": alert.series_ref,
                "severity": alert.severity.to_string(),
                "condition": alert.condition.to_string(),
                "observed_value": alert.observed_value,
                "triggered_at": alert.triggered_at.to_rfc3339(),
            })
            .to_string()
        }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    async fn deliver(&self, alert: &Alert, rule: &Rule, _owner: &OwnerContext) -> Result<()> {
        let body = self.render_body(alert, rule);
        let resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("[failed to read response body: {e}]"));
            return Err(NotifyError::Api {
                service: "webhook",
                status: status.as_u16(),
                body: truncate_string(&body, MAX_BODY_LENGTH),
            });
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

// Plugin

#[derive(Deserialize)]
struct WebhookConfig {
    url: String,
    body_template: Option<String>,
}

pub struct WebhookPlugin;

impl ChannelPlugin for WebhookPlugin {
    fn name(&self) -> &str {
        "webhook"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<WebhookConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(())
    }

    fn create_adapter(&self, config: &Value) -> Result<Arc<dyn ChannelAdapter>> {
        let cfg: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("webhook: {e}")))?;
        Ok(Arc::new(WebhookAdapter::new(&cfg.url, cfg.body_template)))
    }
}

use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::ChannelAdapter;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tripwire_common::types::{Alert, OwnerContext, Rule};

/// SMTP email channel. Always configured; the one channel that cannot be
/// disabled.
pub struct EmailAdapter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailAdapter {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| NotifyError::Smtp(e.to_string()))?
            .port(smtp_port);

        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from.to_string(),
        })
    }

    pub(crate) fn format_body(alert: &Alert, rule: &Rule) -> String {
        format!(
            "Alert: {severity}\nRule: {rule_name}\nSeries: {series}\nCondition: {condition}\nObserved: {value:.2}\nTriggered: {time}\nAlert ID: {id}",
            severity = alert.severity,
            rule_name = rule.name,
            series = alert.series_ref,
            condition = alert.condition,
            value = alert.observed_value,
            time = alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
            id = alert.id,
        )
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    async fn deliver(&self, alert: &Alert, rule: &Rule, owner: &OwnerContext) -> Result<()> {
        let subject = format!(
            "[tripwire][{}] {} - {}",
            alert.severity, rule.name, alert.series_ref
        );
        let email = Message::builder()
            .from(self.from.parse().map_err(|e| {
                NotifyError::InvalidConfig(format!("invalid from address '{}': {e}", self.from))
            })?)
            .to(owner.email.parse().map_err(|e| {
                NotifyError::InvalidConfig(format!(
                    "invalid recipient address '{}': {e}",
                    owner.email
                ))
            })?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(Self::format_body(alert, rule))
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    #[serde(default = "default_smtp_port")]
    smtp_port: u16,
    smtp_username: Option<String>,
    smtp_password: Option<String>,
    from: String,
}

fn default_smtp_port() -> u16 {
    587
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn name(&self) -> &str {
        "email"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<EmailConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        Ok(())
    }

    fn create_adapter(&self, config: &Value) -> Result<Arc<dyn ChannelAdapter>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email: {e}")))?;
        let adapter = EmailAdapter::new(
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.smtp_username.as_deref(),
            cfg.smtp_password.as_deref(),
            &cfg.from,
        )?;
        Ok(Arc::new(adapter))
    }

    fn redact_config(&self, config: &Value) -> Value {
        let mut redacted = config.clone();
        if let Some(obj) = redacted.as_object_mut() {
            if obj.contains_key("smtp_password") {
                obj.insert(
                    "smtp_password".to_string(),
                    Value::String("***".to_string()),
                );
            }
        }
        redacted
    }
}

use serde::{Deserialize, Serialize};
use tripwire_common::types::Condition;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Time between evaluation ticks (seconds).
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
    /// Deadline for one rule's whole evaluation chain. Must be strictly
    /// smaller than the evaluation interval.
    #[serde(default = "default_rule_timeout_secs")]
    pub rule_timeout_secs: u64,
    /// Deadline for one channel delivery within a dispatch.
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
    /// Lookback window for `avg`/`max`/`min` aggregations (seconds).
    #[serde(default = "default_lookback_window_secs")]
    pub lookback_window_secs: u64,
    /// Cap on concurrently in-flight rule evaluations per tick.
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub owner: OwnerConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerConfig {
    pub id: String,
    /// Recipient address for the email channel.
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Email is mandatory and cannot be disabled.
    pub email: EmailChannelConfig,
    #[serde(default)]
    pub slack: Option<HookChannelConfig>,
    #[serde(default)]
    pub discord: Option<HookChannelConfig>,
    #[serde(default)]
    pub teams: Option<HookChannelConfig>,
    #[serde(default)]
    pub webhook: Option<GenericWebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailChannelConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookChannelConfig {
    pub webhook_url: String,
    #[serde(default = "default_channel_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericWebhookConfig {
    pub url: String,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default = "default_channel_enabled")]
    pub enabled: bool,
}

// ---- Seed file types (used by the `init-rules` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<SeedRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRule {
    pub name: String,
    pub series_ref: String,
    pub condition: Condition,
    #[serde(default = "default_seed_severity")]
    pub severity: String,
    #[serde(default = "default_seed_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_seed_active")]
    pub active: bool,
}

fn default_evaluation_interval_secs() -> u64 {
    30
}

fn default_rule_timeout_secs() -> u64 {
    10
}

fn default_channel_timeout_secs() -> u64 {
    10
}

fn default_lookback_window_secs() -> u64 {
    300
}

fn default_max_concurrent_evaluations() -> usize {
    16
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_channel_enabled() -> bool {
    true
}

fn default_seed_severity() -> String {
    "medium".to_string()
}

fn default_seed_cooldown_secs() -> u64 {
    900
}

fn default_seed_active() -> bool {
    true
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.evaluation_interval_secs == 0 {
            anyhow::bail!("evaluation_interval_secs must be positive");
        }
        if self.rule_timeout_secs == 0 {
            anyhow::bail!("rule_timeout_secs must be positive");
        }
        if self.rule_timeout_secs >= self.evaluation_interval_secs {
            anyhow::bail!(
                "rule_timeout_secs ({}) must be smaller than evaluation_interval_secs ({})",
                self.rule_timeout_secs,
                self.evaluation_interval_secs
            );
        }
        if self.channel_timeout_secs == 0 {
            anyhow::bail!("channel_timeout_secs must be positive");
        }
        if self.max_concurrent_evaluations == 0 {
            anyhow::bail!("max_concurrent_evaluations must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[owner]
id = "owner-1"
email = "alerts@example.com"

[channels.email]
smtp_host = "smtp.example.com"
from = "tripwire@example.com"
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: ServerConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.evaluation_interval_secs, 30);
        assert_eq!(config.rule_timeout_secs, 10);
        assert_eq!(config.lookback_window_secs, 300);
        assert_eq!(config.max_concurrent_evaluations, 16);
        assert_eq!(config.channels.email.smtp_port, 587);
        assert!(config.channels.slack.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn optional_channels_parse_with_enabled_flag() {
        let toml_str = format!(
            "{MINIMAL}\n[channels.slack]\nwebhook_url = \"https://hooks.slack.com/services/T0/B0/x\"\n"
        );
        let config: ServerConfig = toml::from_str(&toml_str).unwrap();
        let slack = config.channels.slack.unwrap();
        assert!(slack.enabled);
        assert!(slack.webhook_url.starts_with("https://hooks.slack.com"));
    }

    #[test]
    fn rule_timeout_must_stay_under_tick_interval() {
        let mut config: ServerConfig = toml::from_str(MINIMAL).unwrap();
        config.rule_timeout_secs = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rule_timeout_secs"));
    }

    #[test]
    fn missing_email_channel_is_rejected() {
        let toml_str = r#"
[owner]
id = "owner-1"
email = "alerts@example.com"
"#;
        assert!(toml::from_str::<ServerConfig>(toml_str).is_err());
    }
}

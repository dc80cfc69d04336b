use crate::error::{NotifyError, Result};
use crate::ChannelAdapter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for creating [`ChannelAdapter`] instances from JSON
/// configuration.
///
/// Each plugin is registered in the [`ChannelRegistry`] by its `name()`.
/// At startup the registry validates the configured channel sections and
/// instantiates adapters through the matching plugin. The dispatcher never
/// branches on a channel-name string; new channels are added by
/// implementing [`ChannelAdapter`] plus a plugin.
pub trait ChannelPlugin: Send + Sync {
    /// Returns the plugin type name (e.g., `"email"`, `"slack"`).
    fn name(&self) -> &str;

    /// Validates a JSON config blob against this plugin's expected schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a configured adapter instance from a validated JSON config.
    fn create_adapter(&self, config: &Value) -> Result<Arc<dyn ChannelAdapter>>;

    /// Returns a copy of `config` with secrets redacted (e.g., passwords
    /// replaced with `"***"`). Used when logging effective configuration.
    fn redact_config(&self, config: &Value) -> Value {
        config.clone()
    }
}

/// Registry of available [`ChannelPlugin`]s, used to instantiate channel
/// adapters from configuration.
///
/// # Examples
///
/// ```
/// use tripwire_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin("email"));
/// assert!(registry.has_plugin("slack"));
/// assert!(registry.has_plugin("teams"));
/// assert!(!registry.has_plugin("nonexistent"));
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<String, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn create_adapter(
        &self,
        type_name: &str,
        config: &Value,
    ) -> Result<Arc<dyn ChannelAdapter>> {
        let plugin = self
            .plugins
            .get(type_name)
            .ok_or_else(|| NotifyError::UnknownChannelType(type_name.to_string()))?;
        plugin.validate_config(config)?;
        plugin.create_adapter(config)
    }

    pub fn get_plugin(&self, type_name: &str) -> Option<&dyn ChannelPlugin> {
        self.plugins.get(type_name).map(|p| p.as_ref())
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::slack::SlackPlugin));
        registry.register(Box::new(crate::channels::discord::DiscordPlugin));
        registry.register(Box::new(crate::channels::teams::TeamsPlugin));
        registry.register(Box::new(crate::channels::webhook::WebhookPlugin));
        registry
    }
}

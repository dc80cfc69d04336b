//! Notification fan-out with pluggable channel support.
//!
//! A fired alert is handed to the [`dispatcher::NotificationDispatcher`],
//! which delivers it concurrently through every configured
//! [`ChannelAdapter`] and aggregates one
//! [`tripwire_common::types::DeliveryResult`] per channel. Built-in channels
//! are email (SMTP), Slack, Discord, Microsoft Teams and a generic JSON
//! webhook; new channels are added by implementing [`ChannelAdapter`] and
//! registering a [`plugin::ChannelPlugin`].

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod utils;


use async_trait::async_trait;
use tripwire_common::types::{Alert, OwnerContext, Rule};

use crate::error::Result;

/// One delivery mechanism for notifying about an alert.
///
/// An adapter translates a structured alert plus rule context into a
/// channel-specific payload and performs the network call. Credentials and
/// endpoints are injected at construction; an instance is stateless with
/// respect to which alert it is delivering.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Delivers the alert through this channel.
    ///
    /// # Errors
    ///
    /// All failure modes (network error, non-2xx response, malformed
    /// credential) resolve to a [`error::NotifyError`]; the dispatcher
    /// converts it into a `failed` delivery result.
    async fn deliver(&self, alert: &Alert, rule: &Rule, owner: &OwnerContext) -> Result<()>;

    /// Returns the channel name (e.g., `"email"`, `"slack"`).
    fn channel_name(&self) -> &str;
}

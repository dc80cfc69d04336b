use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tripwire_common::types::{Alert, DeliveryOutcome, DeliveryResult, OwnerContext, Rule};

use crate::ChannelAdapter;

/// Fans one fired alert out to every configured channel concurrently and
/// aggregates the per-channel outcomes.
///
/// Dispatch is best-effort: the engine guarantees an *attempted* delivery to
/// every configured channel, not a successful one. A failed channel is
/// recorded and never fails the dispatch as a whole, and there is no retry
/// within the same fire. The next threshold breach after cooldown expiry is
/// the natural retry path.
pub struct NotificationDispatcher {
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    owner: OwnerContext,
    channel_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        owner: OwnerContext,
        channel_timeout: Duration,
    ) -> Self {
        Self {
            adapters,
            owner,
            channel_timeout,
        }
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.channel_name()).collect()
    }

    /// Delivers `alert` through every adapter, each bounded by the
    /// per-channel timeout, and returns one [`DeliveryResult`] per channel.
    ///
    /// Results are ordered by delivery *completion*, not by configuration
    /// order. This matters for diagnosability, not alert correctness.
    pub async fn dispatch(&self, alert: &Alert, rule: &Rule) -> Vec<DeliveryResult> {
        let mut set = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = adapter.clone();
            let alert = alert.clone();
            let rule = rule.clone();
            let owner = self.owner.clone();
            let timeout = self.channel_timeout;

            set.spawn(async move {
                let channel = adapter.channel_name().to_string();
                let attempted_at = Utc::now();
                match tokio::time::timeout(timeout, adapter.deliver(&alert, &rule, &owner)).await
                {
                    Ok(Ok(())) => {
                        tracing::info!(channel = %channel, alert_id = %alert.id, "Notification delivered");
                        DeliveryResult {
                            channel,
                            outcome: DeliveryOutcome::Delivered,
                            attempted_at,
                            error_detail: None,
                        }
                    }
                    Ok(Err(e)) => {
                        tracing::error!(
                            channel = %channel,
                            alert_id = %alert.id,
                            error = %e,
                            "Notification delivery failed"
                        );
                        DeliveryResult {
                            channel,
                            outcome: DeliveryOutcome::Failed,
                            attempted_at,
                            error_detail: Some(e.to_string()),
                        }
                    }
                    Err(_) => {
                        tracing::error!(
                            channel = %channel,
                            alert_id = %alert.id,
                            timeout_secs = timeout.as_secs(),
                            "Notification delivery timed out"
                        );
                        DeliveryResult {
                            channel,
                            outcome: DeliveryOutcome::Failed,
                            attempted_at,
                            error_detail: Some(format!(
                                "delivery timed out after {}s",
                                timeout.as_secs()
                            )),
                        }
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(self.adapters.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!(error = %e, "Notification delivery task panicked");
                }
            }
        }
        results
    }
}

#[async_trait]
impl tripwire_engine::Notifier for NotificationDispatcher {
    async fn dispatch(&self, alert: &Alert, rule: &Rule) -> Vec<DeliveryResult> {
        NotificationDispatcher::dispatch(self, alert, rule).await
    }
}

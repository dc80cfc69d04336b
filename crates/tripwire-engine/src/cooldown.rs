//! Cooldown suppression: at most one fire per rule per cooldown window.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::Result;

/// Shared key/expiry store that suppresses repeated firing of a rule.
///
/// `try_acquire` is an atomic check-and-set: it must never return `true` to
/// two concurrent callers for the same rule id while an entry is live, even
/// across overlapping ticks. Entries expire on their own; absence of an
/// entry is definitionally "not cooling down" and the store is never asked
/// to delete one.
///
/// The store is an injected capability so multiple engine instances can
/// share one cooldown backend.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    /// If no live entry exists for `rule_id`, creates one expiring after
    /// `ttl` and returns `true` (the caller may fire). Otherwise returns
    /// `false` (the caller must suppress).
    ///
    /// `ttl` is re-read from the rule on every call, so an owner can raise
    /// or lower the cooldown between fires.
    async fn try_acquire(&self, rule_id: &str, ttl: std::time::Duration) -> Result<bool>;
}

/// Process-local [`CooldownStore`] backed by a single mutex-guarded map.
///
/// Holding the one lock across the check and the insert makes the
/// check-and-set atomic for every evaluation in this process. Deployments
/// that scale the engine horizontally need a shared backend with the same
/// contract instead.
pub struct MemoryCooldownStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryCooldownStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryCooldownStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CooldownStore for MemoryCooldownStore {
    async fn try_acquire(&self, rule_id: &str, ttl: std::time::Duration) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(rule_id) {
            Some(expiry) if *expiry > now => Ok(false),
            _ => {
                entries.insert(rule_id.to_string(), now + ttl);
                Ok(true)
            }
        }
    }
}

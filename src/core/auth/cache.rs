//! Authentication decision cache.
use std::time::Duration;

use async_trait::async_trait;
use scc::HashMap;
use tokio::time::Instant;

/// Short-lived memory of authentication outcomes keyed by raw credential.
///
/// Implementations must be safe for concurrent use without caller-side
/// locking. Entries are only ever evicted by TTL.
#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, credential: &str) -> Option<bool>;
    async fn set(&self, credential: &str, authenticated: bool, ttl: Duration);
}

#[derive(Debug, Clone, Copy)]
struct Decision {
    authenticated: bool,
    expires_at: Instant,
}

/// In-process cache backed by `scc::HashMap`.
///
/// Expiry uses tokio's clock so paused-time tests can drive it.
#[derive(Debug, Default)]
pub struct InMemoryDecisionCache {
    entries: HashMap<String, Decision>,
}

impl InMemoryDecisionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns the number of live entries left.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.entries
            .retain_async(|_, decision| decision.expires_at > now)
            .await;
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DecisionCache for InMemoryDecisionCache {
    async fn get(&self, credential: &str) -> Option<bool> {
        let now = Instant::now();
        self.entries
            .read_async(credential, |_, decision| {
                (decision.expires_at > now).then_some(decision.authenticated)
            })
            .await
            .flatten()
    }

    async fn set(&self, credential: &str, authenticated: bool, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let decision = Decision {
            authenticated,
            expires_at: Instant::now() + ttl,
        };
        match self.entries.entry_async(credential.to_string()).await {
            scc::hash_map::Entry::Occupied(mut entry) => *entry.get_mut() = decision,
            scc::hash_map::Entry::Vacant(entry) => {
                entry.insert_entry(decision);
            }
        }
    }
}

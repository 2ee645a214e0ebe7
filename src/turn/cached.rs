use async_trait::async_trait;
use dashmap::DashMap;
use log::trace;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use webrtckit_core::turn::TurnCredential;

use super::{TurnCredentialError, TurnCredentialService};

#[derive(Debug, Clone)]
struct CachedCredential {
    credential: TurnCredential,
    expires_at: Instant,
}

impl CachedCredential {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

type Slot = Arc<Mutex<Option<CachedCredential>>>;

/// Per-session credential cache in front of another service.
///
/// Entries live for the credential's TTL. Concurrent lookups for the same
/// session wait on one fetch.
pub struct CachedTurnCredentialService<S> {
    inner: S,
    slots: DashMap<String, Slot>,
}

impl<S: TurnCredentialService> CachedTurnCredentialService<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            slots: DashMap::new(),
        }
    }

    pub fn clear_cache(&self) {
        self.slots.clear();
    }

    pub fn invalidate(&self, session_id: &str) {
        self.slots.remove(session_id);
    }

    pub fn cached_sessions(&self) -> usize {
        self.slots.len()
    }

    /// Drops settled sessions whose credential expired or was never cached.
    /// Slots with a lookup in flight are locked and stay.
    fn prune_expired(&self, keep: &str) {
        let before = self.slots.len();
        self.slots.retain(|session_id, slot| {
            session_id == keep
                || slot
                    .try_lock()
                    .map_or(true, |entry| entry.as_ref().is_some_and(|c| !c.is_expired()))
        });
        let pruned = before.saturating_sub(self.slots.len());
        if pruned > 0 {
            trace!("Pruned {pruned} expired TURN credential slots");
        }
    }

    fn slot(&self, session_id: &str) -> Slot {
        self.slots
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl<S: TurnCredentialService> TurnCredentialService for CachedTurnCredentialService<S> {
    async fn get_credentials(
        &self,
        session_id: &str,
    ) -> Result<TurnCredential, TurnCredentialError> {
        let slot = self.slot(session_id);
        let mut entry = slot.lock().await;

        if let Some(cached) = entry.as_ref().filter(|c| !c.is_expired()) {
            trace!("TURN credential cache hit for {session_id}");
            return Ok(cached.credential.clone());
        }

        let credential = self.inner.get_credentials(session_id).await?;
        let ttl = Duration::from_secs(credential.ttl.max(0) as u64);
        *entry = Some(CachedCredential {
            credential: credential.clone(),
            expires_at: Instant::now() + ttl,
        });
        drop(entry);
        self.prune_expired(session_id);
        Ok(credential)
    }
}

//! Per-request mutual exclusion for in-flight decisions.
//!
//! A human approval is a multi-step interaction, so the store's
//! compare-and-set alone would let two approvers both believe they are
//! deciding. The lock manager serializes them: one acquires, the other gets
//! `LockHeld` and retries. Locks auto-expire after `ttl` so a crashed holder
//! blocks a request for at most that long.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::ApprovalError;

/// Proof of a successful acquire; required to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockToken(Uuid);

struct LockEntry {
    token: Uuid,
    expires_at: Instant,
}

pub struct LockManager {
    locks: DashMap<String, LockEntry>,
    ttl: Duration,
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            ttl,
        }
    }

    /// Try to take the lock for `request_id`. An expired lock counts as free.
    pub fn acquire(&self, request_id: &str) -> Result<LockToken, ApprovalError> {
        let now = Instant::now();
        let token = Uuid::new_v4();
        let entry = LockEntry {
            token,
            expires_at: now + self.ttl,
        };

        match self.locks.entry(request_id.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at > now {
                    return Err(ApprovalError::LockHeld {
                        request_id: request_id.to_string(),
                    });
                }
                tracing::debug!(request_id, "taking over expired lock");
                held.insert(entry);
            }
            Entry::Vacant(free) => {
                free.insert(entry);
            }
        }
        Ok(LockToken(token))
    }

    /// Release only succeeds for the token that acquired; a stale holder
    /// whose lock expired and was re-acquired cannot release the new owner.
    pub fn release(&self, request_id: &str, token: LockToken) {
        self.locks.remove_if(request_id, |_, entry| entry.token == token.0);
    }

    /// Drop all expired entries. Called periodically from the sweep job to
    /// bound memory usage.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, entry| entry.expires_at > now);
        before - self.locks.len()
    }

    pub fn held(&self) -> usize {
        self.locks.len()
    }
}

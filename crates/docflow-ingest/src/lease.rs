//! Per-source leases.
//!
//! A processing attempt holds the lease for its source while it reads and
//! writes the checkpoint. Each grant carries a fencing token that increases
//! monotonically, so a stale holder can be told apart from the current one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use docflow_core::{Error, Result};
use tracing::debug;

#[derive(Default)]
struct LeaseTable {
    held: DashMap<String, u64>,
    next_token: AtomicU64,
}

/// Process-wide lease registry keyed by source id.
#[derive(Clone, Default)]
pub struct SourceLeases {
    inner: Arc<LeaseTable>,
}

impl SourceLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lease for `source_id`, failing with `LeaseHeld` if another
    /// attempt owns it. Dropping the returned guard releases the lease.
    pub fn acquire(&self, source_id: &str) -> Result<SourceLease> {
        match self.inner.held.entry(source_id.to_string()) {
            Entry::Occupied(_) => Err(Error::LeaseHeld(source_id.to_string())),
            Entry::Vacant(slot) => {
                let token = self.inner.next_token.fetch_add(1, Ordering::SeqCst) + 1;
                slot.insert(token);
                debug!(source_id, token, "Lease acquired");
                Ok(SourceLease {
                    table: self.inner.clone(),
                    source_id: source_id.to_string(),
                    token,
                })
            }
        }
    }

    /// Whether `token` is the live grant for `source_id`.
    pub fn is_current(&self, source_id: &str, token: u64) -> bool {
        self.inner
            .held
            .get(source_id)
            .is_some_and(|held| *held == token)
    }

    pub fn held_count(&self) -> usize {
        self.inner.held.len()
    }
}

/// A granted lease. Released on drop.
pub struct SourceLease {
    table: Arc<LeaseTable>,
    source_id: String,
    token: u64,
}

impl SourceLease {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        self.table
            .held
            .remove_if(&self.source_id, |_, held| *held == self.token);
    }
}

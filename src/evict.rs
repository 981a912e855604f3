//! Eviction: hard deletion of dead entries.
//!
//! An entry dies when its importance has sunk to the threshold and it has
//! been inactive past the retention window. `user_preference` entries are a
//! protected class and are never auto-deleted.
//!
//! Deletion is two-phase on purpose: the store row goes first, and the
//! vector refs are returned so the caller deletes them from the index
//! separately. If the index delete then fails, the system is left with an
//! orphan vector and no entry. The inverse order could leave a dangling
//! entry that resurfaces stale text.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::MaintenanceConfig;
use crate::store::MemoryStore;
use crate::types::{ScopeContext, VectorRef};

/// Result of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Rows deleted from the store.
    pub deleted: usize,
    /// Vector refs of the deleted rows, for index cleanup by the caller.
    pub vector_refs: Vec<VectorRef>,
}

pub struct EvictionSweeper {
    store: Arc<dyn MemoryStore>,
    config: MaintenanceConfig,
}

impl EvictionSweeper {
    pub fn new(store: Arc<dyn MemoryStore>, config: MaintenanceConfig) -> Self {
        Self { store, config }
    }

    /// Delete up to one batch of dead entries, scoped if a scope is given.
    pub async fn cleanup(&self, scope: Option<&ScopeContext>) -> EvictionReport {
        let inactive_before = Utc::now() - Duration::days(self.config.eviction_inactive_days);

        let candidates = match self
            .store
            .eviction_candidates(
                scope,
                self.config.eviction_threshold,
                inactive_before,
                self.config.eviction_max_batch,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("eviction candidate query failed: {}", e);
                return EvictionReport::default();
            }
        };
        if candidates.is_empty() {
            return EvictionReport::default();
        }

        let ids: Vec<_> = candidates.iter().map(|e| e.id).collect();
        let vector_refs = match self.store.delete(&ids).await {
            Ok(refs) => refs,
            Err(e) => {
                tracing::warn!("eviction delete failed: {}", e);
                return EvictionReport::default();
            }
        };

        tracing::info!(deleted = vector_refs.len(), "eviction pass complete");
        EvictionReport {
            deleted: vector_refs.len(),
            vector_refs,
        }
    }
}

//! Importance maintenance: reinforcement on use, decay on inactivity.
//!
//! `boost`/`reinforce` run on the request path after the caller confirms
//! which retrieved entries made it into the final prompt. `age_sweep` is a
//! background job: it pages through stale entries (bounded batches) and
//! decrements importance down to the configured floor. A per-day marker on
//! each row makes the sweep idempotent, so an overlapping or retried sweep
//! does no additional damage.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{ImportanceConfig, MaintenanceConfig};
use crate::store::MemoryStore;
use crate::types::ScopeContext;

/// Result of one aging sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeSweepReport {
    /// Entries whose importance was decremented (or re-clamped to the floor).
    pub aged: usize,
    /// Pages processed.
    pub pages: usize,
}

pub struct ImportanceMaintainer {
    store: Arc<dyn MemoryStore>,
    importance: ImportanceConfig,
    maintenance: MaintenanceConfig,
}

impl ImportanceMaintainer {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        importance: ImportanceConfig,
        maintenance: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            importance,
            maintenance,
        }
    }

    /// Reinforce one entry: bump access count, stamp the access time, raise
    /// importance clamped to the ceiling.
    pub async fn boost(&self, id: Uuid) -> anyhow::Result<bool> {
        self.store
            .boost(id, self.importance.access_boost, self.importance.max, Utc::now())
            .await
    }

    /// Reinforce a batch of confirmed-used entries. A failure on one entry is
    /// logged and skipped; the rest of the batch proceeds. Returns how many
    /// entries were actually boosted.
    pub async fn reinforce(&self, ids: &[Uuid]) -> usize {
        let mut boosted = 0;
        for id in ids {
            match self.boost(*id).await {
                Ok(true) => boosted += 1,
                Ok(false) => tracing::debug!("reinforce skipped missing entry {}", id),
                Err(e) => tracing::warn!("reinforce failed for {}: {}", id, e),
            }
        }
        boosted
    }

    /// Age every entry untouched past the aging horizon, one bounded page at
    /// a time, until a page comes back empty. Safe to re-run: rows already
    /// aged today are not touched again.
    pub async fn age_sweep(&self, scope: Option<&ScopeContext>) -> AgeSweepReport {
        let stale_before = Utc::now() - Duration::days(self.maintenance.aging_start_days);
        let today = Utc::now().date_naive();

        let mut report = AgeSweepReport::default();
        loop {
            let aged = match self
                .store
                .age_page(
                    scope,
                    stale_before,
                    today,
                    self.maintenance.aging_decrement,
                    self.importance.min,
                    self.maintenance.aging_page_size,
                )
                .await
            {
                Ok(n) => n,
                Err(e) => {
                    // Partial progress is fine; the next scheduled run
                    // catches stragglers.
                    tracing::warn!("aging page failed, stopping sweep: {}", e);
                    break;
                }
            };
            if aged == 0 {
                break;
            }
            report.aged += aged;
            report.pages += 1;
        }

        if report.aged > 0 {
            tracing::info!(aged = report.aged, pages = report.pages, "aging sweep complete");
        }
        report
    }
}

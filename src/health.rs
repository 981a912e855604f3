//! Derived health report over one scope's memory.
//!
//! Purely read-side: bucketed counts plus UI-facing hints. Safe to compute
//! from a read replica; nothing here mutates state.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::MaintenanceConfig;
use crate::store::MemoryStore;
use crate::types::ScopeContext;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthReport {
    pub total: u64,
    /// importance >= 5.
    pub healthy: u64,
    /// 3 <= importance < 5 and stale past the aging horizon.
    pub aging: u64,
    /// importance < 3 and stale past the eviction horizon.
    pub expiring: u64,
    pub recommendations: Vec<String>,
}

pub struct HealthReporter {
    store: Arc<dyn MemoryStore>,
    config: MaintenanceConfig,
}

impl HealthReporter {
    pub fn new(store: Arc<dyn MemoryStore>, config: MaintenanceConfig) -> Self {
        Self { store, config }
    }

    pub async fn health_status(&self, scope: &ScopeContext) -> anyhow::Result<HealthReport> {
        let now = Utc::now();
        let counts = self
            .store
            .health_counts(
                scope,
                now - Duration::days(self.config.aging_start_days),
                now - Duration::days(self.config.eviction_inactive_days),
            )
            .await?;

        let mut recommendations = Vec::new();
        if counts.total == 0 {
            recommendations
                .push("No memory recorded yet; context will build up as you chat.".to_string());
        }
        if counts.expiring > 0 {
            recommendations.push(format!(
                "{} entries are close to eviction; revisit the ones worth keeping.",
                counts.expiring
            ));
        }
        if counts.aging > counts.healthy {
            recommendations.push(
                "Most memory is going stale; recent conversations are not reinforcing it."
                    .to_string(),
            );
        }

        Ok(HealthReport {
            total: counts.total,
            healthy: counts.healthy,
            aging: counts.aging,
            expiring: counts.expiring,
            recommendations,
        })
    }
}

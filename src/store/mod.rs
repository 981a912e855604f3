//! Durable record of memory entries.
//!
//! The store owns every row-level invariant the maintenance jobs rely on:
//! importance clamping happens inside the UPDATE statements, the protected
//! `user_preference` class is excluded from eviction candidates at query
//! level, and deletes return the vector refs so the caller can remove them
//! from the index in lock-step.

mod sqlite;

pub use sqlite::SqliteMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::types::{MemoryEntry, ScopeContext, VectorRef};

/// Bucketed counts backing the health report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthCounts {
    pub total: u64,
    /// importance >= 5.
    pub healthy: u64,
    /// 3 <= importance < 5 and untouched past the aging horizon.
    pub aging: u64,
    /// importance < 3 and untouched past the eviction horizon.
    pub expiring: u64,
}

/// Durable store of [`MemoryEntry`] rows.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn insert(&self, entry: &MemoryEntry) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<MemoryEntry>>;

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<MemoryEntry>>;

    /// Reinforce one entry: bump `access_count`, stamp `last_accessed_at`,
    /// raise importance clamped to `max_importance`.
    ///
    /// Returns `false` if the entry no longer exists.
    async fn boost(
        &self,
        id: Uuid,
        boost: f64,
        max_importance: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Apply one bounded page of aging decay.
    ///
    /// Touches rows whose last access (or creation, if never accessed) is
    /// older than `stale_before` and that have not already been aged `today`;
    /// importance drops by `decrement` clamped to `floor`. Returns the number
    /// of rows changed, so the sweep can loop until a page comes back empty.
    async fn age_page(
        &self,
        scope: Option<&ScopeContext>,
        stale_before: DateTime<Utc>,
        today: NaiveDate,
        decrement: f64,
        floor: f64,
        limit: usize,
    ) -> anyhow::Result<usize>;

    /// Low-importance entries for a scope, oldest first, capped at `limit`.
    async fn consolidation_candidates(
        &self,
        scope: &ScopeContext,
        max_importance: f64,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>>;

    /// Rewrite the surviving entry of a merge in place.
    async fn apply_merge(
        &self,
        survivor: Uuid,
        content: &str,
        summary: &str,
        importance: f64,
    ) -> anyhow::Result<()>;

    /// Entries eligible for eviction: importance at or below `threshold`,
    /// untouched since `inactive_before`, never the protected kind.
    async fn eviction_candidates(
        &self,
        scope: Option<&ScopeContext>,
        threshold: f64,
        inactive_before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>>;

    /// Hard-delete rows and return their vector refs for index cleanup.
    async fn delete(&self, ids: &[Uuid]) -> anyhow::Result<Vec<VectorRef>>;

    async fn health_counts(
        &self,
        scope: &ScopeContext,
        stale_before: DateTime<Utc>,
        very_stale_before: DateTime<Utc>,
    ) -> anyhow::Result<HealthCounts>;
}

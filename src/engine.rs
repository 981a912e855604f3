//! The memory engine facade.
//!
//! One `MemoryEngine` is constructed at process start and handed by
//! reference to request handlers and the scheduler; there is no ambient
//! global state. The chat/discussion caller sees four request-path
//! operations (`decide`, `retrieve`, `reinforce`, `remember`) and the
//! scheduler sees `run_maintenance`.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use uuid::Uuid;

use crate::aggregator::RetrievalAggregator;
use crate::config::MemoryConfig;
use crate::consolidate::ConsolidationEngine;
use crate::error::{MemoryError, Result};
use crate::evict::EvictionSweeper;
use crate::external::{Embedder, TextClassifier, TextSummarizer, TokenCounter, VectorIndex};
use crate::health::{HealthReport, HealthReporter};
use crate::maintain::ImportanceMaintainer;
use crate::policy::RetrievalPolicyEngine;
use crate::store::MemoryStore;
use crate::types::{
    safe_truncate, MemoryEntry, MemoryKind, RankedResult, RetrievalPlan, ScopeContext, VectorRef,
};

/// Summary length derived for new entries, in bytes.
const SUMMARY_MAX_LEN: usize = 100;

/// Outcome of one scheduled maintenance run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub aged: usize,
    pub consolidated: usize,
    pub evicted: usize,
    /// True when another maintenance run for the same scope was already in
    /// flight and this one backed off.
    pub skipped: bool,
}

pub struct MemoryEngine {
    store: Arc<dyn MemoryStore>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    policy: RetrievalPolicyEngine,
    aggregator: RetrievalAggregator,
    maintainer: ImportanceMaintainer,
    consolidator: ConsolidationEngine,
    sweeper: EvictionSweeper,
    health: HealthReporter,
    config: MemoryConfig,
    /// Scope keys with a maintenance run in flight (single-flight guard).
    in_flight: Arc<StdMutex<HashSet<String>>>,
}

impl MemoryEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MemoryStore>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        classifier: Arc<dyn TextClassifier>,
        summarizer: Arc<dyn TextSummarizer>,
        token_counter: Arc<dyn TokenCounter>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            policy: RetrievalPolicyEngine::new(classifier, config.policy.clone()),
            aggregator: RetrievalAggregator::new(
                store.clone(),
                vector_index.clone(),
                embedder.clone(),
                token_counter,
                config.retrieval.clone(),
            ),
            maintainer: ImportanceMaintainer::new(
                store.clone(),
                config.importance.clone(),
                config.maintenance.clone(),
            ),
            consolidator: ConsolidationEngine::new(
                store.clone(),
                vector_index.clone(),
                summarizer,
                config.maintenance.clone(),
            ),
            sweeper: EvictionSweeper::new(store.clone(), config.maintenance.clone()),
            health: HealthReporter::new(store.clone(), config.maintenance.clone()),
            store,
            vector_index,
            embedder,
            config,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    fn validate_scope(scope: &ScopeContext) -> Result<()> {
        if scope.user_id.trim().is_empty() {
            return Err(MemoryError::InvalidScope("user_id is required".to_string()));
        }
        Ok(())
    }

    /// Record new content worth remembering. Returns the new entry id.
    ///
    /// The vector goes into the index first; if the row insert then fails the
    /// failure direction is an orphan vector, never a row without a vector.
    pub async fn remember(
        &self,
        scope: &ScopeContext,
        kind: MemoryKind,
        content: &str,
        tags: Vec<String>,
    ) -> Result<Uuid> {
        Self::validate_scope(scope)?;

        let id = Uuid::new_v4();
        let namespace = scope.write_namespace();
        let content = content.trim();
        let summary = safe_truncate(content, SUMMARY_MAX_LEN).to_string();

        let embedding = self
            .embedder
            .embed(content)
            .await
            .map_err(MemoryError::External)?;
        self.vector_index
            .upsert(&namespace, &id.to_string(), &embedding)
            .await
            .map_err(MemoryError::External)?;

        let entry = MemoryEntry {
            id,
            vector_ref: VectorRef {
                namespace,
                vector_id: id.to_string(),
            },
            user_id: scope.user_id.clone(),
            project_id: scope.project_id.clone(),
            agent_id: scope.agent_id.clone(),
            kind,
            content: content.to_string(),
            summary,
            importance: self.config.importance.initial,
            access_count: 0,
            created_at: Utc::now(),
            last_accessed_at: None,
            tags,
        };
        self.store.insert(&entry).await.map_err(MemoryError::Store)?;

        tracing::debug!(%id, kind = %kind, "memory entry created");
        Ok(id)
    }

    /// Decide whether and how to fetch memory for one message.
    pub async fn decide(&self, message: &str, scope: &ScopeContext) -> Result<RetrievalPlan> {
        Self::validate_scope(scope)?;
        Ok(self.policy.decide(message, scope).await)
    }

    /// Execute a retrieval plan under the configured deadline.
    pub async fn retrieve(&self, plan: &RetrievalPlan, scope: &ScopeContext) -> Result<RankedResult> {
        self.retrieve_with_deadline(plan, scope, self.config.retrieval.deadline)
            .await
    }

    /// Execute a retrieval plan under a caller-supplied deadline. A missed
    /// deadline yields the explicit empty result: memory augmentation never
    /// blocks the chat turn.
    pub async fn retrieve_with_deadline(
        &self,
        plan: &RetrievalPlan,
        scope: &ScopeContext,
        deadline: Duration,
    ) -> Result<RankedResult> {
        Self::validate_scope(scope)?;
        match tokio::time::timeout(deadline, self.aggregator.retrieve(plan, scope)).await {
            Ok(result) => Ok(result),
            Err(_) => {
                tracing::warn!("retrieval missed its {:?} deadline, returning no context", deadline);
                Ok(RankedResult::no_context())
            }
        }
    }

    /// Reinforce the entries the caller actually included in the final
    /// augmented prompt. Returns how many were boosted.
    pub async fn reinforce(&self, ids: &[Uuid]) -> usize {
        self.maintainer.reinforce(ids).await
    }

    /// Run the scheduled maintenance pass for one scope: aging decay,
    /// duplicate consolidation, then eviction (including the vector-index
    /// leg of the two-phase delete). Single-flight per scope.
    pub async fn run_maintenance(&self, scope: &ScopeContext) -> Result<MaintenanceReport> {
        Self::validate_scope(scope)?;

        let _guard = match InFlightGuard::acquire(&self.in_flight, &scope.user_id) {
            Some(g) => g,
            None => {
                tracing::warn!(user = %scope.user_id, "maintenance already in flight, skipping");
                return Ok(MaintenanceReport {
                    skipped: true,
                    ..Default::default()
                });
            }
        };

        let aged = self.maintainer.age_sweep(Some(scope)).await.aged;
        let consolidated = self.consolidator.consolidate(scope).await.merged;

        let eviction = self.sweeper.cleanup(Some(scope)).await;
        for r in &eviction.vector_refs {
            if let Err(e) = self
                .vector_index
                .delete(&r.namespace, std::slice::from_ref(&r.vector_id))
                .await
            {
                // Row is already gone; an orphan vector is the safe
                // failure direction.
                tracing::warn!("vector delete failed after eviction: {}", e);
            }
        }

        Ok(MaintenanceReport {
            aged,
            consolidated,
            evicted: eviction.deleted,
            skipped: false,
        })
    }

    /// Derived health report for UI hints.
    pub async fn health(&self, scope: &ScopeContext) -> Result<HealthReport> {
        Self::validate_scope(scope)?;
        self.health
            .health_status(scope)
            .await
            .map_err(MemoryError::Store)
    }
}

/// Removes its scope key from the in-flight set on drop.
struct InFlightGuard {
    set: Arc<StdMutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<StdMutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let mut in_flight = set.lock().ok()?;
        if !in_flight.insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.set.lock() {
            in_flight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::CharTokenCounter;
    use crate::store::SqliteMemoryStore;
    use crate::testutil::{entry, FakeClassifier, FakeEmbedder, FakeSummarizer, FakeVectorIndex};
    use crate::types::{RetrievalMode, RetrievalNeed, TimeWindow};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        store: Arc<SqliteMemoryStore>,
        index: Arc<FakeVectorIndex>,
        engine: MemoryEngine,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
            let index = Arc::new(FakeVectorIndex::default());
            let engine = MemoryEngine::new(
                store.clone(),
                index.clone(),
                Arc::new(FakeEmbedder::default()),
                Arc::new(FakeClassifier::default()),
                Arc::new(FakeSummarizer::default()),
                Arc::new(CharTokenCounter),
                MemoryConfig::default(),
            );
            Self {
                store,
                index,
                engine,
            }
        }
    }

    fn details_plan(query: &str) -> RetrievalPlan {
        RetrievalPlan {
            query: query.to_string(),
            need: RetrievalNeed::Yes,
            kinds: Vec::new(),
            mode: RetrievalMode::Details,
            budget_tokens: 3000,
            window: TimeWindow::All,
        }
    }

    #[tokio::test]
    async fn empty_user_id_is_a_hard_error() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("  ");

        let err = fx.engine.decide("anything", &scope).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidScope(_)));

        let err = fx
            .engine
            .remember(&scope, MemoryKind::Decision, "x", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidScope(_)));

        let err = fx.engine.run_maintenance(&scope).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidScope(_)));
    }

    #[tokio::test]
    async fn remember_writes_row_and_vector_in_lockstep() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("u1").with_project("p1");
        let long_content = "the CFO prefers quarterly summaries ".repeat(10);

        let id = fx
            .engine
            .remember(&scope, MemoryKind::UserPreference, &long_content, Vec::new())
            .await
            .unwrap();

        let stored = fx.store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.vector_ref.namespace, "project:p1");
        assert_eq!(stored.vector_ref.vector_id, id.to_string());
        assert!(stored.summary.len() <= 100);
        assert_eq!(stored.importance, 5.0);
        assert_eq!(stored.access_count, 0);

        let upserted = fx.index.upserted.lock().unwrap().clone();
        assert_eq!(upserted, vec![("project:p1".to_string(), id.to_string())]);
    }

    #[tokio::test]
    async fn retrieval_does_not_reinforce_until_confirmed() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("u1");
        let e = entry("u1", MemoryKind::Decision, 5.0, 0);
        fx.store.insert(&e).await.unwrap();
        fx.index.add_results("user:u1", &[e.id]);

        let result = fx
            .engine
            .retrieve(&details_plan("pricing"), &scope)
            .await
            .unwrap();
        assert!(result.has_context());

        // Fetching alone leaves the access count untouched.
        assert_eq!(fx.store.get(e.id).await.unwrap().unwrap().access_count, 0);

        // Confirmed use reinforces.
        let boosted = fx.engine.reinforce(&result.entry_ids()).await;
        assert_eq!(boosted, 1);
        let after = fx.store.get(e.id).await.unwrap().unwrap();
        assert_eq!(after.access_count, 1);
        assert_eq!(after.importance, 5.5);
    }

    #[tokio::test]
    async fn maintenance_ages_evicts_and_cleans_vectors() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("u1");

        let mut stale = entry("u1", MemoryKind::ProjectContext, 3.0, 0);
        stale.created_at = Utc::now() - ChronoDuration::days(45);
        let mut dead = entry("u1", MemoryKind::Feedback, 1.0, 0);
        dead.created_at = Utc::now() - ChronoDuration::days(120);
        fx.store.insert(&stale).await.unwrap();
        fx.store.insert(&dead).await.unwrap();

        let report = fx.engine.run_maintenance(&scope).await.unwrap();
        assert!(!report.skipped);
        // Both rows were stale enough to age; the dead one is then evicted.
        assert_eq!(report.aged, 2);
        assert_eq!(report.evicted, 1);

        assert!(fx.store.get(dead.id).await.unwrap().is_none());
        assert_eq!(fx.store.get(stale.id).await.unwrap().unwrap().importance, 2.0);

        let deleted = fx.index.deleted.lock().unwrap().clone();
        assert_eq!(
            deleted,
            vec![(dead.vector_ref.namespace.clone(), vec![dead.vector_ref.vector_id.clone()])]
        );
    }

    #[tokio::test]
    async fn maintenance_runs_back_to_back_after_guard_release() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("u1");

        let first = fx.engine.run_maintenance(&scope).await.unwrap();
        let second = fx.engine.run_maintenance(&scope).await.unwrap();
        assert!(!first.skipped);
        assert!(!second.skipped);
    }

    struct StallingEmbedder;

    #[async_trait::async_trait]
    impl Embedder for StallingEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![0.0])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missed_deadline_returns_no_context() {
        let store = Arc::new(SqliteMemoryStore::open_in_memory().unwrap());
        let engine = MemoryEngine::new(
            store,
            Arc::new(FakeVectorIndex::default()),
            Arc::new(StallingEmbedder),
            Arc::new(FakeClassifier::default()),
            Arc::new(FakeSummarizer::default()),
            Arc::new(CharTokenCounter),
            MemoryConfig::default(),
        );

        let result = engine
            .retrieve_with_deadline(
                &details_plan("pricing"),
                &ScopeContext::user("u1"),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert!(!result.has_context());
    }

    #[tokio::test]
    async fn full_turn_flow_via_fast_path() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("u1");
        let id = fx
            .engine
            .remember(&scope, MemoryKind::Decision, "we set pricing at $49/mo", Vec::new())
            .await
            .unwrap();
        fx.index.add_results("user:u1", &[id]);

        let plan = fx
            .engine
            .decide("remember what I said about pricing last time?", &scope)
            .await
            .unwrap();
        assert_eq!(plan.need, RetrievalNeed::Yes);

        let result = fx.engine.retrieve(&plan, &scope).await.unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].text, "we set pricing at $49/mo");
        assert!(result.total_tokens <= plan.budget_tokens);
    }

    #[tokio::test]
    async fn health_surface_reports_counts() {
        let fx = Fixture::new();
        let scope = ScopeContext::user("u1");
        fx.store
            .insert(&entry("u1", MemoryKind::Decision, 8.0, 2))
            .await
            .unwrap();

        let report = fx.engine.health(&scope).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.healthy, 1);
    }
}

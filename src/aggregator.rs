//! Retrieval aggregator: per-scope sub-queries, dedup, ranking, budget.
//!
//! Runs up to three sub-queries (user, project, agent namespaces) in
//! parallel, merges the candidates, fetches rows, and truncates the result
//! greedily to the plan's token budget, highest importance first. A scope
//! whose vector query fails contributes nothing; if every scope comes back
//! empty the aggregator returns the explicit no-context result.
//!
//! The aggregator never reinforces. Reported ids are boosted downstream only
//! after the caller confirms which entries survived into the final prompt,
//! so entries fetched but truncated out keep honest access counts.

use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::external::{Embedder, TokenCounter, VectorIndex};
use crate::store::MemoryStore;
use crate::types::{
    MemoryScope, RankedResult, RetrievalMode, RetrievalNeed, RetrievalPlan, RetrievedEntry,
    ScopeContext,
};

pub struct RetrievalAggregator {
    store: Arc<dyn MemoryStore>,
    vector_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    token_counter: Arc<dyn TokenCounter>,
    config: RetrievalConfig,
}

impl RetrievalAggregator {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        vector_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        token_counter: Arc<dyn TokenCounter>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            vector_index,
            embedder,
            token_counter,
            config,
        }
    }

    /// Execute a retrieval plan. Infallible by design: every degraded
    /// external call shrinks the result instead of erroring.
    pub async fn retrieve(&self, plan: &RetrievalPlan, scope: &ScopeContext) -> RankedResult {
        if plan.need == RetrievalNeed::No || plan.budget_tokens == 0 {
            return RankedResult::no_context();
        }

        let embedding = match self.embedder.embed(&plan.query).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("query embedding failed, returning no context: {}", e);
                return RankedResult::no_context();
            }
        };

        // Dedup priority order: user > project > agent.
        let mut namespaces = vec![(
            MemoryScope::User,
            scope.user_namespace(),
            self.config.user_top_k,
        )];
        if let Some(ns) = scope.project_namespace() {
            namespaces.push((MemoryScope::Project, ns, self.config.project_top_k));
        }
        if let Some(ns) = scope.agent_namespace() {
            namespaces.push((MemoryScope::Agent, ns, self.config.agent_top_k));
        }

        let queries = namespaces.iter().map(|(mem_scope, ns, top_k)| {
            let embedding = &embedding;
            async move {
                match self.vector_index.query(ns, embedding, *top_k).await {
                    Ok(matches) => (*mem_scope, matches),
                    Err(e) => {
                        tracing::warn!("vector query failed for {}: {}", ns, e);
                        (*mem_scope, Vec::new())
                    }
                }
            }
        });
        let per_scope = futures::future::join_all(queries).await;

        // Merge, keeping the first occurrence of each id.
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut candidates: Vec<(Uuid, MemoryScope, f64)> = Vec::new();
        for (mem_scope, matches) in per_scope {
            for m in matches {
                let id = match Uuid::parse_str(&m.id) {
                    Ok(id) => id,
                    Err(_) => {
                        tracing::warn!("vector index returned non-uuid id {}", m.id);
                        continue;
                    }
                };
                if seen.insert(id) {
                    candidates.push((id, mem_scope, m.score));
                }
            }
        }
        if candidates.is_empty() {
            return RankedResult::no_context();
        }

        let ids: Vec<Uuid> = candidates.iter().map(|(id, _, _)| *id).collect();
        let entries = match self.store.fetch_by_ids(&ids).await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("memory store fetch failed, returning no context: {}", e);
                return RankedResult::no_context();
            }
        };

        let now = chrono::Utc::now();
        let window_start = plan.window.start(now);

        let mut ranked: Vec<RetrievedEntry> = Vec::new();
        for entry in entries {
            if !plan.kinds.is_empty() && !plan.kinds.contains(&entry.kind) {
                continue;
            }
            if let Some(start) = window_start {
                if entry.last_touch() < start {
                    continue;
                }
            }
            let (scope_label, similarity) = candidates
                .iter()
                .find(|(id, _, _)| *id == entry.id)
                .map(|(_, s, score)| (*s, *score))
                .unwrap_or((MemoryScope::User, 0.0));

            let text = match plan.mode {
                RetrievalMode::Catalog => entry.summary.clone(),
                RetrievalMode::Details => entry.content.clone(),
            };
            ranked.push(RetrievedEntry {
                id: entry.id,
                kind: entry.kind,
                scope: scope_label,
                text,
                importance: entry.importance,
                similarity,
            });
        }

        ranked.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        // Greedy budget cut: keep entries in importance order until the next
        // one would exceed the budget, then stop. No partial entries.
        let mut kept = Vec::new();
        let mut total_tokens: u32 = 0;
        for entry in ranked {
            let cost = self.token_counter.count(&entry.text);
            if total_tokens + cost > plan.budget_tokens {
                break;
            }
            total_tokens += cost;
            kept.push(entry);
        }

        RankedResult {
            entries: kept,
            total_tokens,
        }
    }
}

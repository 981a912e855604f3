//! Consolidation: merging near-duplicate low-importance entries.
//!
//! A best-effort background job, never on the request path. Candidates are a
//! bounded set of low-importance entries for one scope, grouped by kind.
//! Each group of two or more goes to the external summarizer, which proposes
//! sub-groups of near-duplicates with one merged text each. A valid proposal
//! rewrites the first member in place (keeping the group's highest
//! importance) and deletes the rest, vector refs included. Anything
//! malformed is a no-op for that group; one group failing never blocks the
//! others.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::config::MaintenanceConfig;
use crate::external::{TextSummarizer, VectorIndex};
use crate::store::MemoryStore;
use crate::types::{safe_truncate, MemoryEntry, ScopeContext};

/// Result of one consolidation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidationReport {
    /// Candidate entries examined.
    pub analyzed: usize,
    /// Entries merged away (deleted into a survivor).
    pub merged: usize,
}

/// Cap on derived summaries, in bytes.
const SUMMARY_MAX_LEN: usize = 100;

pub struct ConsolidationEngine {
    store: Arc<dyn MemoryStore>,
    vector_index: Arc<dyn VectorIndex>,
    summarizer: Arc<dyn TextSummarizer>,
    config: MaintenanceConfig,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        vector_index: Arc<dyn VectorIndex>,
        summarizer: Arc<dyn TextSummarizer>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            store,
            vector_index,
            summarizer,
            config,
        }
    }

    /// Merge near-duplicate low-importance entries for one scope.
    pub async fn consolidate(&self, scope: &ScopeContext) -> ConsolidationReport {
        let candidates = match self
            .store
            .consolidation_candidates(
                scope,
                self.config.consolidation_max_importance,
                self.config.consolidation_candidates,
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("consolidation candidate query failed: {}", e);
                return ConsolidationReport::default();
            }
        };

        let mut report = ConsolidationReport {
            analyzed: candidates.len(),
            merged: 0,
        };

        // Group by kind; BTreeMap keeps run order stable.
        let mut groups: BTreeMap<&'static str, Vec<MemoryEntry>> = BTreeMap::new();
        for entry in candidates {
            groups.entry(entry.kind.as_str()).or_default().push(entry);
        }

        for (kind, group) in groups {
            if group.len() < 2 {
                continue;
            }
            match self.merge_group(&group).await {
                Ok(merged) => report.merged += merged,
                Err(e) => {
                    tracing::warn!("consolidation failed for kind {}: {}", kind, e);
                }
            }
        }

        if report.merged > 0 {
            tracing::info!(
                analyzed = report.analyzed,
                merged = report.merged,
                "consolidation complete"
            );
        }
        report
    }

    /// Ask the summarizer about one kind-group and apply any valid merges.
    /// Returns the number of entries merged away.
    async fn merge_group(&self, group: &[MemoryEntry]) -> anyhow::Result<usize> {
        let texts: Vec<String> = group.iter().map(|e| e.content.clone()).collect();
        let outcome = self.summarizer.merge(&texts).await?;

        let mut merged_away = 0;
        let mut consumed: HashSet<usize> = HashSet::new();

        for proposal in outcome.merged_groups {
            // Validate the proposal before touching anything: at least two
            // distinct in-range members, none consumed by an earlier
            // proposal, non-empty merged text.
            let mut members: Vec<usize> = Vec::new();
            let mut valid = true;
            for idx in &proposal.member_indexes {
                if *idx >= group.len() || consumed.contains(idx) || members.contains(idx) {
                    valid = false;
                    break;
                }
                members.push(*idx);
            }
            if !valid || members.len() < 2 || proposal.merged_content.trim().is_empty() {
                tracing::debug!("skipping malformed merge proposal");
                continue;
            }

            let survivor = &group[members[0]];
            let importance = members
                .iter()
                .map(|i| group[*i].importance)
                .fold(f64::MIN, f64::max);
            let summary = if proposal.summary.trim().is_empty() {
                safe_truncate(proposal.merged_content.trim(), SUMMARY_MAX_LEN).to_string()
            } else {
                safe_truncate(proposal.summary.trim(), SUMMARY_MAX_LEN).to_string()
            };

            self.store
                .apply_merge(survivor.id, &proposal.merged_content, &summary, importance)
                .await?;

            let losers: Vec<_> = members[1..].iter().map(|i| group[*i].id).collect();
            let refs = self.store.delete(&losers).await?;
            for r in refs {
                if let Err(e) = self.vector_index.delete(&r.namespace, &[r.vector_id]).await {
                    // Store row is already gone; an orphan vector is the
                    // safe direction and the index can be compacted later.
                    tracing::warn!("vector delete failed after merge: {}", e);
                }
            }

            merged_away += losers.len();
            consumed.extend(members);
        }

        Ok(merged_away)
    }
}

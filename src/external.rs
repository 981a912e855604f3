//! External collaborator capabilities.
//!
//! The engine never talks to a model vendor or a vector database directly;
//! it consumes these traits. Production wiring uses [`crate::OpenRouterClient`]
//! plus whatever vector index the deployment runs; tests use deterministic
//! fakes. Capability errors are opaque (`anyhow`), and every call site is
//! expected to degrade rather than propagate them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One nearest-neighbor match from the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub score: f64,
}

/// Semantic nearest-neighbor search, namespaced by scope.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> anyhow::Result<Vec<VectorMatch>>;

    async fn upsert(&self, namespace: &str, id: &str, embedding: &[f32]) -> anyhow::Result<()>;

    async fn delete(&self, namespace: &str, ids: &[String]) -> anyhow::Result<()>;
}

/// Text-to-vector embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// External classification used only by the retrieval-policy fallback.
///
/// Returns raw model text; the caller tolerates non-JSON or partially-JSON
/// responses and validates every field itself.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> anyhow::Result<String>;
}

/// One merged sub-group proposed by the summarizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedGroup {
    /// Indexes into the input group. Must have >= 2 distinct in-range
    /// members to be applied.
    pub member_indexes: Vec<usize>,
    pub merged_content: String,
    pub summary: String,
}

/// Outcome of a merge request over one group of near-duplicate texts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub merged_groups: Vec<MergedGroup>,
}

/// External summarization used only by the consolidation engine.
#[async_trait]
pub trait TextSummarizer: Send + Sync {
    async fn merge(&self, texts: &[String]) -> anyhow::Result<MergeOutcome>;
}

/// Pluggable token counting for budget truncation.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> u32;
}

/// Default counter: rough 4-chars-per-token estimate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenCounter;

impl TokenCounter for CharTokenCounter {
    fn count(&self, text: &str) -> u32 {
        ((text.len() + 3) / 4) as u32
    }
}

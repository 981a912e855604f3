//! Deterministic fakes for the capability traits, shared by unit tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::external::{
    Embedder, MergeOutcome, TextClassifier, TextSummarizer, TokenCounter, VectorIndex, VectorMatch,
};
use crate::types::{MemoryEntry, MemoryKind, VectorRef};

/// Build a plain user-scoped entry.
pub(crate) fn entry(user_id: &str, kind: MemoryKind, importance: f64, access_count: i64) -> MemoryEntry {
    let id = Uuid::new_v4();
    MemoryEntry {
        id,
        vector_ref: VectorRef {
            namespace: format!("user:{}", user_id),
            vector_id: id.to_string(),
        },
        user_id: user_id.to_string(),
        project_id: None,
        agent_id: None,
        kind,
        content: format!("content of {}", id),
        summary: format!("summary of {}", id),
        importance,
        access_count,
        created_at: Utc::now(),
        last_accessed_at: None,
        tags: Vec::new(),
    }
}

/// Vector index with canned per-namespace results.
#[derive(Default)]
pub(crate) struct FakeVectorIndex {
    pub results: Mutex<HashMap<String, Vec<VectorMatch>>>,
    pub failing_namespaces: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<(String, Vec<String>)>>,
    pub upserted: Mutex<Vec<(String, String)>>,
}

impl FakeVectorIndex {
    pub fn add_results(&self, namespace: &str, ids: &[Uuid]) {
        let matches = ids
            .iter()
            .enumerate()
            .map(|(i, id)| VectorMatch {
                id: id.to_string(),
                score: 0.9 - 0.1 * i as f64,
            })
            .collect();
        self.results
            .lock()
            .unwrap()
            .insert(namespace.to_string(), matches);
    }

    pub fn fail_namespace(&self, namespace: &str) {
        self.failing_namespaces
            .lock()
            .unwrap()
            .push(namespace.to_string());
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn query(
        &self,
        namespace: &str,
        _embedding: &[f32],
        top_k: usize,
    ) -> anyhow::Result<Vec<VectorMatch>> {
        if self
            .failing_namespaces
            .lock()
            .unwrap()
            .iter()
            .any(|ns| ns == namespace)
        {
            anyhow::bail!("vector index unavailable for {}", namespace);
        }
        Ok(self
            .results
            .lock()
            .unwrap()
            .get(namespace)
            .map(|m| m.iter().take(top_k).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, namespace: &str, id: &str, _embedding: &[f32]) -> anyhow::Result<()> {
        self.upserted
            .lock()
            .unwrap()
            .push((namespace.to_string(), id.to_string()));
        Ok(())
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> anyhow::Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((namespace.to_string(), ids.to_vec()));
        Ok(())
    }
}

/// Embedder returning a constant vector, or failing on demand.
#[derive(Default)]
pub(crate) struct FakeEmbedder {
    pub fail: bool,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        if self.fail {
            anyhow::bail!("embedding service down");
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

/// Classifier returning a scripted reply, or failing when none is set.
/// Records whether it was called, so fast-path tests can assert it was not.
#[derive(Default)]
pub(crate) struct FakeClassifier {
    pub reply: Option<String>,
    pub calls: Mutex<u32>,
}

impl FakeClassifier {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TextClassifier for FakeClassifier {
    async fn classify(&self, _prompt: &str) -> anyhow::Result<String> {
        *self.calls.lock().unwrap() += 1;
        match &self.reply {
            Some(r) => Ok(r.clone()),
            None => anyhow::bail!("classifier unavailable"),
        }
    }
}

/// Summarizer returning a scripted merge outcome, or failing when none is set.
#[derive(Default)]
pub(crate) struct FakeSummarizer {
    pub outcome: Option<MergeOutcome>,
}

#[async_trait]
impl TextSummarizer for FakeSummarizer {
    async fn merge(&self, _texts: &[String]) -> anyhow::Result<MergeOutcome> {
        match &self.outcome {
            Some(o) => Ok(o.clone()),
            None => anyhow::bail!("summarizer unavailable"),
        }
    }
}

/// Counter charging a fixed price per text, for exact budget math.
pub(crate) struct FixedTokenCounter(pub u32);

impl TokenCounter for FixedTokenCounter {
    fn count(&self, _text: &str) -> u32 {
        self.0
    }
}

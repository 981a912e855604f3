//! # Boardroom Memory
//!
//! Memory lifecycle & retrieval engine for the Boardroom AI-executive chat.
//!
//! For every inbound chat message this crate decides *whether* past context
//! should be fetched, *how much* of it (token budget), and *from which scope*
//! (user-global, project, or agent-specific), then maintains the memory store
//! over time: reinforcing entries that get used, decaying and evicting stale
//! ones, and merging near-duplicates.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐      ┌──────────────────────┐
//! │ RetrievalPolicyEngine│─────▶│ RetrievalAggregator  │
//! │  (rules + classifier)│      │ (per-scope sub-query)│
//! └──────────────────────┘      └──────────┬───────────┘
//!                                          │
//!                          ┌───────────────┼───────────────┐
//!                          ▼               ▼               ▼
//!                   ┌────────────┐  ┌────────────┐  ┌────────────┐
//!                   │ MemoryStore│  │ VectorIndex│  │  Embedder  │
//!                   │  (SQLite)  │  │ (external) │  │ (external) │
//!                   └────────────┘  └────────────┘  └────────────┘
//!                          ▲
//!            ┌─────────────┼──────────────────┐
//!            │             │                  │
//! ┌──────────┴───────┐ ┌───┴───────────────┐ ┌┴────────────────┐
//! │ImportanceMaintainer│ │ConsolidationEngine│ │ EvictionSweeper │
//! │ (boost / decay)  │ │ (merge duplicates)│ │ (hard delete)   │
//! └──────────────────┘ └───────────────────┘ └─────────────────┘
//! ```
//!
//! ## Flow
//! 1. A chat turn arrives; [`MemoryEngine::decide`] produces a [`RetrievalPlan`]
//!    (fast deterministic rules first, external classifier as fallback).
//! 2. [`MemoryEngine::retrieve`] runs the per-scope sub-queries in parallel,
//!    dedups, ranks by importance, and truncates to the token budget.
//! 3. The caller reports which entries made it into the final prompt via
//!    [`MemoryEngine::reinforce`].
//! 4. On a schedule, [`MemoryEngine::run_maintenance`] ages inactive entries,
//!    merges near-duplicates, and evicts dead ones.
//!
//! Memory augmentation is always optional: every external failure degrades to
//! "no context this turn", never to a broken chat response.

pub mod aggregator;
pub mod config;
pub mod consolidate;
pub mod engine;
pub mod error;
pub mod evict;
pub mod external;
pub mod health;
pub mod maintain;
pub mod openrouter;
pub mod policy;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregator::RetrievalAggregator;
pub use config::{MemoryConfig, OpenRouterConfig};
pub use consolidate::{ConsolidationEngine, ConsolidationReport};
pub use engine::{MaintenanceReport, MemoryEngine};
pub use error::MemoryError;
pub use evict::{EvictionReport, EvictionSweeper};
pub use external::{
    CharTokenCounter, Embedder, MergeOutcome, MergedGroup, TextClassifier, TextSummarizer,
    TokenCounter, VectorIndex, VectorMatch,
};
pub use health::{HealthReport, HealthReporter};
pub use maintain::{AgeSweepReport, ImportanceMaintainer};
pub use openrouter::OpenRouterClient;
pub use policy::RetrievalPolicyEngine;
pub use store::{MemoryStore, SqliteMemoryStore};
pub use types::*;

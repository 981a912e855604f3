//! Types for the memory engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a memory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A learned user preference. Protected: never auto-evicted.
    UserPreference,
    /// Background context about a project.
    ProjectContext,
    /// An insight surfaced during a multi-agent discussion.
    DiscussionInsight,
    /// A recorded decision.
    Decision,
    /// Feedback the user gave on an agent's output.
    Feedback,
}

impl MemoryKind {
    pub const ALL: [MemoryKind; 5] = [
        Self::UserPreference,
        Self::ProjectContext,
        Self::DiscussionInsight,
        Self::Decision,
        Self::Feedback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPreference => "user_preference",
            Self::ProjectContext => "project_context",
            Self::DiscussionInsight => "discussion_insight",
            Self::Decision => "decision",
            Self::Feedback => "feedback",
        }
    }

    /// Protected kinds are exempt from the eviction sweeper.
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::UserPreference)
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "user_preference" => Ok(Self::UserPreference),
            "project_context" => Ok(Self::ProjectContext),
            "discussion_insight" => Ok(Self::DiscussionInsight),
            "decision" => Ok(Self::Decision),
            "feedback" => Ok(Self::Feedback),
            other => Err(format!("unknown memory kind: {}", other)),
        }
    }
}

/// Which namespace a retrieved entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    User,
    Project,
    Agent,
}

impl MemoryScope {
    /// Dedup priority when the same entry surfaces from two namespaces
    /// (lower wins).
    pub fn priority(&self) -> u8 {
        match self {
            Self::User => 0,
            Self::Project => 1,
            Self::Agent => 2,
        }
    }
}

/// Ownership tuple that partitions memory namespaces.
///
/// `user_id` is always required; `project_id` and `agent_id` widen retrieval
/// to project- and agent-scoped memory when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeContext {
    pub user_id: String,
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    /// Number of turns already in the conversation, passed through to the
    /// classifier prompt.
    pub recent_turns: u32,
}

impl ScopeContext {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: None,
            agent_id: None,
            recent_turns: 0,
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Vector namespace for user-global memory.
    pub fn user_namespace(&self) -> String {
        format!("user:{}", self.user_id)
    }

    /// Vector namespace for project memory, if a project is in scope.
    pub fn project_namespace(&self) -> Option<String> {
        self.project_id.as_ref().map(|p| format!("project:{}", p))
    }

    /// Vector namespace for agent memory, if an agent is in scope.
    pub fn agent_namespace(&self) -> Option<String> {
        self.agent_id
            .as_ref()
            .map(|a| format!("agent:{}:{}", self.user_id, a))
    }

    /// Most specific namespace for newly created entries.
    pub fn write_namespace(&self) -> String {
        if let Some(ns) = self.agent_namespace() {
            ns
        } else if let Some(ns) = self.project_namespace() {
            ns
        } else {
            self.user_namespace()
        }
    }
}

/// Reference into the external vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorRef {
    pub namespace: String,
    pub vector_id: String,
}

/// A memory entry as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub vector_ref: VectorRef,
    pub user_id: String,
    pub project_id: Option<String>,
    pub agent_id: Option<String>,
    pub kind: MemoryKind,
    /// Full text of the memory.
    pub content: String,
    /// Short derived text (~100 chars) used for catalog-mode display.
    pub summary: String,
    /// Bounded score driving both ranking and eviction eligibility.
    pub importance: f64,
    pub access_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

impl MemoryEntry {
    /// The timestamp aging and eviction compare against: last access, or
    /// creation if the entry was never accessed.
    pub fn last_touch(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.created_at)
    }
}

/// Whether memory should be fetched for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalNeed {
    Yes,
    No,
    Maybe,
}

impl std::str::FromStr for RetrievalNeed {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "maybe" => Ok(Self::Maybe),
            other => Err(format!("unknown retrieval need: {}", other)),
        }
    }
}

/// Retrieval depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Short summaries only, for cheap/broad context.
    Catalog,
    /// Full entry content, for deep/narrow context.
    Details,
}

impl std::str::FromStr for RetrievalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "catalog" => Ok(Self::Catalog),
            "details" => Ok(Self::Details),
            other => Err(format!("unknown retrieval mode: {}", other)),
        }
    }
}

/// Time window a retrieval considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Last7Days,
    Last30Days,
    All,
}

impl TimeWindow {
    /// Lower bound for `last_touch`, or `None` for `All`.
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Last7Days => Some(now - chrono::Duration::days(7)),
            Self::Last30Days => Some(now - chrono::Duration::days(30)),
            Self::All => None,
        }
    }
}

impl std::str::FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "last_7_days" => Ok(Self::Last7Days),
            "last_30_days" => Ok(Self::Last30Days),
            "all" => Ok(Self::All),
            other => Err(format!("unknown time window: {}", other)),
        }
    }
}

/// Decision produced by the policy engine for one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPlan {
    /// The message the plan was made for; reused as the vector-search query.
    pub query: String,
    pub need: RetrievalNeed,
    /// Kinds to search. Empty means "all kinds".
    pub kinds: Vec<MemoryKind>,
    pub mode: RetrievalMode,
    pub budget_tokens: u32,
    pub window: TimeWindow,
}

impl RetrievalPlan {
    /// Plan that skips retrieval entirely.
    pub fn skip(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            need: RetrievalNeed::No,
            kinds: Vec::new(),
            mode: RetrievalMode::Catalog,
            budget_tokens: 0,
            window: TimeWindow::All,
        }
    }
}

/// One entry in a ranked retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedEntry {
    pub id: Uuid,
    pub kind: MemoryKind,
    pub scope: MemoryScope,
    /// Summary in catalog mode, full content in details mode.
    pub text: String,
    pub importance: f64,
    pub similarity: f64,
}

/// Deduplicated, ranked, budget-truncated retrieval result.
///
/// An empty result is an ordinary outcome, not an error: absence of memory
/// never fails a chat turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankedResult {
    pub entries: Vec<RetrievedEntry>,
    pub total_tokens: u32,
}

impl RankedResult {
    /// Explicit "no context" result.
    pub fn no_context() -> Self {
        Self::default()
    }

    pub fn has_context(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Ids to hand back to [`crate::MemoryEngine::reinforce`] once the caller
    /// confirms the entries made it into the final prompt.
    pub fn entry_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

/// Truncate at a char boundary at or below `max` bytes, safe for UTF-8.
pub(crate) fn safe_truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in MemoryKind::ALL {
            assert_eq!(kind.as_str().parse::<MemoryKind>().unwrap(), kind);
        }
    }

    #[test]
    fn only_user_preference_is_protected() {
        assert!(MemoryKind::UserPreference.is_protected());
        assert!(!MemoryKind::ProjectContext.is_protected());
        assert!(!MemoryKind::Decision.is_protected());
    }

    #[test]
    fn namespaces_follow_scope() {
        let scope = ScopeContext::user("u1")
            .with_project("p1")
            .with_agent("cfo");
        assert_eq!(scope.user_namespace(), "user:u1");
        assert_eq!(scope.project_namespace().unwrap(), "project:p1");
        assert_eq!(scope.agent_namespace().unwrap(), "agent:u1:cfo");
        assert_eq!(scope.write_namespace(), "agent:u1:cfo");

        let bare = ScopeContext::user("u1");
        assert_eq!(bare.write_namespace(), "user:u1");
    }

    #[test]
    fn safe_truncate_respects_char_boundaries() {
        let s = "héllo wörld";
        let t = safe_truncate(s, 2);
        assert!(t.len() <= 2);
        assert!(s.starts_with(t));
        assert_eq!(safe_truncate("short", 100), "short");
    }
}

//! Retrieval policy engine ("memory controller").
//!
//! Decides, per inbound message, whether memory should be fetched, which
//! kinds, at what depth, under what token budget, and over what time window.
//!
//! A deterministic rule pass runs first: messages that reference history
//! ("last time", "you said", an expressed preference) short-circuit to a
//! full-detail fetch, and messages that open with a canonical new-task phrase
//! (greeting, definition request, generation request) short-circuit to no
//! fetch at all. Only when neither rule fires does the engine consult the
//! external classifier, under a hard timeout, coercing anything invalid in
//! the reply to a conservative default. This layer never returns an error
//! for a failed external call.

use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::external::TextClassifier;
use crate::types::{
    safe_truncate, MemoryKind, RetrievalMode, RetrievalNeed, RetrievalPlan, ScopeContext,
    TimeWindow,
};

/// Phrases that reference earlier conversation or an expressed preference.
const HISTORY_PATTERNS: &[&str] = &[
    r"\blast time\b",
    r"\byou (said|mentioned|told me|suggested)\b",
    r"\bremember\b",
    r"\bpreviously\b",
    r"\bearlier (you|we|i)\b",
    r"\bwe (discussed|talked about|agreed)\b",
    r"\b(as|like) i (said|mentioned)\b",
    r"\bmy preference\b",
    r"\bi (prefer|always|usually|never) \b",
];

/// Canonical new-task openers: greetings, definition requests, generation
/// requests. Anchored at the start of the message.
const NEW_TASK_PATTERNS: &[&str] = &[
    r"^(hi|hello|hey|good (morning|afternoon|evening))\b",
    r"^(what is|what's|what are|who is|define|explain)\b",
    r"^(write|draft|generate|create|make|brainstorm|give me)\b",
];

/// Stateless decision engine; safe to share and call concurrently.
pub struct RetrievalPolicyEngine {
    classifier: Arc<dyn TextClassifier>,
    config: PolicyConfig,
    history: Vec<Regex>,
    new_task: Vec<Regex>,
}

impl RetrievalPolicyEngine {
    pub fn new(classifier: Arc<dyn TextClassifier>, config: PolicyConfig) -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("static pattern compiles"))
                .collect()
        };
        Self {
            classifier,
            config,
            history: compile(HISTORY_PATTERNS),
            new_task: compile(NEW_TASK_PATTERNS),
        }
    }

    /// Produce a retrieval plan for one message. Infallible: every external
    /// failure degrades to the conservative default.
    pub async fn decide(&self, message: &str, scope: &ScopeContext) -> RetrievalPlan {
        if let Some(plan) = self.fast_path(message) {
            tracing::debug!(need = ?plan.need, "retrieval plan via fast path");
            return plan;
        }

        let prompt = self.build_prompt(message, scope);
        match tokio::time::timeout(
            self.config.classifier_timeout,
            self.classifier.classify(&prompt),
        )
        .await
        {
            Ok(Ok(text)) => self.parse_decision(message, &text),
            Ok(Err(e)) => {
                tracing::warn!("retrieval classifier failed, using conservative plan: {}", e);
                self.conservative_plan(message)
            }
            Err(_) => {
                tracing::warn!(
                    "retrieval classifier timed out after {:?}, using conservative plan",
                    self.config.classifier_timeout
                );
                self.conservative_plan(message)
            }
        }
    }

    /// Deterministic rule pass. Pure and side-effect-free.
    pub fn fast_path(&self, message: &str) -> Option<RetrievalPlan> {
        let trimmed = message.trim();

        if self.history.iter().any(|re| re.is_match(trimmed)) {
            return Some(RetrievalPlan {
                query: message.to_string(),
                need: RetrievalNeed::Yes,
                kinds: Vec::new(),
                mode: RetrievalMode::Details,
                budget_tokens: self.clamp_budget(self.config.generous_budget_tokens),
                window: TimeWindow::Last30Days,
            });
        }

        if self.new_task.iter().any(|re| re.is_match(trimmed)) {
            return Some(RetrievalPlan::skip(message));
        }

        None
    }

    /// Conservative default applied on any classifier failure or for any
    /// invalid field in its reply.
    fn conservative_plan(&self, message: &str) -> RetrievalPlan {
        RetrievalPlan {
            query: message.to_string(),
            need: RetrievalNeed::Maybe,
            kinds: Vec::new(),
            mode: RetrievalMode::Catalog,
            budget_tokens: self.clamp_budget(self.config.moderate_budget_tokens),
            window: TimeWindow::Last30Days,
        }
    }

    fn clamp_budget(&self, budget: u32) -> u32 {
        budget.min(self.config.max_budget_tokens)
    }

    fn build_prompt(&self, message: &str, scope: &ScopeContext) -> String {
        format!(
            r#"You decide whether an assistant needs long-term memory to answer a chat message.

Message: {message}
User: {user}
Project: {project}
Agent: {agent}
Turns so far: {turns}

Reply with JSON only:
{{"need": "yes|no|maybe", "types": ["user_preference","project_context","discussion_insight","decision","feedback"], "mode": "catalog|details", "budget_tokens": 0, "window": "last_7_days|last_30_days|all"}}"#,
            message = safe_truncate(message, 500),
            user = scope.user_id,
            project = scope.project_id.as_deref().unwrap_or("-"),
            agent = scope.agent_id.as_deref().unwrap_or("-"),
            turns = scope.recent_turns,
        )
    }

    /// Strict parse-then-validate of the classifier reply. Every field is
    /// checked against the same enums as the fast path; anything invalid or
    /// missing falls back to the conservative value for that field.
    fn parse_decision(&self, message: &str, raw: &str) -> RetrievalPlan {
        let json = match extract_json(raw) {
            Some(j) => j,
            None => {
                tracing::warn!("classifier reply carried no JSON object");
                return self.conservative_plan(message);
            }
        };

        let raw: RawDecision = match serde_json::from_str(json) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("classifier reply failed to parse: {}", e);
                return self.conservative_plan(message);
            }
        };

        let need = raw
            .need
            .as_deref()
            .and_then(|s| s.parse::<RetrievalNeed>().ok())
            .unwrap_or(RetrievalNeed::Maybe);

        let kinds: Vec<MemoryKind> = raw
            .types
            .unwrap_or_default()
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();

        let mode = raw
            .mode
            .as_deref()
            .and_then(|s| s.parse::<RetrievalMode>().ok())
            .unwrap_or(RetrievalMode::Catalog);

        let window = raw
            .window
            .as_deref()
            .and_then(|s| s.parse::<TimeWindow>().ok())
            .unwrap_or(TimeWindow::Last30Days);

        let budget_tokens = if need == RetrievalNeed::No {
            0
        } else {
            let requested = raw
                .budget_tokens
                .filter(|b| *b >= 0)
                .map(|b| b.min(u32::MAX as i64) as u32)
                .unwrap_or(self.config.moderate_budget_tokens);
            self.clamp_budget(requested)
        };

        RetrievalPlan {
            query: message.to_string(),
            need,
            kinds,
            mode,
            budget_tokens,
            window,
        }
    }
}

/// Pull the outermost `{...}` out of a reply that may wrap JSON in prose or
/// code fences.
fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    need: Option<String>,
    types: Option<Vec<String>>,
    mode: Option<String>,
    budget_tokens: Option<i64>,
    window: Option<String>,
}

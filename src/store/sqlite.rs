//! SQLite-backed memory store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{HealthCounts, MemoryStore};
use crate::types::{MemoryEntry, MemoryKind, ScopeContext, VectorRef};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS memory_entries (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    project_id TEXT,
    agent_id TEXT,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    summary TEXT NOT NULL,
    importance REAL NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT,
    aged_on TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    vector_namespace TEXT NOT NULL,
    vector_id TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_user ON memory_entries(user_id);
CREATE INDEX IF NOT EXISTS idx_entries_kind ON memory_entries(user_id, kind);
CREATE INDEX IF NOT EXISTS idx_entries_importance ON memory_entries(importance);
CREATE INDEX IF NOT EXISTS idx_entries_touch
    ON memory_entries(COALESCE(last_accessed_at, created_at));
"#;

/// Fixed-width RFC 3339 so string comparison in SQL orders by time.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        agent_id: row.get(3)?,
        kind: row.get(4)?,
        content: row.get(5)?,
        summary: row.get(6)?,
        importance: row.get(7)?,
        access_count: row.get(8)?,
        created_at: row.get(9)?,
        last_accessed_at: row.get(10)?,
        tags: row.get(11)?,
        vector_namespace: row.get(12)?,
        vector_id: row.get(13)?,
    })
}

const ENTRY_COLUMNS: &str = "id, user_id, project_id, agent_id, kind, content, summary, \
     importance, access_count, created_at, last_accessed_at, tags, \
     vector_namespace, vector_id";

/// Raw row before type decoding; kept separate so decoding failures surface
/// as anyhow errors instead of rusqlite panics.
struct RawEntry {
    id: String,
    user_id: String,
    project_id: Option<String>,
    agent_id: Option<String>,
    kind: String,
    content: String,
    summary: String,
    importance: f64,
    access_count: i64,
    created_at: String,
    last_accessed_at: Option<String>,
    tags: String,
    vector_namespace: String,
    vector_id: String,
}

impl RawEntry {
    fn decode(self) -> anyhow::Result<MemoryEntry> {
        Ok(MemoryEntry {
            id: Uuid::parse_str(&self.id)?,
            vector_ref: VectorRef {
                namespace: self.vector_namespace,
                vector_id: self.vector_id,
            },
            user_id: self.user_id,
            project_id: self.project_id,
            agent_id: self.agent_id,
            kind: self
                .kind
                .parse::<MemoryKind>()
                .map_err(|e| anyhow::anyhow!(e))?,
            content: self.content,
            summary: self.summary,
            importance: self.importance,
            access_count: self.access_count,
            created_at: parse_ts(&self.created_at)?,
            last_accessed_at: self.last_accessed_at.as_deref().map(parse_ts).transpose()?,
            tags: serde_json::from_str(&self.tags)?,
        })
    }
}

/// Memory store backed by a single SQLite database.
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    /// Open (or create) the database at `path`.
    pub async fn new(path: PathBuf) -> anyhow::Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> anyhow::Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn scope_params(scope: Option<&ScopeContext>) -> (Option<String>, Option<String>, Option<String>) {
        match scope {
            Some(s) => (
                Some(s.user_id.clone()),
                s.project_id.clone(),
                s.agent_id.clone(),
            ),
            None => (None, None, None),
        }
    }
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn insert(&self, entry: &MemoryEntry) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO memory_entries (id, user_id, project_id, agent_id, kind, content, \
             summary, importance, access_count, created_at, last_accessed_at, tags, \
             vector_namespace, vector_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                entry.id.to_string(),
                entry.user_id,
                entry.project_id,
                entry.agent_id,
                entry.kind.as_str(),
                entry.content,
                entry.summary,
                entry.importance,
                entry.access_count,
                ts(entry.created_at),
                entry.last_accessed_at.map(ts),
                serde_json::to_string(&entry.tags)?,
                entry.vector_ref.namespace,
                entry.vector_ref.vector_id,
            ],
        )?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<MemoryEntry>> {
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM memory_entries WHERE id = ?1"),
                params![id.to_string()],
                row_to_entry,
            )
            .optional()?;
        raw.map(RawEntry::decode).transpose()
    }

    async fn fetch_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<MemoryEntry>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM memory_entries WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let id_strings: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(id_strings.iter()), row_to_entry)?;

        let mut entries = Vec::new();
        for raw in rows {
            entries.push(raw?.decode()?);
        }
        Ok(entries)
    }

    async fn boost(
        &self,
        id: Uuid,
        boost: f64,
        max_importance: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE memory_entries \
             SET importance = MIN(?1, importance + ?2), \
                 access_count = access_count + 1, \
                 last_accessed_at = ?3 \
             WHERE id = ?4",
            params![max_importance, boost, ts(now), id.to_string()],
        )?;
        Ok(changed > 0)
    }

    async fn age_page(
        &self,
        scope: Option<&ScopeContext>,
        stale_before: DateTime<Utc>,
        today: NaiveDate,
        decrement: f64,
        floor: f64,
        limit: usize,
    ) -> anyhow::Result<usize> {
        let (user, project, agent) = Self::scope_params(scope);
        let conn = self.conn.lock().await;
        // The aged_on marker makes a same-day re-run a no-op.
        let changed = conn.execute(
            "UPDATE memory_entries \
             SET importance = MAX(?1, importance - ?2), aged_on = ?3 \
             WHERE id IN ( \
                 SELECT id FROM memory_entries \
                 WHERE COALESCE(last_accessed_at, created_at) < ?4 \
                   AND (aged_on IS NULL OR aged_on < ?3) \
                   AND (?5 IS NULL OR user_id = ?5) \
                   AND (?6 IS NULL OR project_id = ?6) \
                   AND (?7 IS NULL OR agent_id = ?7) \
                 LIMIT ?8 \
             )",
            params![
                floor,
                decrement,
                today.to_string(),
                ts(stale_before),
                user,
                project,
                agent,
                limit as i64,
            ],
        )?;
        Ok(changed)
    }

    async fn consolidation_candidates(
        &self,
        scope: &ScopeContext,
        max_importance: f64,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM memory_entries \
             WHERE importance < ?1 \
               AND user_id = ?2 \
               AND (?3 IS NULL OR project_id = ?3) \
               AND (?4 IS NULL OR agent_id = ?4) \
             ORDER BY created_at ASC \
             LIMIT ?5"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                max_importance,
                scope.user_id,
                scope.project_id,
                scope.agent_id,
                limit as i64,
            ],
            row_to_entry,
        )?;

        let mut entries = Vec::new();
        for raw in rows {
            entries.push(raw?.decode()?);
        }
        Ok(entries)
    }

    async fn apply_merge(
        &self,
        survivor: Uuid,
        content: &str,
        summary: &str,
        importance: f64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE memory_entries SET content = ?1, summary = ?2, importance = ?3 WHERE id = ?4",
            params![content, summary, importance, survivor.to_string()],
        )?;
        if changed == 0 {
            anyhow::bail!("merge survivor {} not found", survivor);
        }
        Ok(())
    }

    async fn eviction_candidates(
        &self,
        scope: Option<&ScopeContext>,
        threshold: f64,
        inactive_before: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<MemoryEntry>> {
        let (user, project, agent) = Self::scope_params(scope);
        let conn = self.conn.lock().await;
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM memory_entries \
             WHERE importance <= ?1 \
               AND COALESCE(last_accessed_at, created_at) < ?2 \
               AND kind != ?3 \
               AND (?4 IS NULL OR user_id = ?4) \
               AND (?5 IS NULL OR project_id = ?5) \
               AND (?6 IS NULL OR agent_id = ?6) \
             ORDER BY importance ASC \
             LIMIT ?7"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                threshold,
                ts(inactive_before),
                MemoryKind::UserPreference.as_str(),
                user,
                project,
                agent,
                limit as i64,
            ],
            row_to_entry,
        )?;

        let mut entries = Vec::new();
        for raw in rows {
            entries.push(raw?.decode()?);
        }
        Ok(entries)
    }

    async fn delete(&self, ids: &[Uuid]) -> anyhow::Result<Vec<VectorRef>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let id_strings: Vec<String> = ids.iter().map(|i| i.to_string()).collect();

        let mut stmt = conn.prepare(&format!(
            "SELECT vector_namespace, vector_id FROM memory_entries WHERE id IN ({placeholders})"
        ))?;
        let refs: Vec<VectorRef> = stmt
            .query_map(rusqlite::params_from_iter(id_strings.iter()), |row| {
                Ok(VectorRef {
                    namespace: row.get(0)?,
                    vector_id: row.get(1)?,
                })
            })?
            .collect::<Result<_, _>>()?;

        conn.execute(
            &format!("DELETE FROM memory_entries WHERE id IN ({placeholders})"),
            rusqlite::params_from_iter(id_strings.iter()),
        )?;
        Ok(refs)
    }

    async fn health_counts(
        &self,
        scope: &ScopeContext,
        stale_before: DateTime<Utc>,
        very_stale_before: DateTime<Utc>,
    ) -> anyhow::Result<HealthCounts> {
        let conn = self.conn.lock().await;
        let (total, healthy, aging, expiring) = conn.query_row(
            "SELECT COUNT(*), \
                    SUM(CASE WHEN importance >= 5 THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN importance >= 3 AND importance < 5 \
                         AND COALESCE(last_accessed_at, created_at) < ?2 THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN importance < 3 \
                         AND COALESCE(last_accessed_at, created_at) < ?3 THEN 1 ELSE 0 END) \
             FROM memory_entries \
             WHERE user_id = ?1 \
               AND (?4 IS NULL OR project_id = ?4) \
               AND (?5 IS NULL OR agent_id = ?5)",
            params![
                scope.user_id,
                ts(stale_before),
                ts(very_stale_before),
                scope.project_id,
                scope.agent_id,
            ],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                ))
            },
        )?;

        Ok(HealthCounts {
            total: total as u64,
            healthy: healthy as u64,
            aging: aging as u64,
            expiring: expiring as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::entry;
    use chrono::Duration;

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let e = entry("u1", MemoryKind::Decision, 5.0, 0);
        store.insert(&e).await.unwrap();

        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.id, e.id);
        assert_eq!(got.kind, MemoryKind::Decision);
        assert_eq!(got.content, e.content);
        assert_eq!(got.vector_ref, e.vector_ref);
        assert!(got.last_accessed_at.is_none());

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn boost_clamps_at_max_and_bumps_access() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let e = entry("u1", MemoryKind::Feedback, 9.8, 2);
        store.insert(&e).await.unwrap();

        let now = Utc::now();
        assert!(store.boost(e.id, 0.5, 10.0, now).await.unwrap());

        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.importance, 10.0);
        assert_eq!(got.access_count, 3);
        assert!(got.last_accessed_at.is_some());

        // Missing entries report false instead of erroring.
        assert!(!store.boost(Uuid::new_v4(), 0.5, 10.0, now).await.unwrap());
    }

    #[tokio::test]
    async fn age_page_is_idempotent_within_a_day() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let mut e = entry("u1", MemoryKind::ProjectContext, 3.0, 0);
        e.created_at = Utc::now() - Duration::days(45);
        store.insert(&e).await.unwrap();

        let stale_before = Utc::now() - Duration::days(30);
        let today = Utc::now().date_naive();

        let aged = store
            .age_page(None, stale_before, today, 1.0, 1.0, 500)
            .await
            .unwrap();
        assert_eq!(aged, 1);
        assert_eq!(store.get(e.id).await.unwrap().unwrap().importance, 2.0);

        // Second run the same day touches nothing.
        let aged = store
            .age_page(None, stale_before, today, 1.0, 1.0, 500)
            .await
            .unwrap();
        assert_eq!(aged, 0);
        assert_eq!(store.get(e.id).await.unwrap().unwrap().importance, 2.0);
    }

    #[tokio::test]
    async fn age_page_respects_floor() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let mut e = entry("u1", MemoryKind::Feedback, 1.2, 0);
        e.created_at = Utc::now() - Duration::days(60);
        store.insert(&e).await.unwrap();

        store
            .age_page(
                None,
                Utc::now() - Duration::days(30),
                Utc::now().date_naive(),
                1.0,
                1.0,
                500,
            )
            .await
            .unwrap();
        assert_eq!(store.get(e.id).await.unwrap().unwrap().importance, 1.0);
    }

    #[tokio::test]
    async fn eviction_candidates_skip_protected_kind() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let mut dead = entry("u1", MemoryKind::ProjectContext, 1.0, 0);
        dead.created_at = Utc::now() - Duration::days(120);
        let mut protected = entry("u1", MemoryKind::UserPreference, 1.0, 0);
        protected.created_at = Utc::now() - Duration::days(120);
        store.insert(&dead).await.unwrap();
        store.insert(&protected).await.unwrap();

        let candidates = store
            .eviction_candidates(None, 2.0, Utc::now() - Duration::days(90), 100)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, dead.id);
    }

    #[tokio::test]
    async fn delete_returns_vector_refs() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let e = entry("u1", MemoryKind::Decision, 1.0, 0);
        store.insert(&e).await.unwrap();

        let refs = store.delete(&[e.id]).await.unwrap();
        assert_eq!(refs, vec![e.vector_ref.clone()]);
        assert!(store.get(e.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scope_filter_isolates_users() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let mut mine = entry("u1", MemoryKind::Feedback, 2.0, 0);
        mine.created_at = Utc::now() - Duration::days(45);
        let mut theirs = entry("u2", MemoryKind::Feedback, 2.0, 0);
        theirs.created_at = Utc::now() - Duration::days(45);
        store.insert(&mine).await.unwrap();
        store.insert(&theirs).await.unwrap();

        let scope = ScopeContext::user("u1");
        let aged = store
            .age_page(
                Some(&scope),
                Utc::now() - Duration::days(30),
                Utc::now().date_naive(),
                1.0,
                1.0,
                500,
            )
            .await
            .unwrap();
        assert_eq!(aged, 1);
        assert_eq!(store.get(mine.id).await.unwrap().unwrap().importance, 1.0);
        assert_eq!(store.get(theirs.id).await.unwrap().unwrap().importance, 2.0);
    }

    #[tokio::test]
    async fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");

        let e = entry("u1", MemoryKind::UserPreference, 6.0, 1);
        {
            let store = SqliteMemoryStore::new(path.clone()).await.unwrap();
            store.insert(&e).await.unwrap();
        }

        let store = SqliteMemoryStore::new(path).await.unwrap();
        let got = store.get(e.id).await.unwrap().unwrap();
        assert_eq!(got.kind, MemoryKind::UserPreference);
        assert_eq!(got.importance, 6.0);
    }

    #[tokio::test]
    async fn health_counts_bucket_correctly() {
        let store = SqliteMemoryStore::open_in_memory().unwrap();
        let scope = ScopeContext::user("u1");

        store
            .insert(&entry("u1", MemoryKind::Decision, 8.0, 0))
            .await
            .unwrap();
        let mut aging = entry("u1", MemoryKind::Feedback, 4.0, 0);
        aging.created_at = Utc::now() - Duration::days(45);
        store.insert(&aging).await.unwrap();
        let mut expiring = entry("u1", MemoryKind::Feedback, 1.5, 0);
        expiring.created_at = Utc::now() - Duration::days(120);
        store.insert(&expiring).await.unwrap();

        let counts = store
            .health_counts(
                &scope,
                Utc::now() - Duration::days(30),
                Utc::now() - Duration::days(90),
            )
            .await
            .unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.healthy, 1);
        assert_eq!(counts.aging, 1);
        assert_eq!(counts.expiring, 1);
    }
}

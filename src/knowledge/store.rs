//! Session Store - rusqlite 기반 대화 세션 저장소
//!
//! 세션(대화방)과 메시지(턴), 세션별 마지막 분석 스냅샷을 저장합니다.
//! 저장 위치: <data dir>/sessions.db
//!
//! 한 번의 채팅 턴에서 발생하는 쓰기(세션 생성, 사용자 턴, 어시스턴트 턴,
//! 분석 갱신)는 [`SessionStore::commit_turn`]으로 하나의 트랜잭션에서 처리됩니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 명시적으로 생성한 세션의 기본 제목
pub const DEFAULT_SESSION_TITLE: &str = "新對話";

// ============================================================================
// Types
// ============================================================================

/// 발화자
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn parse(s: &str) -> Role {
        match s {
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

/// 대화 턴
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// 모델이 답변과 함께 내보내는 구조화 분석
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    #[serde(default = "unknown")]
    pub domain: String,
    #[serde(default = "unknown")]
    pub risk_level: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

fn unknown() -> String {
    "unknown".to_string()
}

impl Default for AnalysisSnapshot {
    fn default() -> Self {
        Self {
            domain: unknown(),
            risk_level: unknown(),
            keywords: vec![],
        }
    }
}

/// 세션
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub client_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_analysis: Option<AnalysisSnapshot>,
}

/// 세션 상세 (턴 목록 + 마지막 분석)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionDetail {
    pub turns: Vec<ConversationTurn>,
    pub analysis: Option<AnalysisSnapshot>,
}

/// 한 번의 채팅 턴에서 커밋할 내용
#[derive(Debug, Clone)]
pub struct TurnRecord<'a> {
    pub session_id: Uuid,
    pub client_id: &'a str,
    /// 세션이 새로 생길 때만 사용되는 제목
    pub title: &'a str,
    pub user: &'a str,
    pub assistant: &'a str,
    pub analysis: &'a AnalysisSnapshot,
}

// ============================================================================
// SessionStore
// ============================================================================

/// Session Store - 동기 세션 저장소
///
/// 커넥션 하나를 Mutex로 공유합니다.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl SessionStore {
    /// 저장소 열기 (없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_analysis TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_client ON sessions(client_id);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
            "#,
        )
        .context("Failed to initialize session schema")?;

        tracing::debug!("Session store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 새 세션 생성 (기본 제목)
    pub fn create_session(&self, client_id: &str) -> Result<Session> {
        let conn = self.lock()?;
        let session = Session {
            id: Uuid::new_v4(),
            client_id: client_id.to_string(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: Utc::now(),
            last_analysis: None,
        };

        insert_session(&conn, &session.id, client_id, &session.title, &session.created_at)?;

        tracing::info!("Created session {} for client {}", session.id, client_id);
        Ok(session)
    }

    /// 클라이언트의 세션 목록 (최신순)
    pub fn list_sessions(&self, client_id: &str) -> Result<Vec<Session>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, client_id, title, created_at, last_analysis FROM sessions
             WHERE client_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let sessions = stmt
            .query_map(params![client_id], row_to_session)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(sessions)
    }

    /// ID로 세션 조회
    pub fn session(&self, id: &Uuid) -> Result<Option<Session>> {
        let conn = self.lock()?;

        let session = conn
            .query_row(
                "SELECT id, client_id, title, created_at, last_analysis FROM sessions WHERE id = ?1",
                params![id.to_string()],
                row_to_session,
            )
            .optional()
            .context("Failed to query session")?;

        Ok(session)
    }

    /// 세션의 전체 턴 + 마지막 분석
    ///
    /// 없는 세션은 빈 턴 목록과 `None` 분석을 반환합니다.
    pub fn get_session(&self, id: &Uuid) -> Result<SessionDetail> {
        let analysis = self.session(id)?.and_then(|s| s.last_analysis);
        let turns = self.turns(id, None)?;
        Ok(SessionDetail { turns, analysis })
    }

    /// 최근 `limit`개 턴 (삽입 순서)
    pub fn recent_turns(&self, id: &Uuid, limit: usize) -> Result<Vec<ConversationTurn>> {
        self.turns(id, Some(limit))
    }

    fn turns(&self, id: &Uuid, limit: Option<usize>) -> Result<Vec<ConversationTurn>> {
        let conn = self.lock()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        // 최근 N개를 역순으로 뽑은 뒤 다시 삽입 순서로 정렬
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM (
                SELECT id, role, content, created_at FROM messages
                WHERE session_id = ?1
                ORDER BY id DESC
                LIMIT ?2
             ) ORDER BY id ASC",
        )?;

        let turns = stmt
            .query_map(params![id.to_string(), limit], |row| {
                Ok(ConversationTurn {
                    role: Role::parse(&row.get::<_, String>(0)?),
                    content: row.get(1)?,
                    created_at: parse_datetime(row.get::<_, String>(2)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(turns)
    }

    /// 세션 삭제 (메시지 포함)
    pub fn delete_session(&self, id: &Uuid) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![id.to_string()])?;
        let rows = tx.execute("DELETE FROM sessions WHERE id = ?1", params![id.to_string()])?;
        tx.commit().context("Failed to commit session delete")?;

        if rows > 0 {
            tracing::info!("Deleted session {}", id);
        }
        Ok(rows > 0)
    }

    /// 턴 하나 추가
    pub fn append_turn(&self, session_id: &Uuid, role: Role, content: &str) -> Result<i64> {
        let conn = self.lock()?;
        insert_message(&conn, session_id, role, content)
    }

    /// 마지막 분석 갱신
    pub fn update_analysis(&self, session_id: &Uuid, snapshot: &AnalysisSnapshot) -> Result<bool> {
        let conn = self.lock()?;
        set_analysis(&conn, session_id, snapshot)
    }

    /// 채팅 턴 커밋 (전부 성공하거나 전부 롤백)
    pub fn commit_turn(&self, record: &TurnRecord<'_>) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin turn transaction")?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![record.session_id.to_string()],
                |row| row.get(0),
            )
            .context("Failed to check session")?;
        if !exists {
            insert_session(&tx, &record.session_id, record.client_id, record.title, &Utc::now())?;
        }

        insert_message(&tx, &record.session_id, Role::User, record.user)?;
        insert_message(&tx, &record.session_id, Role::Assistant, record.assistant)?;
        set_analysis(&tx, &record.session_id, record.analysis)?;

        tx.commit().context("Failed to commit turn")?;

        tracing::debug!("Committed turn pair to session {}", record.session_id);
        Ok(())
    }

    /// 세션 수
    pub fn count_sessions(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn insert_session(
    conn: &Connection,
    id: &Uuid,
    client_id: &str,
    title: &str,
    created_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, client_id, title, created_at, last_analysis)
         VALUES (?1, ?2, ?3, ?4, NULL)",
        params![id.to_string(), client_id, title, created_at.to_rfc3339()],
    )
    .context("Failed to insert session")?;
    Ok(())
}

fn insert_message(conn: &Connection, session_id: &Uuid, role: Role, content: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![session_id.to_string(), role.as_str(), content, Utc::now().to_rfc3339()],
    )
    .context("Failed to insert message")?;
    Ok(conn.last_insert_rowid())
}

fn set_analysis(conn: &Connection, session_id: &Uuid, snapshot: &AnalysisSnapshot) -> Result<bool> {
    let json = serde_json::to_string(snapshot).context("Failed to serialize analysis")?;
    let rows = conn
        .execute(
            "UPDATE sessions SET last_analysis = ?1 WHERE id = ?2",
            params![json, session_id.to_string()],
        )
        .context("Failed to update analysis")?;
    Ok(rows > 0)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get(0)?;
    let analysis: Option<String> = row.get(4)?;

    Ok(Session {
        id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
        client_id: row.get(1)?,
        title: row.get(2)?,
        created_at: parse_datetime(row.get::<_, String>(3)?),
        last_analysis: analysis.and_then(|json| serde_json::from_str(&json).ok()),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = SessionStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn snapshot(domain: &str) -> AnalysisSnapshot {
        AnalysisSnapshot {
            domain: domain.to_string(),
            risk_level: "medium".to_string(),
            keywords: vec!["超速".to_string()],
        }
    }

    #[test]
    fn test_create_and_list_sessions() {
        let (_dir, store) = create_test_store();

        let first = store.create_session("client-a").unwrap();
        let second = store.create_session("client-a").unwrap();
        store.create_session("client-b").unwrap();

        assert_eq!(first.title, DEFAULT_SESSION_TITLE);

        let list = store.list_sessions("client-a").unwrap();
        assert_eq!(list.len(), 2);
        // 최신순
        assert_eq!(list[0].id, second.id);
        assert_eq!(list[1].id, first.id);
    }

    #[test]
    fn test_append_turns_keep_order() {
        let (_dir, store) = create_test_store();
        let session = store.create_session("c").unwrap();

        store.append_turn(&session.id, Role::User, "闖紅燈罰多少？").unwrap();
        store.append_turn(&session.id, Role::Assistant, "罰鍰 1800 元").unwrap();

        let detail = store.get_session(&session.id).unwrap();
        assert_eq!(detail.turns.len(), 2);
        assert_eq!(detail.turns[0].role, Role::User);
        assert_eq!(detail.turns[1].role, Role::Assistant);
        assert!(detail.analysis.is_none());
    }

    #[test]
    fn test_update_analysis() {
        let (_dir, store) = create_test_store();
        let session = store.create_session("c").unwrap();

        assert!(store.update_analysis(&session.id, &snapshot("traffic")).unwrap());
        let detail = store.get_session(&session.id).unwrap();
        assert_eq!(detail.analysis, Some(snapshot("traffic")));

        assert!(!store.update_analysis(&Uuid::new_v4(), &snapshot("x")).unwrap());
    }

    #[test]
    fn test_recent_turns_window() {
        let (_dir, store) = create_test_store();
        let session = store.create_session("c").unwrap();

        for i in 0..12 {
            store.append_turn(&session.id, Role::User, &format!("q{}", i)).unwrap();
        }

        let recent = store.recent_turns(&session.id, 10).unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "q2");
        assert_eq!(recent[9].content, "q11");
    }

    #[test]
    fn test_commit_turn_creates_session() {
        let (_dir, store) = create_test_store();
        let id = Uuid::new_v4();
        let analysis = snapshot("traffic");

        store
            .commit_turn(&TurnRecord {
                session_id: id,
                client_id: "c",
                title: "超速罰多少",
                user: "超速罰多少",
                assistant: "答覆",
                analysis: &analysis,
            })
            .unwrap();

        let session = store.session(&id).unwrap().unwrap();
        assert_eq!(session.title, "超速罰多少");
        assert_eq!(session.last_analysis, Some(analysis));
        assert_eq!(store.get_session(&id).unwrap().turns.len(), 2);
    }

    #[test]
    fn test_commit_turn_rolls_back_on_failure() {
        let (dir, store) = create_test_store();
        let session = store.create_session("c").unwrap();

        // 다른 커넥션에서 messages 테이블을 깨뜨림
        let other = Connection::open(dir.path().join("test.db")).unwrap();
        other.execute_batch("DROP TABLE messages;").unwrap();

        let analysis = snapshot("traffic");
        let result = store.commit_turn(&TurnRecord {
            session_id: session.id,
            client_id: "c",
            title: "t",
            user: "q",
            assistant: "a",
            analysis: &analysis,
        });
        assert!(result.is_err());

        let reloaded = store.session(&session.id).unwrap().unwrap();
        assert!(reloaded.last_analysis.is_none());
    }

    #[test]
    fn test_delete_session_cascades() {
        let (_dir, store) = create_test_store();
        let session = store.create_session("c").unwrap();
        store.append_turn(&session.id, Role::User, "q").unwrap();
        store.update_analysis(&session.id, &snapshot("x")).unwrap();

        assert!(store.delete_session(&session.id).unwrap());
        assert!(!store.delete_session(&session.id).unwrap());

        let detail = store.get_session(&session.id).unwrap();
        assert!(detail.turns.is_empty());
        assert!(detail.analysis.is_none());
        assert_eq!(store.count_sessions().unwrap(), 0);
    }

    #[test]
    fn test_analysis_defaults_fill_missing_fields() {
        let parsed: AnalysisSnapshot = serde_json::from_str(r#"{"domain": "刑法"}"#).unwrap();
        assert_eq!(parsed.domain, "刑法");
        assert_eq!(parsed.risk_level, "unknown");
        assert!(parsed.keywords.is_empty());
    }
}

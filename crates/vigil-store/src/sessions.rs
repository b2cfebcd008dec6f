use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use vigil_core::SessionToken;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Login session cached at sign-in, keyed by the token in the session cookie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub username: String,
    /// Client address observed at login.
    pub ip: String,
    /// `User-Agent` observed at login.
    pub user_agent: String,
}

impl SessionRecord {
    pub fn new(
        username: impl Into<String>,
        ip: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, token: &SessionToken) -> Result<Option<SessionRecord>, StoreError>;
}

/// Process-local session cache.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: DashMap<SessionToken, SessionRecord>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: SessionToken, record: SessionRecord) {
        let _ = self.sessions.insert(token, record);
    }

    pub fn remove(&self, token: &SessionToken) -> bool {
        self.sessions.remove(token).is_some()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, token: &SessionToken) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.get(token).map(|r| r.value().clone()))
    }
}

pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a login session. Returns the token to hand to the client.
    #[instrument(skip(self, record), fields(username = %record.username))]
    pub fn create(&self, record: &SessionRecord) -> Result<SessionToken, StoreError> {
        let token = SessionToken::new();
        self.insert(&token, record)?;
        Ok(token)
    }

    /// Record a login session under a known token.
    pub fn insert(&self, token: &SessionToken, record: &SessionRecord) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions (token, username, ip, user_agent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    token.as_str(),
                    record.username,
                    record.ip,
                    record.user_agent,
                    now
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("session token {token} exists")));
            }
            Ok(())
        })
    }

    pub fn delete(&self, token: &SessionToken) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE token = ?1", [token.as_str()])?;
            Ok(n > 0)
        })
    }

    fn lookup(db: &Database, token: &SessionToken) -> Result<Option<SessionRecord>, StoreError> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, ip, user_agent FROM sessions WHERE token = ?1",
            )?;
            let row = stmt
                .query_row([token.as_str()], |row| {
                    Ok((
                        row_helpers::get::<String>(row, 0, "sessions", "username"),
                        row_helpers::get::<String>(row, 1, "sessions", "ip"),
                        row_helpers::get::<String>(row, 2, "sessions", "user_agent"),
                    ))
                })
                .optional()?;
            match row {
                None => Ok(None),
                Some((username, ip, user_agent)) => Ok(Some(SessionRecord {
                    username: username?,
                    ip: ip?,
                    user_agent: user_agent?,
                })),
            }
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, token: &SessionToken) -> Result<Option<SessionRecord>, StoreError> {
        let db = self.db.clone();
        let token = token.clone();
        tokio::task::spawn_blocking(move || Self::lookup(&db, &token))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

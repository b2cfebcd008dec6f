use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};

use vigil_core::ClassificationLabel;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// The slice of a platform user record the relay reads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Highest level this user may view. `None` when never assigned.
    pub classification: Option<ClassificationLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl UserRecord {
    pub fn new(username: impl Into<String>, classification: impl Into<ClassificationLabel>) -> Self {
        Self {
            username: username.into(),
            classification: Some(classification.into()),
            name: None,
            email: None,
            is_active: true,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;
}

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserRecord>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        let _ = self.users.insert(user.username.clone(), user);
    }

    pub fn remove(&self, username: &str) -> bool {
        self.users.remove(username).is_some()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(username).map(|u| u.value().clone()))
    }
}

pub struct SqliteUserStore {
    db: Database,
}

impl SqliteUserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a user.
    pub fn upsert(&self, user: &UserRecord) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO users (username, classification, name, email, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(username) DO UPDATE SET
                     classification = excluded.classification,
                     name = excluded.name,
                     email = excluded.email,
                     is_active = excluded.is_active",
                rusqlite::params![
                    user.username,
                    user.classification.as_ref().map(ClassificationLabel::as_str),
                    user.name,
                    user.email,
                    user.is_active,
                    now
                ],
            )?;
            Ok(())
        })
    }

    pub fn delete(&self, username: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE username = ?1", [username])?;
            Ok(n > 0)
        })
    }

    fn lookup(db: &Database, username: &str) -> Result<Option<UserRecord>, StoreError> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, classification, name, email, is_active
                 FROM users WHERE username = ?1",
            )?;
            let row = stmt
                .query_row([username], |row| Ok(read_user(row)))
                .optional()?;
            row.transpose()
        })
    }
}

fn read_user(row: &rusqlite::Row<'_>) -> Result<UserRecord, StoreError> {
    let classification: Option<String> =
        row_helpers::get_opt(row, 1, "users", "classification")?;
    Ok(UserRecord {
        username: row_helpers::get(row, 0, "users", "username")?,
        classification: classification.map(ClassificationLabel::new),
        name: row_helpers::get_opt(row, 2, "users", "name")?,
        email: row_helpers::get_opt(row, 3, "users", "email")?,
        is_active: row_helpers::get(row, 4, "users", "is_active")?,
    })
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn get_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let db = self.db.clone();
        let username = username.to_owned();
        tokio::task::spawn_blocking(move || Self::lookup(&db, &username))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

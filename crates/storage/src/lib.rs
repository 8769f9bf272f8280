use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use uuid::Uuid;

use shared::domain::{AccountStatus, TransitionId, UserId};

mod tree;

pub use tree::{ItemEdits, ItemNode, NewItem, StoredItem};

/// Typed failures for operations whose outcome the caller must branch on.
/// Structural tree errors leave the store untouched: every mutation runs in
/// a single transaction that rolls back on the error path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("item has no preceding sibling to indent under")]
    NoPrecedingSibling,
    #[error("item is already at root level")]
    NoParent,
    #[error("item is already at the boundary of its sibling group")]
    AtBoundary,
    #[error("operation would exceed the maximum nesting depth of {max}")]
    InvalidDepth { max: u32 },
    #[error("concurrent modification detected, retry against fresh state")]
    Conflict,
    #[error("database error: {0}")]
    Db(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            StoreError::Conflict
        } else {
            StoreError::Db(err)
        }
    }
}

// SQLITE_BUSY / SQLITE_LOCKED and their extended codes; a losing writer
// surfaces as Conflict so the caller can re-read and retry.
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("5") | Some("6") | Some("261") | Some("517"))
        }
        _ => false,
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub user_id: UserId,
    pub username: String,
    pub account_status: AccountStatus,
}

#[derive(Debug, Clone)]
pub struct StoredTransition {
    pub transition_id: TransitionId,
    pub name: String,
    pub owner_user_id: UserId,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub entry_id: i64,
    pub correlation_id: Uuid,
    pub actor_user_id: UserId,
    pub action: String,
    pub subject: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId, StoreError> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn user_by_id(&self, user_id: UserId) -> Result<Option<StoredUser>, StoreError> {
        let row = sqlx::query("SELECT id, username, account_status FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| StoredUser {
            user_id: UserId(r.get::<i64, _>(0)),
            username: r.get::<String, _>(1),
            // The schema CHECK keeps this total; an out-of-band value still
            // lands on the most restrictive status.
            account_status: AccountStatus::parse(r.get::<String, _>(2).as_str())
                .unwrap_or(AccountStatus::Locked),
        }))
    }

    /// Administrative account-status change. The status update and its audit
    /// record commit together or not at all.
    pub async fn set_account_status(
        &self,
        target: UserId,
        status: AccountStatus,
        actor: UserId,
        reason: &str,
    ) -> Result<AuditEntry, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET account_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(target.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(StoreError::NotFound("user"));
        }

        let correlation_id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO audit_log (correlation_id, actor_user_id, action, subject, detail)
             VALUES (?, ?, 'set_account_status', ?, ?)
             RETURNING id, created_at",
        )
        .bind(correlation_id.to_string())
        .bind(actor.0)
        .bind(format!("user:{}", target.0))
        .bind(format!("status={} reason={reason}", status.as_str()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let entry = AuditEntry {
            entry_id: row.get::<i64, _>(0),
            correlation_id,
            actor_user_id: actor,
            action: "set_account_status".to_string(),
            subject: format!("user:{}", target.0),
            detail: format!("status={} reason={reason}", status.as_str()),
            created_at: row.get::<DateTime<Utc>, _>(1),
        };
        tracing::info!(
            correlation_id = %entry.correlation_id,
            actor = actor.0,
            target = target.0,
            status = status.as_str(),
            "account status changed"
        );
        Ok(entry)
    }

    pub async fn list_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, correlation_id, actor_user_id, action, subject, detail, created_at
             FROM audit_log
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AuditEntry {
                entry_id: r.get::<i64, _>(0),
                correlation_id: Uuid::parse_str(r.get::<String, _>(1).as_str())
                    .unwrap_or_default(),
                actor_user_id: UserId(r.get::<i64, _>(2)),
                action: r.get::<String, _>(3),
                subject: r.get::<String, _>(4),
                detail: r.get::<String, _>(5),
                created_at: r.get::<DateTime<Utc>, _>(6),
            })
            .collect())
    }

    pub async fn create_transition(
        &self,
        name: &str,
        owner: UserId,
    ) -> Result<TransitionId, StoreError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(owner.0)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound("user"));
        }

        let rec =
            sqlx::query("INSERT INTO transitions (name, owner_user_id) VALUES (?, ?) RETURNING id")
                .bind(name)
                .bind(owner.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(TransitionId(rec.get::<i64, _>(0)))
    }

    pub async fn list_transitions_for_owner(
        &self,
        owner: UserId,
    ) -> Result<Vec<StoredTransition>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, owner_user_id FROM transitions WHERE owner_user_id = ? ORDER BY id",
        )
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredTransition {
                transition_id: TransitionId(r.get::<i64, _>(0)),
                name: r.get::<String, _>(1),
                owner_user_id: UserId(r.get::<i64, _>(2)),
            })
            .collect())
    }

    pub async fn owner_for_transition(
        &self,
        transition_id: TransitionId,
    ) -> Result<Option<UserId>, StoreError> {
        let row = sqlx::query("SELECT owner_user_id FROM transitions WHERE id = ?")
            .bind(transition_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserId(r.get::<i64, _>(0))))
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

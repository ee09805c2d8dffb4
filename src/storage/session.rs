//! Session persistence.
//!
//! The session row holds the token, its issue time and the raw profile JSON.
//! The profile is kept as text so a record written by an incompatible
//! version can be detected and discarded by the session store.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use secrecy::{ExposeSecret, SecretString};

use crate::error::AppError;
use crate::storage::database::{open_connection, Database};

/// Session record as stored.
#[derive(Clone)]
pub struct PersistedSession {
    pub token: SecretString,
    pub issued_at: DateTime<Utc>,
    pub profile_json: String,
}

impl std::fmt::Debug for PersistedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedSession")
            .field("token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionVault Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Durable storage for the single active session.
pub trait SessionVault: Send + Sync {
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PersistedSession>, AppError>> + Send + '_>>;

    fn save<'a>(
        &'a self,
        session: &'a PersistedSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Removes the stored session. Idempotent.
    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + '_>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Vault
// ─────────────────────────────────────────────────────────────────────────────

/// Vault backed by the `session` table.
#[derive(Debug, Clone)]
pub struct SqliteVault {
    db: Arc<Database>,
}

impl SqliteVault {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn load_session(&self) -> Result<Option<PersistedSession>, AppError> {
        let db_path = self.db.db_path().clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;

            let row: Option<(String, i64, String)> = conn
                .query_row(
                    "SELECT token, issued_at, profile_json FROM session WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(|e| AppError::Internal(format!("Failed to load session: {e}")))?;

            Ok::<_, AppError>(row.map(|(token, issued_at, profile_json)| PersistedSession {
                token: SecretString::from(token),
                issued_at: DateTime::from_timestamp_millis(issued_at).unwrap_or_default(),
                profile_json,
            }))
        })
        .await
        .map_err(|e| AppError::Internal(format!("Load session task failed: {e}")))?
    }

    async fn save_session(&self, session: &PersistedSession) -> Result<(), AppError> {
        let db_path = self.db.db_path().clone();
        let token = session.token.expose_secret().to_string();
        let issued_at = session.issued_at.timestamp_millis();
        let profile_json = session.profile_json.clone();
        let updated_at = Utc::now().timestamp_millis();

        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;

            conn.execute(
                r#"
                INSERT INTO session (id, token, issued_at, profile_json, updated_at)
                VALUES (1, ?1, ?2, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET
                    token = excluded.token,
                    issued_at = excluded.issued_at,
                    profile_json = excluded.profile_json,
                    updated_at = excluded.updated_at
                "#,
                rusqlite::params![token, issued_at, profile_json, updated_at],
            )
            .map_err(|e| AppError::Internal(format!("Failed to save session: {e}")))?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Save session task failed: {e}")))??;

        Ok(())
    }

    async fn clear_session(&self) -> Result<(), AppError> {
        let db_path = self.db.db_path().clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&db_path)?;

            conn.execute("DELETE FROM session", [])
                .map_err(|e| AppError::Internal(format!("Failed to clear session: {e}")))?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Clear session task failed: {e}")))??;

        Ok(())
    }
}

impl SessionVault for SqliteVault {
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PersistedSession>, AppError>> + Send + '_>>
    {
        Box::pin(self.load_session())
    }

    fn save<'a>(
        &'a self,
        session: &'a PersistedSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.save_session(session))
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + '_>> {
        Box::pin(self.clear_session())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory Vault
// ─────────────────────────────────────────────────────────────────────────────

/// Process-local vault, used for ephemeral sessions and in tests.
#[derive(Debug, Default)]
pub struct MemoryVault {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vault pre-populated with a raw record, profile JSON unchecked.
    pub fn with_raw(token: &str, profile_json: &str) -> Self {
        Self {
            slot: Mutex::new(Some(PersistedSession {
                token: SecretString::from(token.to_string()),
                issued_at: Utc::now(),
                profile_json: profile_json.to_string(),
            })),
        }
    }

    pub fn snapshot(&self) -> Option<PersistedSession> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_none()
    }
}

impl SessionVault for MemoryVault {
    fn load(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<PersistedSession>, AppError>> + Send + '_>>
    {
        let stored = self.snapshot();
        Box::pin(async move { Ok(stored) })
    }

    fn save<'a>(
        &'a self,
        session: &'a PersistedSession,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + '_>> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Box::pin(async { Ok(()) })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Local brief cache.
//!
//! Keeps the last known copy of each brief so `briefs` and `watch` can show
//! something before the first fetch completes. The server stays
//! authoritative; rows are overwritten by every successful fetch.

use chrono::Utc;

use crate::error::AppError;
use crate::jobs::{Job, JobId, JobStatus};
use crate::storage::database::{open_connection, Database};

/// Cached brief with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedBrief {
    pub job: Job,
    pub cached_at: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Inserts or replaces the given briefs in one transaction.
pub async fn upsert_briefs(db: &Database, jobs: &[Job]) -> Result<(), AppError> {
    if jobs.is_empty() {
        return Ok(());
    }

    let db_path = db.db_path().clone();
    let updated_at = Utc::now().timestamp_millis();
    let rows = jobs
        .iter()
        .map(|job| {
            serde_json::to_string(job)
                .map(|json| {
                    (
                        job.id.as_str().to_string(),
                        job.user_id.clone(),
                        job.status.as_str(),
                        json,
                        job.created_at.timestamp_millis(),
                    )
                })
                .map_err(|e| AppError::Internal(format!("Failed to encode brief: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    tokio::task::spawn_blocking(move || {
        let mut conn = open_connection(&db_path)?;

        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {e}")))?;

        for (id, user_id, status, json, created_at) in &rows {
            tx.execute(
                r#"
                INSERT INTO brief_cache (id, user_id, status, json, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    json = excluded.json,
                    updated_at = excluded.updated_at
                "#,
                rusqlite::params![id, user_id, status, json, created_at, updated_at],
            )
            .map_err(|e| AppError::Internal(format!("Failed to cache brief: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit brief cache: {e}")))?;

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Cache briefs task failed: {e}")))??;

    Ok(())
}

/// Lists a user's cached briefs, newest first.
///
/// Rows that no longer decode (for instance after a status was removed from
/// the wire format) are skipped.
pub async fn list_briefs(db: &Database, user_id: &str) -> Result<Vec<CachedBrief>, AppError> {
    let db_path = db.db_path().clone();
    let user_id = user_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&db_path)?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT json, updated_at
                FROM brief_cache
                WHERE user_id = ?1
                ORDER BY created_at DESC
                "#,
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([&user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| AppError::Internal(format!("Failed to query brief cache: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect briefs: {e}")))?;

        let briefs = rows
            .into_iter()
            .filter_map(|(json, cached_at)| {
                serde_json::from_str::<Job>(&json)
                    .ok()
                    .map(|job| CachedBrief { job, cached_at })
            })
            .collect();

        Ok::<_, AppError>(briefs)
    })
    .await
    .map_err(|e| AppError::Internal(format!("List briefs task failed: {e}")))?
}

/// Counts a user's cached briefs in the given status.
pub async fn count_by_status(
    db: &Database,
    user_id: &str,
    status: JobStatus,
) -> Result<i64, AppError> {
    let db_path = db.db_path().clone();
    let user_id = user_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&db_path)?;

        conn.query_row(
            "SELECT COUNT(*) FROM brief_cache WHERE user_id = ?1 AND status = ?2",
            rusqlite::params![user_id, status.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| AppError::Internal(format!("Failed to count briefs: {e}")))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Count briefs task failed: {e}")))?
}

/// Removes one brief from the cache. Idempotent.
pub async fn remove_brief(db: &Database, id: &JobId) -> Result<(), AppError> {
    let db_path = db.db_path().clone();
    let id = id.as_str().to_string();

    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&db_path)?;

        conn.execute("DELETE FROM brief_cache WHERE id = ?1", [&id])
            .map_err(|e| AppError::Internal(format!("Failed to remove brief: {e}")))?;

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Remove brief task failed: {e}")))??;

    Ok(())
}

/// Drops every cached brief. Called on sign-out.
pub async fn clear_briefs(db: &Database) -> Result<(), AppError> {
    let db_path = db.db_path().clone();

    tokio::task::spawn_blocking(move || {
        let conn = open_connection(&db_path)?;

        conn.execute("DELETE FROM brief_cache", [])
            .map_err(|e| AppError::Internal(format!("Failed to clear brief cache: {e}")))?;

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Clear briefs task failed: {e}")))??;

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::tests::sample_job;
    use crate::storage::database::tests::test_db_path;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn upsert_then_list_newest_first() {
        let (_temp_dir, db_path) = test_db_path();
        let db = Database::init(db_path).await.unwrap();
        let now = Utc::now();

        let older = sample_job("old", JobStatus::Completed, now - Duration::hours(1));
        let newer = sample_job("new", JobStatus::Processing, now);
        upsert_briefs(&db, &[older, newer]).await.unwrap();

        let cached = list_briefs(&db, "uid-1").await.unwrap();
        let ids: Vec<_> = cached.iter().map(|c| c.job.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert!(list_briefs(&db, "someone-else").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_overwrites_status() {
        let (_temp_dir, db_path) = test_db_path();
        let db = Database::init(db_path).await.unwrap();
        let mut job = sample_job("b1", JobStatus::Processing, Utc::now());

        upsert_briefs(&db, std::slice::from_ref(&job)).await.unwrap();
        job.status = JobStatus::Completed;
        upsert_briefs(&db, std::slice::from_ref(&job)).await.unwrap();

        let cached = list_briefs(&db, "uid-1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].job.status, JobStatus::Completed);
        assert_eq!(
            count_by_status(&db, "uid-1", JobStatus::Completed).await.unwrap(),
            1
        );
        assert_eq!(
            count_by_status(&db, "uid-1", JobStatus::Processing).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn undecodable_rows_are_skipped() {
        let (_temp_dir, db_path) = test_db_path();
        let db = Database::init(db_path.clone()).await.unwrap();
        upsert_briefs(&db, &[sample_job("ok", JobStatus::Queued, Utc::now())])
            .await
            .unwrap();

        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.execute(
            "INSERT INTO brief_cache (id, user_id, status, json, created_at, updated_at) \
             VALUES ('bad', 'uid-1', 'queued', '{\"id\":1}', 0, 0)",
            [],
        )
        .unwrap();

        let cached = list_briefs(&db, "uid-1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].job.id.as_str(), "ok");
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let (_temp_dir, db_path) = test_db_path();
        let db = Database::init(db_path).await.unwrap();
        let now = Utc::now();
        upsert_briefs(
            &db,
            &[
                sample_job("a", JobStatus::Failed, now),
                sample_job("b", JobStatus::Queued, now),
            ],
        )
        .await
        .unwrap();

        remove_brief(&db, &JobId::from("a")).await.unwrap();
        remove_brief(&db, &JobId::from("a")).await.unwrap();
        assert_eq!(list_briefs(&db, "uid-1").await.unwrap().len(), 1);

        clear_briefs(&db).await.unwrap();
        assert!(list_briefs(&db, "uid-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_upsert_is_noop() {
        let (_temp_dir, db_path) = test_db_path();
        let db = Database::init(db_path).await.unwrap();
        upsert_briefs(&db, &[]).await.unwrap();
    }
}

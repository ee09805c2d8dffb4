//! Brief endpoints: create, list, fetch, retry, asset refresh and delete.

use std::future::Future;
use std::pin::Pin;

use reqwest::Method;
use tracing::info;

use crate::api::client::{ApiClient, Auth};
use crate::error::AppError;
use crate::jobs::{BriefPayload, Job, JobId};

/// Default page size of the brief list (the server caps it at 100).
pub const DEFAULT_LIST_LIMIT: u32 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// BriefOps
// ─────────────────────────────────────────────────────────────────────────────

/// Brief operations, allowing test fakes for the tracker, the submission
/// gate and the retry controller.
pub trait BriefOps: Send + Sync {
    /// Creates a brief. The returned job is non-terminal.
    fn create_brief<'a>(
        &'a self,
        payload: &'a BriefPayload,
    ) -> Pin<Box<dyn Future<Output = Result<Job, AppError>> + Send + 'a>>;

    /// Fetches one brief.
    fn get_brief<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<Job, AppError>> + Send + 'a>>;

    /// Lists the user's most recent briefs.
    fn list_briefs(
        &self,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Job>, AppError>> + Send + '_>>;

    /// Re-submits a failed brief. The server answers before processing
    /// restarts, without the updated brief.
    fn retry_brief<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;

    /// Re-issues expiring asset links of a brief.
    fn refresh_assets<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<Job, AppError>> + Send + 'a>>;

    /// Deletes a brief.
    fn delete_brief<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

fn brief_path(id: &JobId) -> String {
    format!("/api/briefs/{}", id.as_str())
}

impl ApiClient {
    pub async fn create_brief(&self, payload: &BriefPayload) -> Result<Job, AppError> {
        let job: Job = self
            .send_for_data(Method::POST, "/api/briefs", Some(payload), Auth::Bearer)
            .await?;
        info!("[API] Brief {} created ({})", job.id.short(), job.status);
        Ok(job)
    }

    pub async fn get_brief(&self, id: &JobId) -> Result<Job, AppError> {
        self.send_for_data::<(), _>(Method::GET, &brief_path(id), None, Auth::Bearer)
            .await
    }

    pub async fn list_briefs(&self, limit: u32) -> Result<Vec<Job>, AppError> {
        let path = format!("/api/briefs?limit={}", limit.clamp(1, 100));
        let envelope = self
            .send::<(), Vec<Job>>(Method::GET, &path, None, Auth::Bearer)
            .await?;
        Ok(envelope.data.unwrap_or_default())
    }

    pub async fn retry_brief(&self, id: &JobId) -> Result<(), AppError> {
        let path = format!("{}/retry", brief_path(id));
        self.send::<(), serde_json::Value>(Method::POST, &path, None, Auth::Bearer)
            .await?;
        info!("[API] Retry accepted for brief {}", id.short());
        Ok(())
    }

    pub async fn refresh_assets(&self, id: &JobId) -> Result<Job, AppError> {
        let path = format!("{}/refresh-urls", brief_path(id));
        self.send_for_data::<(), _>(Method::POST, &path, None, Auth::Bearer)
            .await
    }

    pub async fn delete_brief(&self, id: &JobId) -> Result<(), AppError> {
        self.send::<(), serde_json::Value>(Method::DELETE, &brief_path(id), None, Auth::Bearer)
            .await?;
        Ok(())
    }
}

impl BriefOps for ApiClient {
    fn create_brief<'a>(
        &'a self,
        payload: &'a BriefPayload,
    ) -> Pin<Box<dyn Future<Output = Result<Job, AppError>> + Send + 'a>> {
        Box::pin(ApiClient::create_brief(self, payload))
    }

    fn get_brief<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<Job, AppError>> + Send + 'a>> {
        Box::pin(ApiClient::get_brief(self, id))
    }

    fn list_briefs(
        &self,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Job>, AppError>> + Send + '_>> {
        Box::pin(ApiClient::list_briefs(self, limit))
    }

    fn retry_brief<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(ApiClient::retry_brief(self, id))
    }

    fn refresh_assets<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<Job, AppError>> + Send + 'a>> {
        Box::pin(ApiClient::refresh_assets(self, id))
    }

    fn delete_brief<'a>(
        &'a self,
        id: &'a JobId,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(ApiClient::delete_brief(self, id))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Retry of failed briefs with a per-brief in-flight lock.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::api::BriefOps;
use crate::error::AppError;
use crate::jobs::{JobId, JobStatus, JobTracker};
use crate::session::SessionStore;

struct Inner {
    briefs: Arc<dyn BriefOps>,
    session: SessionStore,
    tracker: JobTracker,
    retrying: Mutex<HashSet<JobId>>,
}

/// Re-submits failed briefs. A brief already being retried is rejected
/// locally.
#[derive(Clone)]
pub struct RetryController {
    inner: Arc<Inner>,
}

/// Holds a brief's retry slot and frees it when dropped.
struct RetrySlot<'a> {
    controller: &'a RetryController,
    id: JobId,
}

impl Drop for RetrySlot<'_> {
    fn drop(&mut self) {
        self.controller.lock().remove(&self.id);
    }
}

impl RetryController {
    pub fn new(briefs: Arc<dyn BriefOps>, session: SessionStore, tracker: JobTracker) -> Self {
        Self {
            inner: Arc::new(Inner {
                briefs,
                session,
                tracker,
                retrying: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<JobId>> {
        self.inner.retrying.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_retrying(&self, id: &JobId) -> bool {
        self.lock().contains(id)
    }

    fn claim(&self, id: &JobId) -> Result<RetrySlot<'_>, AppError> {
        if !self.lock().insert(id.clone()) {
            debug!("[RETRY] Brief {} already retrying", id.short());
            return Err(AppError::RetryInFlight {
                job_id: id.to_string(),
            });
        }
        Ok(RetrySlot {
            controller: self,
            id: id.clone(),
        })
    }

    /// Asks the server to process a failed brief again.
    ///
    /// On acceptance the brief moves to `processing` and polling resumes.
    /// On failure the status is left unchanged and the error comes back as
    /// [`AppError::RetryFailed`], unless the session was refused.
    pub async fn retry(&self, id: &JobId) -> Result<(), AppError> {
        if !self.inner.session.is_authenticated() {
            return Err(AppError::NotAuthenticated);
        }
        if let Some(job) = self.inner.tracker.job(id) {
            if job.status != JobStatus::Failed {
                return Err(AppError::InvalidTransition {
                    job_id: id.to_string(),
                    from: job.status,
                    to: JobStatus::Processing,
                });
            }
        }

        let _slot = self.claim(id)?;
        info!("[RETRY] Retrying brief {}", id.short());

        let result = self.inner.briefs.retry_brief(id).await;
        if let Err(e) = self.inner.session.intercept(result).await {
            if e.is_session_invalid() {
                return Err(e);
            }
            warn!("[RETRY] Brief {} retry failed: {:?}", id.short(), e.category());
            return Err(AppError::RetryFailed {
                job_id: id.to_string(),
                message: e.to_presentation().message,
            });
        }

        self.readmit(id).await;
        info!("[RETRY] Brief {} accepted for retry", id.short());
        Ok(())
    }

    /// Puts an accepted brief back into the tracker as `processing`.
    async fn readmit(&self, id: &JobId) {
        let tracker = &self.inner.tracker;
        if tracker.job(id).is_some() {
            if let Err(e) = tracker.mark_retrying(id).await {
                warn!(
                    "[RETRY] Brief {} accepted by the server but kept its local status: {}",
                    id.short(),
                    e
                );
            }
            return;
        }

        let result = self.inner.briefs.get_brief(id).await;
        match self.inner.session.intercept(result).await {
            Ok(job) => tracker.track(job),
            Err(e) => warn!(
                "[RETRY] Could not fetch retried brief {}: {:?}",
                id.short(),
                e.category()
            ),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

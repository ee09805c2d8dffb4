//! Submission gate: turns an armed wizard into exactly one create request.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::api::BriefOps;
use crate::error::AppError;
use crate::jobs::{JobId, JobTracker};
use crate::session::SessionStore;
use crate::wizard::{FormWizard, SubmitBlock};

/// Where the gate is in its current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPhase {
    Idle,
    Submitting,
    /// The last attempt finished. A new attempt may start.
    Resolved,
}

struct Inner {
    briefs: Arc<dyn BriefOps>,
    session: SessionStore,
    tracker: JobTracker,
    phase: Mutex<SubmitPhase>,
}

/// Checks credits and wizard state, then submits. Never retries.
#[derive(Clone)]
pub struct JobSubmissionGate {
    inner: Arc<Inner>,
}

/// Marks the attempt resolved when dropped, including on cancellation.
struct Attempt<'a> {
    gate: &'a JobSubmissionGate,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        *self.gate.lock() = SubmitPhase::Resolved;
    }
}

impl JobSubmissionGate {
    pub fn new(briefs: Arc<dyn BriefOps>, session: SessionStore, tracker: JobTracker) -> Self {
        Self {
            inner: Arc::new(Inner {
                briefs,
                session,
                tracker,
                phase: Mutex::new(SubmitPhase::Idle),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubmitPhase> {
        self.inner.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> SubmitPhase {
        *self.lock()
    }

    fn begin(&self) -> Result<Attempt<'_>, SubmitBlock> {
        let mut phase = self.lock();
        if *phase == SubmitPhase::Submitting {
            return Err(SubmitBlock::InFlight);
        }
        *phase = SubmitPhase::Submitting;
        Ok(Attempt { gate: self })
    }

    /// Submits the wizard's draft.
    ///
    /// Rejected without a network call when the user is signed out, has no
    /// credits, the wizard is not armed on its last step, or another
    /// submission is still in flight. On success the brief is tracked, one
    /// credit is debited locally and the draft is cleared. The wizard's
    /// submit flag is cleared in every case.
    pub async fn submit(&self, wizard: &mut FormWizard) -> Result<JobId, AppError> {
        let result = self.submit_inner(wizard).await;
        wizard.resolve_submit();
        result
    }

    async fn submit_inner(&self, wizard: &mut FormWizard) -> Result<JobId, AppError> {
        let session = &self.inner.session;

        match session.credit_balance() {
            None => return Err(AppError::NotAuthenticated),
            Some(0) => {
                warn!("[SUBMIT] Blocked: no credits left");
                return Err(AppError::InsufficientCredits { balance: 0 });
            }
            Some(_) => {}
        }

        let payload = wizard
            .take_submission()
            .map_err(AppError::SubmissionBlocked)?;
        let _attempt = self.begin().map_err(AppError::SubmissionBlocked)?;

        info!("[SUBMIT] Creating brief for '{}'", payload.company_name);
        let result = self.inner.briefs.create_brief(&payload).await;

        match session.intercept(result).await {
            Ok(job) => {
                let id = job.id.clone();
                self.inner.tracker.track(job);
                session.debit_credit().await;
                wizard.reset();
                info!("[SUBMIT] Brief {} accepted", id.short());
                Ok(id)
            }
            Err(AppError::InsufficientCredits { .. }) => {
                warn!("[SUBMIT] Server reported no credits left");
                session.set_credit_balance(0).await;
                Err(AppError::InsufficientCredits { balance: 0 })
            }
            Err(e) => {
                warn!("[SUBMIT] Submission failed: {:?}", e.category());
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::tracker::tests::{tracker_with, FakeBriefs};
    use crate::jobs::{JobStatus, TrackerEvent};
    use crate::session::test_support::signed_in_store;
    use crate::wizard::tests::filled_wizard;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn gate_with(credits: u32, briefs: Arc<FakeBriefs>) -> (JobSubmissionGate, SessionStore, JobTracker) {
        let (session, _auth) = signed_in_store(credits).await;
        let tracker = tracker_with(briefs.clone(), session.clone());
        let gate = JobSubmissionGate::new(briefs, session.clone(), tracker.clone());
        (gate, session, tracker)
    }

    fn armed_wizard() -> FormWizard {
        let mut wizard = filled_wizard();
        wizard.request_submit().unwrap();
        wizard
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_submission_tracks_debits_and_resets() {
        let briefs = Arc::new(FakeBriefs::new());
        let (gate, session, tracker) = gate_with(3, briefs.clone()).await;
        let mut sub = tracker.subscribe("dashboard");
        let mut wizard = armed_wizard();

        let id = gate.submit(&mut wizard).await.unwrap();

        assert_eq!(briefs.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.credit_balance(), Some(2));
        assert_eq!(tracker.job(&id).unwrap().status, JobStatus::Queued);
        assert!(tracker.is_polling());
        assert_eq!(wizard.current_step(), 0);
        assert!(!wizard.is_submit_armed());
        assert_eq!(gate.phase(), SubmitPhase::Resolved);
        assert_eq!(sub.try_recv(), Some(TrackerEvent::Tracked(id.clone())));

        // Scenario A: the next poll observes completion and polling stops.
        briefs.set_status(id.as_str(), JobStatus::Completed);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(tracker.job(&id).unwrap().status, JobStatus::Completed);
        assert!(!tracker.is_polling());
    }

    #[tokio::test]
    async fn zero_credits_blocks_before_any_request() {
        let briefs = Arc::new(FakeBriefs::new());
        let (gate, _session, tracker) = gate_with(0, briefs.clone()).await;
        let mut wizard = armed_wizard();

        let err = gate.submit(&mut wizard).await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientCredits { balance: 0 }));
        assert_eq!(briefs.create_calls.load(Ordering::SeqCst), 0);
        assert!(tracker.jobs().is_empty());
        assert!(!wizard.is_submit_armed());
        assert_eq!(wizard.current_step(), filled_wizard().current_step());
    }

    #[tokio::test]
    async fn zero_credits_wins_over_an_unarmed_wizard() {
        let briefs = Arc::new(FakeBriefs::new());
        let (gate, _session, _tracker) = gate_with(0, briefs.clone()).await;
        let mut wizard = filled_wizard();

        let err = gate.submit(&mut wizard).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientCredits { .. }));
    }

    #[tokio::test]
    async fn unarmed_or_early_wizard_never_calls_the_network() {
        let briefs = Arc::new(FakeBriefs::new());
        let (gate, _session, _tracker) = gate_with(3, briefs.clone()).await;

        let mut unarmed = filled_wizard();
        let err = gate.submit(&mut unarmed).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::SubmissionBlocked(SubmitBlock::NotUserInitiated)
        ));

        let mut early = FormWizard::new();
        let err = gate.submit(&mut early).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::SubmissionBlocked(SubmitBlock::NotTerminalStep { current: 0 })
        ));

        assert_eq!(briefs.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn signed_out_user_cannot_submit() {
        let briefs = Arc::new(FakeBriefs::new());
        let (gate, session, _tracker) = gate_with(3, briefs.clone()).await;
        session
            .sign_out(crate::session::SignOutReason::UserRequested)
            .await
            .unwrap();

        let err = gate.submit(&mut armed_wizard()).await.unwrap_err();
        assert!(matches!(err, AppError::NotAuthenticated));
        assert_eq!(briefs.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rapid_resubmit_creates_one_brief() {
        let briefs = Arc::new(FakeBriefs::new());
        let (gate, _session, tracker) = gate_with(3, briefs.clone()).await;
        let mut wizard = armed_wizard();

        gate.submit(&mut wizard).await.unwrap();
        // The draft is gone, so re-arming fails and so does the second submit.
        assert!(wizard.request_submit().is_err());
        assert!(gate.submit(&mut wizard).await.is_err());

        assert_eq!(briefs.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.jobs().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_submit_is_rejected_while_in_flight() {
        let gate_signal = Arc::new(Notify::new());
        let briefs = Arc::new(FakeBriefs::new().with_create_gate(gate_signal.clone()));
        let (gate, _session, tracker) = gate_with(3, briefs.clone()).await;

        let first = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let mut wizard = armed_wizard();
                gate.submit(&mut wizard).await
            })
        };
        while briefs.create_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(gate.phase(), SubmitPhase::Submitting);

        let mut second = armed_wizard();
        let err = gate.submit(&mut second).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::SubmissionBlocked(SubmitBlock::InFlight)
        ));
        assert!(!second.is_submit_armed());

        gate_signal.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(briefs.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.jobs().len(), 1);
    }

    #[tokio::test]
    async fn server_failure_registers_nothing() {
        let briefs = Arc::new(FakeBriefs::new());
        briefs.fail_next_create(AppError::ServerError { status: 503 });
        let (gate, session, tracker) = gate_with(3, briefs.clone()).await;
        let mut wizard = armed_wizard();

        let err = gate.submit(&mut wizard).await.unwrap_err();

        assert!(matches!(err, AppError::ServerError { status: 503 }));
        assert!(tracker.jobs().is_empty());
        assert_eq!(session.credit_balance(), Some(3));
        // The draft survives for a manual resubmit.
        assert!(wizard.is_on_last_step());
        assert!(!wizard.is_submit_armed());
        assert_eq!(gate.phase(), SubmitPhase::Resolved);
    }

    #[tokio::test]
    async fn server_reported_no_credits_zeroes_the_balance() {
        let briefs = Arc::new(FakeBriefs::new());
        briefs.fail_next_create(AppError::InsufficientCredits { balance: 0 });
        let (gate, session, _tracker) = gate_with(2, briefs.clone()).await;

        let err = gate.submit(&mut armed_wizard()).await.unwrap_err();

        assert!(matches!(err, AppError::InsufficientCredits { balance: 0 }));
        assert_eq!(session.credit_balance(), Some(0));
    }

    #[tokio::test]
    async fn expired_session_during_submit_signs_out() {
        let briefs = Arc::new(FakeBriefs::new());
        briefs.fail_next_create(AppError::SessionExpired);
        let (gate, session, tracker) = gate_with(2, briefs.clone()).await;

        let err = gate.submit(&mut armed_wizard()).await.unwrap_err();

        assert!(err.is_session_invalid());
        assert!(!session.is_authenticated());
        assert!(tracker.jobs().is_empty());
    }
}

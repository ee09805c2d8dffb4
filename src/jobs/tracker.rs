//! Centralized polling scheduler for briefs.
//!
//! One poll loop and one progress ticker serve every consumer. They run only
//! while at least one [`Subscription`] is held, at least one tracked brief is
//! non-terminal and the session is live. Both loops share a cancellation
//! token derived from the session lifetime, so a sign-out stops them before
//! any further fetch is issued.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{BriefOps, DEFAULT_LIST_LIMIT};
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::jobs::progress::{estimate, ProgressEstimate, ProgressReport, DEFAULT_SLA};
use crate::jobs::{DashboardStats, Job, JobId, JobStatus, Transition, TransitionOrigin};
use crate::session::SessionStore;
use crate::storage::{briefs as brief_cache, Database};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Capacity of the event channel. Slow subscribers skip lagged events.
const EVENT_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Settings / Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub poll_interval: Duration,
    pub tick_interval: Duration,
    pub sla: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            sla: DEFAULT_SLA,
        }
    }
}

impl TrackerSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            tick_interval: config.tick_interval(),
            sla: config.sla(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// A brief entered the tracked set.
    Tracked(JobId),
    StatusChanged {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    /// Estimates for every non-terminal brief, once per tick.
    Progress(Vec<ProgressReport>),
    Removed(JobId),
    /// No non-terminal brief remains; polling has stopped.
    Idle,
}

// ─────────────────────────────────────────────────────────────────────────────
// JobTracker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    scopes: HashMap<u64, String>,
    next_scope: u64,
    loops: Option<CancellationToken>,
}

impl State {
    fn has_pending(&self) -> bool {
        self.jobs.values().any(|job| !job.is_terminal())
    }

    fn loops_running(&self) -> bool {
        self.loops.as_ref().is_some_and(|t| !t.is_cancelled())
    }
}

struct Inner {
    briefs: Arc<dyn BriefOps>,
    session: SessionStore,
    settings: TrackerSettings,
    cache: Option<Arc<Database>>,
    state: Mutex<State>,
    events: broadcast::Sender<TrackerEvent>,
    poll_in_flight: AtomicBool,
}

/// Shared handle to the scheduler. Cloning is cheap.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<Inner>,
}

/// Clears the in-flight flag when a poll cycle ends, however it ends.
struct PollGuard<'a>(&'a AtomicBool);

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JobTracker {
    pub fn new(
        briefs: Arc<dyn BriefOps>,
        session: SessionStore,
        settings: TrackerSettings,
        cache: Option<Arc<Database>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                briefs,
                session,
                settings,
                cache,
                state: Mutex::new(State::default()),
                events,
                poll_in_flight: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: TrackerEvent) {
        let _ = self.inner.events.send(event);
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    /// Registers a consumer. Polling runs only while at least one
    /// subscription is alive; dropping the last one stops it.
    pub fn subscribe(&self, scope: &str) -> Subscription {
        let events = self.inner.events.subscribe();
        let id = {
            let mut state = self.lock();
            let id = state.next_scope;
            state.next_scope += 1;
            state.scopes.insert(id, scope.to_string());
            id
        };
        debug!("[TRACKER] Subscribed scope '{}'", scope);
        self.ensure_loops();

        Subscription {
            tracker: self.clone(),
            id,
            scope: scope.to_string(),
            events,
        }
    }

    fn release(&self, id: u64) {
        let stopped = {
            let mut state = self.lock();
            let scope = state.scopes.remove(&id);
            if let Some(scope) = scope {
                debug!("[TRACKER] Released scope '{}'", scope);
            }
            if state.scopes.is_empty() {
                state.loops.take().map(|t| t.cancel()).is_some()
            } else {
                false
            }
        };
        if stopped {
            info!("[TRACKER] Last subscriber gone; polling stopped");
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn job(&self, id: &JobId) -> Option<Job> {
        self.lock().jobs.get(id).cloned()
    }

    /// Tracked briefs, newest first.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// IDs of tracked briefs that are not in a terminal status.
    pub fn pending_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self
            .lock()
            .jobs
            .values()
            .filter(|job| !job.is_terminal())
            .map(|job| job.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn is_polling(&self) -> bool {
        self.lock().loops_running()
    }

    pub fn stats(&self) -> DashboardStats {
        let state = self.lock();
        DashboardStats::from_jobs(state.jobs.values())
    }

    pub fn progress(&self, id: &JobId) -> Option<ProgressEstimate> {
        let state = self.lock();
        state
            .jobs
            .get(id)
            .map(|job| estimate(job.created_at, Utc::now(), self.inner.settings.sla))
    }

    /// Estimates for every non-terminal brief at `now`.
    pub fn progress_reports(&self, now: DateTime<Utc>) -> Vec<ProgressReport> {
        let state = self.lock();
        let mut reports: Vec<ProgressReport> = state
            .jobs
            .values()
            .filter(|job| !job.is_terminal())
            .map(|job| ProgressReport {
                job_id: job.id.clone(),
                estimate: estimate(job.created_at, now, self.inner.settings.sla),
            })
            .collect();
        reports.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        reports
    }

    // ── Tracking ──────────────────────────────────────────────────────────────

    /// Adds a brief, or applies its status to the tracked copy.
    pub fn track(&self, job: Job) {
        self.track_all(vec![job]);
    }

    pub fn track_all(&self, jobs: Vec<Job>) {
        self.admit(jobs, TransitionOrigin::Remote);
    }

    fn admit(&self, jobs: Vec<Job>, origin: TransitionOrigin) {
        for job in jobs {
            let existing = self.lock().jobs.contains_key(&job.id);
            if existing {
                self.apply(job, origin);
                continue;
            }

            let id = job.id.clone();
            self.lock().jobs.insert(id.clone(), job);
            debug!("[TRACKER] Tracking brief {}", id.short());
            self.emit(TrackerEvent::Tracked(id));
        }
        self.ensure_loops();
        self.settle();
    }

    /// Fetches the user's recent briefs and tracks them.
    ///
    /// Settled briefs missing from the listing are dropped. The cache receives
    /// the tracked copies, so it never holds a status the tracker refused.
    pub async fn load(&self) -> Result<Vec<Job>, AppError> {
        let result = self.inner.briefs.list_briefs(DEFAULT_LIST_LIMIT).await;
        let listed = self.inner.session.intercept(result).await?;
        info!("[TRACKER] Loaded {} briefs", listed.len());

        let ids: HashSet<JobId> = listed.iter().map(|job| job.id.clone()).collect();
        self.evict_settled(&ids);
        self.admit(listed, TransitionOrigin::Listing);

        let kept: Vec<Job> = {
            let state = self.lock();
            ids.iter().filter_map(|id| state.jobs.get(id).cloned()).collect()
        };
        self.write_cache(&kept).await;
        Ok(self.jobs())
    }

    /// Tracks the cached briefs of the signed-in user, so non-terminal ones
    /// resume polling after a restart.
    pub async fn restore_from_cache(&self) -> Result<usize, AppError> {
        let (Some(db), Some(profile)) = (self.inner.cache.as_ref(), self.inner.session.profile())
        else {
            return Ok(0);
        };
        let cached = brief_cache::list_briefs(db, &profile.id).await?;
        let count = cached.len();
        self.track_all(cached.into_iter().map(|c| c.job).collect());
        debug!("[TRACKER] Restored {} briefs from cache", count);
        Ok(count)
    }

    /// Moves a failed brief back to `processing` after the server accepted a
    /// retry, restarts polling if it had stopped and updates the cache.
    pub async fn mark_retrying(&self, id: &JobId) -> Result<(), AppError> {
        let (from, job) = {
            let mut state = self.lock();
            let tracked = state
                .jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Brief {} is not tracked", id)))?;
            let from = tracked.status;
            match from.transition_to(JobStatus::Processing, TransitionOrigin::Retry) {
                Transition::Valid => {}
                _ => {
                    return Err(AppError::InvalidTransition {
                        job_id: id.to_string(),
                        from,
                        to: JobStatus::Processing,
                    })
                }
            }
            tracked.status = JobStatus::Processing;
            tracked.updated_at = Some(Utc::now());
            (from, tracked.clone())
        };

        info!("[TRACKER] Brief {} re-entered processing", id.short());
        self.emit(TrackerEvent::StatusChanged {
            job_id: id.clone(),
            from,
            to: JobStatus::Processing,
        });
        self.ensure_loops();
        self.write_cache(std::slice::from_ref(&job)).await;
        Ok(())
    }

    /// Stops tracking a brief locally.
    pub fn untrack(&self, id: &JobId) -> Option<Job> {
        let removed = self.lock().jobs.remove(id);
        if removed.is_some() {
            debug!("[TRACKER] Untracked brief {}", id.short());
            self.emit(TrackerEvent::Removed(id.clone()));
            self.settle();
        }
        removed
    }

    /// Deletes a brief on the server and drops it locally.
    pub async fn delete_job(&self, id: &JobId) -> Result<(), AppError> {
        let result = self.inner.briefs.delete_brief(id).await;
        self.inner.session.intercept(result).await?;
        self.untrack(id);
        if let Some(db) = &self.inner.cache {
            if let Err(e) = brief_cache::remove_brief(db, id).await {
                warn!("[TRACKER] Failed to drop cached brief: {:?}", e.category());
            }
        }
        info!("[TRACKER] Deleted brief {}", id.short());
        Ok(())
    }

    /// Re-issues expiring asset links. The tracked status is left unchanged;
    /// only results are replaced.
    pub async fn refresh_job_assets(&self, id: &JobId) -> Result<Job, AppError> {
        let result = self.inner.briefs.refresh_assets(id).await;
        let fresh = self.inner.session.intercept(result).await?;

        let updated = {
            let mut state = self.lock();
            match state.jobs.get_mut(id) {
                Some(tracked) => {
                    tracked.results = fresh.results.clone();
                    tracked.updated_at = fresh.updated_at.or(tracked.updated_at);
                    tracked.clone()
                }
                None => fresh,
            }
        };
        self.write_cache(std::slice::from_ref(&updated)).await;
        Ok(updated)
    }

    /// Runs one poll cycle immediately, unless one is already in flight.
    pub async fn poll_now(&self) -> Result<(), AppError> {
        self.poll_cycle(None).await
    }

    /// Forgets every tracked brief and stops the loops. Called when the
    /// session ends so the next user starts empty.
    pub fn reset(&self) {
        let count = {
            let mut state = self.lock();
            if let Some(token) = state.loops.take() {
                token.cancel();
            }
            let count = state.jobs.len();
            state.jobs.clear();
            count
        };
        debug!("[TRACKER] Reset ({} briefs dropped)", count);
    }

    /// Stops the loops. Used at teardown.
    pub fn shutdown(&self) {
        if let Some(token) = self.lock().loops.take() {
            token.cancel();
            debug!("[TRACKER] Shut down");
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Applies a status reported by the server. Returns true when the local
    /// copy changed.
    fn apply(&self, remote: Job, origin: TransitionOrigin) -> bool {
        let from = {
            let mut state = self.lock();
            let Some(tracked) = state.jobs.get_mut(&remote.id) else {
                return false;
            };
            let from = tracked.status;
            match from.transition_to(remote.status, origin) {
                Transition::Unchanged => return false,
                Transition::Invalid => {
                    warn!(
                        "[TRACKER] Ignoring invalid transition {} -> {} for brief {}",
                        from,
                        remote.status,
                        remote.id.short()
                    );
                    return false;
                }
                Transition::Valid => {}
            }
            *tracked = remote.clone();
            from
        };

        let to = remote.status;
        if to.is_terminal() {
            info!("[TRACKER] Brief {} reached {}", remote.id.short(), to);
        } else {
            debug!("[TRACKER] Brief {} {} -> {}", remote.id.short(), from, to);
        }
        self.emit(TrackerEvent::StatusChanged {
            job_id: remote.id,
            from,
            to,
        });
        true
    }

    /// Drops settled briefs that are not in `listed`.
    fn evict_settled(&self, listed: &HashSet<JobId>) {
        let evicted: Vec<JobId> = {
            let mut state = self.lock();
            let stale: Vec<JobId> = state
                .jobs
                .values()
                .filter(|job| job.is_terminal() && !listed.contains(&job.id))
                .map(|job| job.id.clone())
                .collect();
            for id in &stale {
                state.jobs.remove(id);
            }
            stale
        };
        if !evicted.is_empty() {
            debug!("[TRACKER] Evicted {} settled briefs", evicted.len());
        }
        for id in evicted {
            self.emit(TrackerEvent::Removed(id));
        }
    }

    /// Starts the loops when there is a subscriber, pending work and a live
    /// session.
    fn ensure_loops(&self) {
        let lifetime = self.inner.session.lifetime();
        if lifetime.is_cancelled() {
            return;
        }

        let token = {
            let mut state = self.lock();
            if state.loops_running() || state.scopes.is_empty() || !state.has_pending() {
                return;
            }
            let token = lifetime.child_token();
            state.loops = Some(token.clone());
            token
        };

        info!("[TRACKER] Polling started");
        self.spawn_poll_loop(token.clone());
        self.spawn_ticker(token);
    }

    /// Stops the loops once nothing is pending.
    fn settle(&self) {
        let stopped = {
            let mut state = self.lock();
            if state.has_pending() {
                false
            } else {
                state.loops.take().map(|t| t.cancel()).is_some()
            }
        };
        if stopped {
            info!("[TRACKER] All briefs settled; polling stopped");
            self.emit(TrackerEvent::Idle);
        }
    }

    fn spawn_poll_loop(&self, token: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.poll_interval;

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let Some(inner) = weak.upgrade() else { break };
                let tracker = JobTracker { inner };
                if let Err(e) = tracker.poll_cycle(Some(&token)).await {
                    debug!("[TRACKER] Poll cycle ended with {:?}", e.category());
                }
            }
            debug!("[TRACKER] Poll loop stopped");
        });
    }

    fn spawn_ticker(&self, token: CancellationToken) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.settings.tick_interval;

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let Some(inner) = weak.upgrade() else { break };
                let tracker = JobTracker { inner };
                let reports = tracker.progress_reports(Utc::now());
                if !reports.is_empty() {
                    tracker.emit(TrackerEvent::Progress(reports));
                }
            }
            debug!("[TRACKER] Progress ticker stopped");
        });
    }

    /// Fetches every pending brief once and applies the results.
    ///
    /// Results are discarded when `cancel` fired or the session ended while
    /// the fetches were in flight.
    async fn poll_cycle(&self, cancel: Option<&CancellationToken>) -> Result<(), AppError> {
        if self.inner.poll_in_flight.swap(true, Ordering::AcqRel) {
            debug!("[TRACKER] Poll already in flight; skipping");
            return Ok(());
        }
        let _guard = PollGuard(&self.inner.poll_in_flight);

        let lifetime = self.inner.session.lifetime();
        if lifetime.is_cancelled() {
            self.shutdown();
            return Err(AppError::NotAuthenticated);
        }

        let ids = self.pending_ids();
        if ids.is_empty() {
            self.settle();
            return Ok(());
        }

        let briefs = &self.inner.briefs;
        let results = join_all(ids.iter().map(|id| briefs.get_brief(id))).await;

        if cancel.is_some_and(|c| c.is_cancelled()) || lifetime.is_cancelled() {
            debug!("[TRACKER] Poll results discarded after cancellation");
            return Ok(());
        }

        let mut changed = Vec::new();
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(job) => {
                    if self.apply(job, TransitionOrigin::Remote) {
                        if let Some(job) = self.job(id) {
                            changed.push(job);
                        }
                    }
                }
                Err(AppError::NotFound(_)) => {
                    warn!("[TRACKER] Brief {} no longer exists", id.short());
                    self.untrack(id);
                }
                Err(e) if e.is_session_invalid() => {
                    return self.inner.session.intercept(Err(e)).await;
                }
                Err(e) => {
                    debug!(
                        "[TRACKER] Poll of brief {} failed ({:?}); keeping it",
                        id.short(),
                        e.category()
                    );
                }
            }
        }

        self.write_cache(&changed).await;
        self.settle();
        Ok(())
    }

    async fn write_cache(&self, jobs: &[Job]) {
        let Some(db) = &self.inner.cache else { return };
        if jobs.is_empty() || self.inner.session.lifetime().is_cancelled() {
            return;
        }
        if let Err(e) = brief_cache::upsert_briefs(db, jobs).await {
            warn!("[TRACKER] Failed to cache briefs: {:?}", e.category());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription
// ─────────────────────────────────────────────────────────────────────────────

/// A consumer's hold on the scheduler. Dropping it unsubscribes.
pub struct Subscription {
    tracker: JobTracker,
    id: u64,
    scope: String,
    events: broadcast::Receiver<TrackerEvent>,
}

impl Subscription {
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Waits for the next event. Returns `None` once the tracker is gone.
    pub async fn recv(&mut self) -> Option<TrackerEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("[TRACKER] Scope '{}' skipped {} events", self.scope, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<TrackerEvent> {
        loop {
            match self.events.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.tracker.release(self.id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

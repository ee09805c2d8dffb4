//! Application context shared by every command.
//!
//! Built once by [`AppContext::init`] and torn down with
//! [`AppContext::teardown`]. Components receive the handles they need from
//! here; there is no global session.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, SharedToken};
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::jobs::tracker::TrackerSettings;
use crate::jobs::{JobSubmissionGate, JobTracker, RetryController};
use crate::session::{AuthState, SessionEvent, SessionStore};
use crate::storage::{briefs as brief_cache, Database, SqliteVault};

// ─────────────────────────────────────────────────────────────────────────────
// Application Context
// ─────────────────────────────────────────────────────────────────────────────

pub struct AppContext {
    pub config: ClientConfig,
    pub db: Arc<Database>,
    pub api: Arc<ApiClient>,
    pub session: SessionStore,
    pub tracker: JobTracker,
    pub submissions: JobSubmissionGate,
    pub retries: RetryController,
    /// Drops tracked and cached briefs whenever the session ends.
    sign_out_watcher: Mutex<Option<JoinHandle<()>>>,
}

impl AppContext {
    /// Opens the database, wires the components together and restores any
    /// persisted session (without a network call).
    pub async fn init(config: ClientConfig) -> Result<Self, AppError> {
        config.validate()?;

        let db = Arc::new(Database::init(config.database_path()?).await?);
        let token = SharedToken::new();
        let api = Arc::new(ApiClient::new(&config, token.clone())?);

        let session = SessionStore::new(
            api.clone(),
            Arc::new(SqliteVault::new(db.clone())),
            token,
            config.refresh_interval(),
        );
        let tracker = JobTracker::new(
            api.clone(),
            session.clone(),
            TrackerSettings::from_config(&config),
            Some(db.clone()),
        );
        let submissions = JobSubmissionGate::new(api.clone(), session.clone(), tracker.clone());
        let retries = RetryController::new(api.clone(), session.clone(), tracker.clone());

        let watcher = spawn_sign_out_watcher(session.subscribe(), tracker.clone(), db.clone());

        let state = session.bootstrap().await?;
        if matches!(state, AuthState::Authenticated { .. }) {
            if let Err(e) = tracker.restore_from_cache().await {
                warn!("Failed to restore cached briefs: {:?}", e.category());
            }
        }
        info!("Context ready ({:?})", state);

        Ok(Self {
            config,
            db,
            api,
            session,
            tracker,
            submissions,
            retries,
            sign_out_watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Stops polling, the progress ticker and the refresh loop. The persisted
    /// session is kept.
    pub fn teardown(&self) {
        self.tracker.shutdown();
        self.session.shutdown();
        let watcher = self
            .sign_out_watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = watcher {
            handle.abort();
        }
        debug!("Context torn down");
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn spawn_sign_out_watcher(
    mut events: broadcast::Receiver<SessionEvent>,
    tracker: JobTracker,
    db: Arc<Database>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SignedOut { reason }) => {
                    tracker.reset();
                    if let Err(e) = brief_cache::clear_briefs(&db).await {
                        warn!("Failed to clear brief cache: {:?}", e.category());
                    } else {
                        debug!("Brief cache cleared after sign-out ({:?})", reason);
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

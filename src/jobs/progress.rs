//! Local progress estimation for in-flight briefs.
//!
//! Progress is derived purely from a brief's creation time and a fixed
//! service-level target; no network call is involved. The service gives no
//! real progress signal, so the estimate is a UX device only.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::jobs::{Job, JobId};

/// Default target duration for one brief (5 minutes).
pub const DEFAULT_SLA: Duration = Duration::from_secs(300);

/// Derived display values for one brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressEstimate {
    /// Whole percent in `0..=100`.
    pub percent: u8,
    pub elapsed: Duration,
    pub remaining: Duration,
}

impl ProgressEstimate {
    /// `mm:ss` rendering of the remaining time.
    pub fn remaining_label(&self) -> String {
        let secs = self.remaining.as_secs();
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

/// Estimate attached to a specific brief, as published by the ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    pub job_id: JobId,
    pub estimate: ProgressEstimate,
}

/// Computes progress from wall-clock values.
///
/// `elapsed = max(0, now - created_at)`, `remaining = max(0, sla - elapsed)`,
/// `percent = min(100, floor(elapsed / sla * 100))`. A clock that reads
/// earlier than `created_at` counts as zero elapsed. A zero SLA is treated as
/// already exhausted.
pub fn estimate(created_at: DateTime<Utc>, now: DateTime<Utc>, sla: Duration) -> ProgressEstimate {
    let elapsed = (now - created_at).to_std().unwrap_or(Duration::ZERO);
    let remaining = sla.saturating_sub(elapsed);

    let sla_ms = sla.as_millis();
    let percent = if sla_ms == 0 {
        100
    } else {
        (elapsed.as_millis().saturating_mul(100) / sla_ms).min(100) as u8
    };

    ProgressEstimate {
        percent,
        elapsed,
        remaining,
    }
}

/// Estimates progress for a brief at `now`.
pub fn estimate_job(job: &Job, now: DateTime<Utc>, sla: Duration) -> ProgressReport {
    ProgressReport {
        job_id: job.id.clone(),
        estimate: estimate(job.created_at, now, sla),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Brief (job) records as exchanged with the service.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// JobId
// ─────────────────────────────────────────────────────────────────────────────

/// Server-assigned identifier of a brief.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines (first 8 chars).
    pub fn short(&self) -> String {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => format!("{}...", &self.0[..idx]),
            None => self.0.clone(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// JobStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a brief.
///
/// Unknown wire values fail to deserialize instead of falling through to a
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    StrategyCompleted,
    AdsCompleted,
    Completed,
    Failed,
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    /// A status reported by the server during polling or a fetch.
    Remote,
    /// The retry path, the only one allowed to leave `failed`.
    Retry,
    /// A full listing from the server. A `failed` brief listed with another
    /// status was retried by an earlier session and is reopened.
    Listing,
}

/// Result of checking a status change against the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Valid,
    Invalid,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::StrategyCompleted,
        JobStatus::AdsCompleted,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Converts the status to its wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::StrategyCompleted => "strategy_completed",
            JobStatus::AdsCompleted => "ads_completed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parses the wire representation. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        JobStatus::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Returns true once no further automatic polling should happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position along the forward path; `failed` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Processing => Some(1),
            JobStatus::StrategyCompleted => Some(2),
            JobStatus::AdsCompleted => Some(3),
            JobStatus::Completed => Some(4),
            JobStatus::Failed => None,
        }
    }

    /// Checks a move from `self` to `next` against the lifecycle.
    pub fn transition_to(self, next: JobStatus, origin: TransitionOrigin) -> Transition {
        if self == next {
            return Transition::Unchanged;
        }

        let valid = match (self, next, origin) {
            (JobStatus::Failed, JobStatus::Processing, TransitionOrigin::Retry) => true,
            (_, _, TransitionOrigin::Retry) => false,
            (JobStatus::Failed, _, TransitionOrigin::Listing) => true,
            (current, _, _) if current.is_terminal() => false,
            (_, JobStatus::Failed, _) => true,
            (current, next, _) => match (current.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        };

        if valid {
            Transition::Valid
        } else {
            Transition::Invalid
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────────

/// Output language of the generated strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Fr,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Language::En),
            "fr" => Some(Language::Fr),
            _ => None,
        }
    }
}

/// Validated form data sent when creating a brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BriefPayload {
    pub company_name: String,
    pub sector: String,
    pub tone: String,
    pub target_audience: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Job
// ─────────────────────────────────────────────────────────────────────────────

/// A brief and its (possibly partial) results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub user_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: BriefPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<BriefResults>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal failure surfaced as a retry affordance.
    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// Structured output. Intermediate phases may carry only part of it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BriefResults {
    pub brief: Option<ProcessedBrief>,
    pub strategy: Option<BrandStrategy>,
    pub ads: Vec<AdCampaign>,
    pub video_ads: Vec<VideoAd>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessedBrief {
    pub company_name: String,
    pub sector: String,
    pub target_audience: String,
    pub brand_personality: String,
    pub key_messages: Vec<String>,
    pub competitive_advantages: Vec<String>,
    pub pain_points: Vec<String>,
    pub goals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrandStrategy {
    pub positioning: String,
    pub value_proposition: String,
    pub brand_pillars: Vec<String>,
    pub messaging_framework: MessagingFramework,
    pub tonal_guidelines: TonalGuidelines,
    pub target_segments: Vec<TargetSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingFramework {
    pub primary_message: String,
    pub supporting_messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TonalGuidelines {
    pub voice: String,
    pub personality: Vec<String>,
    pub do_and_donts: DoAndDonts,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DoAndDonts {
    #[serde(rename = "do")]
    pub dos: Vec<String>,
    #[serde(rename = "dont")]
    pub donts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetSegment {
    pub name: String,
    pub demographics: String,
    pub psychographics: String,
    pub pain_points: Vec<String>,
    pub motivations: Vec<String>,
    pub preferred_channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdCampaign {
    pub id: String,
    pub title: String,
    pub format: String,
    pub platform: String,
    pub copy: AdCopy,
    pub image_prompt: String,
    pub image_url: Option<String>,
    pub target_segment: String,
    pub objectives: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdCopy {
    pub headline: String,
    pub body: String,
    pub cta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoAd {
    pub id: String,
    pub title: String,
    pub script: String,
    pub duration: u32,
    pub scenes: Vec<VideoScene>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoScene {
    pub id: String,
    pub duration: u32,
    pub description: String,
    pub visual_prompt: String,
    pub voiceover: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Dashboard statistics
// ─────────────────────────────────────────────────────────────────────────────

/// Aggregate counts shown above a brief list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DashboardStats {
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    /// Rounded share of completed briefs, `None` for an empty list.
    pub completion_rate: Option<u8>,
}

impl DashboardStats {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut stats = DashboardStats::default();
        for job in jobs {
            stats.total += 1;
            match job.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Queued
                | JobStatus::Processing
                | JobStatus::StrategyCompleted
                | JobStatus::AdsCompleted => stats.in_progress += 1,
            }
        }
        if stats.total > 0 {
            let rate = (stats.completed as f64 / stats.total as f64 * 100.0).round();
            stats.completion_rate = Some(rate as u8);
        }
        stats
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

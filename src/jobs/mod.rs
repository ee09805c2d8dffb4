//! Brief lifecycle: model, progress estimation, polling, submission and retry.

pub(crate) mod model;
pub mod progress;
pub mod retry;
pub mod submission;
pub mod tracker;

pub use model::{
    AdCampaign, AdCopy, BrandStrategy, BriefPayload, BriefResults, DashboardStats, DoAndDonts,
    Job, JobId, JobStatus, Language, MessagingFramework, ProcessedBrief, TargetSegment,
    TonalGuidelines, Transition, TransitionOrigin, VideoAd, VideoScene,
};
pub use progress::{ProgressEstimate, ProgressReport, DEFAULT_SLA};
pub use retry::RetryController;
pub use submission::JobSubmissionGate;
pub use tracker::{JobTracker, Subscription, TrackerEvent, TrackerSettings};
